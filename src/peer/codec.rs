//! Setup payload wire format: base64(gzip(json(SdpPayload))).

use crate::peer::types::SdpPayload;
use crate::signaling::SignalPayload;
use crate::{CallError, Result};
use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

/// Decompressed payloads larger than this are rejected (zip-bomb guard)
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

pub fn encode(p: &SdpPayload) -> Result<SignalPayload> {
    let json = serde_json::to_vec(p).map_err(|e| CallError::InvalidPayload(e.to_string()))?;

    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&json)
        .map_err(|e| CallError::InvalidPayload(e.to_string()))?;
    let compressed = gz
        .finish()
        .map_err(|e| CallError::InvalidPayload(e.to_string()))?;

    Ok(SignalPayload::new(general_purpose::STANDARD.encode(compressed)))
}

pub fn decode(s: &SignalPayload) -> Result<SdpPayload> {
    let compressed = general_purpose::STANDARD
        .decode(s.as_str())
        .map_err(|e| CallError::InvalidPayload(format!("base64: {}", e)))?;

    let gz = GzDecoder::new(&compressed[..]);
    let mut json = Vec::new();
    // read one byte past the cap so oversize input is detectable
    gz.take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut json)
        .map_err(|e| CallError::InvalidPayload(format!("gzip: {}", e)))?;
    if json.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(CallError::InvalidPayload(format!(
            "payload exceeds {} bytes once decompressed",
            MAX_DECOMPRESSED_SIZE
        )));
    }

    serde_json::from_slice(&json).map_err(|e| CallError::InvalidPayload(format!("json: {}", e)))
}
