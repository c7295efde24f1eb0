//! Persisted-signal endpoint over plain HTTP request/response.

use super::SignalPayload;
use crate::config::SignalingConfig;
use crate::session::CallId;
use crate::{CallError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Serialize)]
struct SaveRequest<'a> {
    id: &'a str,
    #[serde(rename = "signalData")]
    signal_data: &'a SignalPayload,
}

#[derive(Deserialize)]
struct FetchResponse {
    #[serde(default)]
    code: Option<SignalPayload>,
}

/// `POST {base}{save_path}` to store, `GET {base}{fetch_path}/{id}` to read.
#[derive(Clone)]
pub struct HttpSignalStore {
    http: reqwest::Client,
    save_url: String,
    fetch_url: String,
}

impl HttpSignalStore {
    pub fn new(config: &SignalingConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(http: reqwest::Client, config: &SignalingConfig) -> Self {
        let base = config.base_url.trim_end_matches('/');
        Self {
            http,
            save_url: format!("{}{}", base, config.save_path),
            fetch_url: format!("{}{}", base, config.fetch_path),
        }
    }

    pub async fn publish(&self, call_id: &CallId, payload: &SignalPayload) -> Result<()> {
        let body = SaveRequest {
            id: call_id.as_str(),
            signal_data: payload,
        };
        let resp = self
            .http
            .post(&self.save_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CallError::Signaling(format!("save request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CallError::Signaling(format!(
                "save request rejected: {} {}",
                status, text
            )));
        }
        debug!(call_id = %call_id, "published {:?}", payload);
        Ok(())
    }

    pub async fn fetch(&self, call_id: &CallId) -> Option<SignalPayload> {
        let url = self.fetch_url_for(call_id);
        let resp = match self.http.get(&url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(call_id = %call_id, "signal lookup failed: {}", e);
                return None;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            warn!(call_id = %call_id, "signal lookup returned {}", status);
            return None;
        }

        match resp.json::<FetchResponse>().await {
            Ok(body) => {
                if body.code.is_none() {
                    debug!(call_id = %call_id, "no signal published yet");
                }
                body.code
            }
            Err(e) => {
                warn!(call_id = %call_id, "signal lookup body unreadable: {}", e);
                None
            }
        }
    }

    fn fetch_url_for(&self, call_id: &CallId) -> String {
        format!("{}/{}", self.fetch_url, call_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let config = SignalingConfig {
            base_url: "https://signal.example.org/".into(),
            ..Default::default()
        };
        let store = HttpSignalStore::new(&config);
        assert_eq!(store.save_url, "https://signal.example.org/save-call-id");
        assert_eq!(
            store.fetch_url_for(&CallId::new("abc").unwrap()),
            "https://signal.example.org/get-call-id/abc"
        );
    }

    #[test]
    fn save_body_uses_wire_names() {
        let payload = SignalPayload::new("offer");
        let body = SaveRequest {
            id: "abc",
            signal_data: &payload,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({ "id": "abc", "signalData": "offer" })
        );
    }

    #[test]
    fn missing_code_reads_as_absent() {
        let empty: FetchResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.code.is_none());
        let null: FetchResponse = serde_json::from_str(r#"{"code":null}"#).unwrap();
        assert!(null.code.is_none());
        let some: FetchResponse = serde_json::from_str(r#"{"code":"x"}"#).unwrap();
        assert_eq!(some.code, Some(SignalPayload::new("x")));
    }
}
