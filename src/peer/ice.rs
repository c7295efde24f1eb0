use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;
use tracing::{info, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

/// Builds the peer connection configuration from the configured ICE servers
pub fn rtc_config(servers: &[ServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

impl CandidateSummary {
    /// Counts the `a=candidate` lines of a gathered SDP by type
    pub fn from_sdp(sdp: &str) -> Self {
        let mut summary = Self::default();
        for line in sdp.lines().filter(|l| l.starts_with("a=candidate")) {
            if line.contains("typ host") {
                summary.host += 1;
            } else if line.contains("typ srflx") {
                summary.srflx += 1;
            } else if line.contains("typ relay") {
                summary.relay += 1;
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.host + self.srflx + self.relay
    }
}

pub fn analyze_candidates(sdp: &str) -> CandidateSummary {
    let summary = CandidateSummary::from_sdp(sdp);
    info!(
        "candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );
    if summary.relay == 0 {
        warn!("no TURN relay candidates, connection through strict NAT may fail");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_lines_are_counted_by_type() {
        let sdp = "v=0\r\n\
            a=candidate:1 1 udp 2130706431 192.168.1.4 50000 typ host\r\n\
            a=candidate:2 1 udp 2130706431 10.0.0.2 50001 typ host\r\n\
            a=candidate:3 1 udp 1694498815 203.0.113.7 61000 typ srflx raddr 0.0.0.0 rport 0\r\n\
            a=candidate:4 1 udp 16777215 198.51.100.1 3478 typ relay raddr 0.0.0.0 rport 0\r\n\
            a=end-of-candidates\r\n";

        let summary = CandidateSummary::from_sdp(sdp);
        assert_eq!(
            summary,
            CandidateSummary {
                host: 2,
                srflx: 1,
                relay: 1
            }
        );
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn credentials_flow_into_ice_servers() {
        let servers = vec![ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: Some("alice".into()),
            credential: Some("secret".into()),
        }];

        let config = rtc_config(&servers);
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls, vec!["turn:relay.example.org:3478"]);
        assert_eq!(config.ice_servers[0].username, "alice");
        assert_eq!(config.ice_servers[0].credential, "secret");
    }
}
