// Call configuration
// Logging is on by default only in debug builds

use crate::peer::types::ServerConfig;
use crate::{CallError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CallConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub signaling: SignalingConfig,
    /// How long an incoming-message banner stays up
    pub alert_timeout_secs: u64,
    pub signal_fetch: SignalFetchPolicy,
    /// Upper bound on ICE gathering before the local payload is emitted anyway
    pub gather_timeout_secs: u64,
    pub logging: LogConfig,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            signaling: SignalingConfig::default(),
            alert_timeout_secs: 10,
            signal_fetch: SignalFetchPolicy::default(),
            gather_timeout_secs: 10,
            logging: LogConfig::default(),
        }
    }
}

impl CallConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: CallConfig =
            toml::from_str(s).map_err(|e| CallError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(CallError::InvalidConfig(
                    "ICE server URL cannot be empty".into(),
                ));
            }
            if server.r#type == "turn"
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(CallError::InvalidConfig(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        if self.alert_timeout_secs == 0 {
            return Err(CallError::InvalidConfig(
                "alert_timeout_secs must be positive".into(),
            ));
        }
        if self.signal_fetch.attempts == 0 {
            return Err(CallError::InvalidConfig(
                "signal_fetch.attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn alert_timeout(&self) -> Duration {
        Duration::from_secs(self.alert_timeout_secs)
    }

    pub fn gather_timeout(&self) -> Duration {
        Duration::from_secs(self.gather_timeout_secs)
    }
}

fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

/// Where the persisted-signal endpoint and the live channel live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SignalingConfig {
    pub base_url: String,
    pub live_url: String,
    pub save_path: String,
    pub fetch_path: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".into(),
            live_url: "ws://localhost:5000/live".into(),
            save_path: "/save-call-id".into(),
            fetch_path: "/get-call-id".into(),
        }
    }
}

/// How often the joiner looks up the initiator's payload.
///
/// One attempt reproduces the plain lookup-at-mount behavior: if nothing is
/// published yet the session stays in `AwaitingSignal`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SignalFetchPolicy {
    pub attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for SignalFetchPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            retry_interval_ms: 2000,
        }
    }
}

impl SignalFetchPolicy {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub enabled: bool,
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

#[cfg(debug_assertions)]
impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: "ssc_call=debug".into(),
        }
    }
}

#[cfg(not(debug_assertions))]
impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            filter: "warn".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.alert_timeout(), Duration::from_secs(10));
        assert_eq!(config.signal_fetch.attempts, 1);
        assert_eq!(config.ice_servers.len(), 2);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = CallConfig::from_toml_str(
            r#"
            alert_timeout_secs = 4

            [signal_fetch]
            attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.alert_timeout_secs, 4);
        assert_eq!(config.signal_fetch.attempts, 5);
        assert_eq!(config.signal_fetch.retry_interval_ms, 2000);
        assert_eq!(config.signaling.save_path, "/save-call-id");
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let err = CallConfig::from_toml_str(
            r#"
            [[ice_servers]]
            id = "relay"
            type = "turn"
            url = "turn.example.org:3478"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, CallError::InvalidConfig(_)));
    }

    #[test]
    fn zero_fetch_attempts_is_rejected() {
        let mut config = CallConfig::default();
        config.signal_fetch.attempts = 0;
        assert!(config.validate().is_err());
    }
}
