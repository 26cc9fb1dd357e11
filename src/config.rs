use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::session::GatePolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub nats: NatsConfig,
    pub signaling: SignalingConfig,
    pub capture: CaptureConfig,
    pub peer: PeerConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-rooms".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8085,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    /// Rooms publish on `{subject_prefix}.{session_code}`
    pub subject_prefix: String,
    pub classifier_subject: String,
    pub classifier_timeout_ms: u64,
}

impl NatsConfig {
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            subject_prefix: "room".to_string(),
            classifier_subject: "emotion.classify".to_string(),
            classifier_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Attempts before the channel gives up and reports a terminal disconnect
    pub max_reconnect_attempts: u32,
    /// Linear backoff step: attempt n waits n * backoff
    pub reconnect_backoff_ms: u64,
}

impl SignalingConfig {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms * u64::from(attempt))
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub default_duration_secs: u32,
    pub sample_interval_ms: u64,
    pub gate_policy: GatePolicy,
    /// How long the conductor waits for the responder's analysis after a stop
    pub analysis_grace_ms: u64,
}

impl CaptureConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn analysis_grace(&self) -> Duration {
        Duration::from_millis(self.analysis_grace_ms)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: 10,
            sample_interval_ms: 1000,
            gate_policy: GatePolicy::AnyAnalysis,
            analysis_grace_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Open a WebRTC link between the participants
    pub enabled: bool,
    /// STUN/TURN urls handed to the media engine
    pub ice_servers: Vec<String>,
    /// Delay before the initiator sends its first offer
    pub settle_delay_ms: u64,
    /// How long a disconnected link may linger before a restart
    pub disconnect_grace_ms: u64,
}

impl PeerConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            settle_delay_ms: 3000,
            disconnect_grace_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Directory of still images served as camera frames
    pub frames_dir: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            frames_dir: "frames".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("LOQA_ROOMS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_linear() {
        let signaling = SignalingConfig::default();
        assert_eq!(signaling.backoff_for(1), Duration::from_secs(1));
        assert_eq!(signaling.backoff_for(3), Duration::from_secs(3));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = Config::load("config/does-not-exist").unwrap();
        assert_eq!(cfg.service.http.port, 8085);
        assert_eq!(cfg.capture.gate_policy, GatePolicy::AnyAnalysis);
        assert_eq!(cfg.peer.settle_delay(), Duration::from_secs(3));
        assert!(cfg.peer.enabled);
        assert_eq!(cfg.peer.ice_servers.len(), 1);
    }
}
