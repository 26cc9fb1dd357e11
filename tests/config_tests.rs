use loqa_rooms::{Config, GatePolicy};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> String {
    let path = dir.path().join("rooms.toml");
    fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn test_file_values_override_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[service.http]
port = 9100

[capture]
default_duration_secs = 15
sample_interval_ms = 500

[peer]
enabled = false
ice_servers = ["stun:stun.example.org:3478", "turn:turn.example.org:3478"]
settle_delay_ms = 1500
"#,
    );

    let config = Config::load(&path).unwrap();

    assert_eq!(config.service.http.port, 9100);
    assert_eq!(config.service.http.bind, "127.0.0.1");
    assert_eq!(config.capture.default_duration_secs, 15);
    assert_eq!(config.capture.sample_interval(), Duration::from_millis(500));
    assert_eq!(config.capture.analysis_grace(), Duration::from_secs(5));
    assert_eq!(config.peer.settle_delay(), Duration::from_millis(1500));
    assert_eq!(config.peer.disconnect_grace(), Duration::from_secs(3));
    assert!(!config.peer.enabled);
    assert_eq!(config.peer.ice_servers[1], "turn:turn.example.org:3478");
}

#[test]
fn test_shipped_config_matches_defaults() {
    let shipped = Config::load("config/loqa-rooms").unwrap();
    let defaults = Config::default();

    assert_eq!(shipped.service.http.port, defaults.service.http.port);
    assert_eq!(shipped.nats.subject_prefix, defaults.nats.subject_prefix);
    assert_eq!(shipped.nats.classifier_timeout(), defaults.nats.classifier_timeout());
    assert_eq!(shipped.signaling.reconnect_backoff_ms, defaults.signaling.reconnect_backoff_ms);
    assert_eq!(shipped.capture.default_duration_secs, defaults.capture.default_duration_secs);
    assert_eq!(shipped.media.frames_dir, defaults.media.frames_dir);
    assert_eq!(shipped.peer.enabled, defaults.peer.enabled);
    assert_eq!(shipped.peer.ice_servers, defaults.peer.ice_servers);
}

#[test]
fn test_environment_overrides_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[signaling]
max_reconnect_attempts = 3
"#,
    );

    std::env::set_var("LOQA_ROOMS__SIGNALING__MAX_RECONNECT_ATTEMPTS", "8");
    std::env::set_var("LOQA_ROOMS__CAPTURE__GATE_POLICY", "require_samples");
    let config = Config::load(&path);
    std::env::remove_var("LOQA_ROOMS__SIGNALING__MAX_RECONNECT_ATTEMPTS");
    std::env::remove_var("LOQA_ROOMS__CAPTURE__GATE_POLICY");

    let config = config.unwrap();
    assert_eq!(config.signaling.max_reconnect_attempts, 8);
    assert_eq!(config.capture.gate_policy, GatePolicy::RequireSamples);
}
