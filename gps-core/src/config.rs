//! Configuration file management for gps-listener.
//!
//! Reads/writes `~/.gps-listener/config.yaml` with listener timeouts,
//! protocol ports, ingest queue sizing and webhook URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::protocol::Protocol;
use crate::types::GpsError;

/// Full configuration structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub listener: ListenerConfig,
    pub ports: PortConfig,
    pub ingest: IngestConfig,
    pub webhook: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    pub host: String,
    pub idle_timeout_secs: u64,
    pub grace_period_secs: u64,
    /// Consecutive undecodable frames tolerated before a session is closed.
    pub max_frame_errors: u32,
}

/// One listening port per protocol; `None` leaves the protocol unbound.
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    pub amwell: Option<u16>,
    pub freedom: Option<u16>,
    pub haicom: Option<u16>,
    pub xexun: Option<u16>,
    /// Port where the protocol is recognised from the first bytes.
    pub sniff: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub queue_capacity: usize,
    pub send_timeout_ms: u64,
    /// Upper bound on one delivery to one sink.
    pub sink_timeout_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            host: "0.0.0.0".into(),
            idle_timeout_secs: 300,
            grace_period_secs: 10,
            max_frame_errors: 16,
        }
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        PortConfig {
            amwell: Some(7001),
            freedom: Some(7002),
            haicom: Some(7003),
            xexun: Some(7004),
            sniff: Some(7000),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            queue_capacity: 1024,
            send_timeout_ms: 500,
            sink_timeout_ms: 5000,
        }
    }
}

impl ListenerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

impl PortConfig {
    /// No fixed ports and no sniff port.
    pub fn none() -> Self {
        PortConfig {
            amwell: None,
            freedom: None,
            haicom: None,
            xexun: None,
            sniff: None,
        }
    }

    pub fn port_for(&self, protocol: Protocol) -> Option<u16> {
        match protocol {
            Protocol::Amwell => self.amwell,
            Protocol::Freedom => self.freedom,
            Protocol::Haicom => self.haicom,
            Protocol::Xexun => self.xexun,
        }
    }

    fn slot(&mut self, key: &str) -> Option<&mut Option<u16>> {
        match key {
            "amwell" => Some(&mut self.amwell),
            "freedom" => Some(&mut self.freedom),
            "haicom" => Some(&mut self.haicom),
            "xexun" => Some(&mut self.xexun),
            "sniff" => Some(&mut self.sniff),
            _ => None,
        }
    }
}

impl IngestConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }
}

/// Get the config directory path (`~/.gps-listener/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".gps-listener")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.gps-listener/config.yaml`.
///
/// Returns default config if the file doesn't exist or can't be read.
pub fn load_config() -> Config {
    let path = config_file();
    if !path.exists() {
        return Config::default();
    }
    load_config_from(&path).unwrap_or_default()
}

/// Load config from an explicit path. A missing file is an error here.
pub fn load_config_from(path: &Path) -> Result<Config, GpsError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| GpsError::Config(format!("{}: {e}", path.display())))?;
    parse_config(&text)
}

/// Save config to `~/.gps-listener/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, GpsError> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), GpsError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| GpsError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| GpsError::Config(e.to_string()))
}

/// Parse simple YAML-like config text.
///
/// Unknown keys are ignored; a known key with an unparseable value is an
/// error naming the key.
pub fn parse_config(text: &str) -> Result<Config, GpsError> {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for (lineno, line) in text.lines().enumerate() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');

        let Some((key, val)) = stripped.split_once(':') else {
            return Err(GpsError::Config(format!(
                "line {}: expected `key: value`",
                lineno + 1
            )));
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            if val.is_empty() {
                current_section = Some(key.to_string());
            } else {
                current_section = None;
                if key == "webhook" {
                    config.webhook = parse_string_value(val);
                }
            }
            continue;
        }

        let Some(section) = current_section.as_deref() else {
            continue;
        };
        match (section, key) {
            ("listener", "host") => {
                if let Some(v) = parse_string_value(val) {
                    config.listener.host = v;
                }
            }
            ("listener", "idle_timeout_secs") => {
                config.listener.idle_timeout_secs = parse_number(key, val)?
            }
            ("listener", "grace_period_secs") => {
                config.listener.grace_period_secs = parse_number(key, val)?
            }
            ("listener", "max_frame_errors") => {
                config.listener.max_frame_errors = parse_number(key, val)?
            }
            ("ports", _) => {
                if let Some(slot) = config.ports.slot(key) {
                    *slot = parse_port_value(key, val)?;
                }
            }
            ("ingest", "queue_capacity") => {
                config.ingest.queue_capacity = parse_number(key, val)?
            }
            ("ingest", "send_timeout_ms") => {
                config.ingest.send_timeout_ms = parse_number(key, val)?
            }
            ("ingest", "sink_timeout_ms") => {
                config.ingest.sink_timeout_ms = parse_number(key, val)?
            }
            _ => {}
        }
    }

    if config.ingest.queue_capacity == 0 {
        return Err(GpsError::Config("queue_capacity must be at least 1".into()));
    }

    Ok(config)
}

fn is_null(val: &str) -> bool {
    val == "null" || val == "~" || val.is_empty()
}

fn parse_string_value(val: &str) -> Option<String> {
    if is_null(val) {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_number<T: std::str::FromStr>(key: &str, val: &str) -> Result<T, GpsError> {
    val.parse()
        .map_err(|_| GpsError::Config(format!("{key}: invalid number `{val}`")))
}

fn parse_port_value(key: &str, val: &str) -> Result<Option<u16>, GpsError> {
    if is_null(val) {
        return Ok(None);
    }
    parse_number(key, val).map(Some)
}

fn port_line(name: &str, port: Option<u16>) -> String {
    match port {
        Some(p) => format!("  {name}: {p}"),
        None => format!("  {name}: null"),
    }
}

/// Serialize config to YAML-like text.
pub fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# gps-listener configuration".to_string(), String::new()];

    lines.push("listener:".into());
    lines.push(format!("  host: \"{}\"", config.listener.host));
    lines.push(format!(
        "  idle_timeout_secs: {}",
        config.listener.idle_timeout_secs
    ));
    lines.push(format!(
        "  grace_period_secs: {}",
        config.listener.grace_period_secs
    ));
    lines.push(format!(
        "  max_frame_errors: {}",
        config.listener.max_frame_errors
    ));
    lines.push(String::new());

    lines.push("ports:".into());
    for protocol in Protocol::ALL {
        lines.push(port_line(protocol.name(), config.ports.port_for(protocol)));
    }
    lines.push(port_line("sniff", config.ports.sniff));
    lines.push(String::new());

    lines.push("ingest:".into());
    lines.push(format!("  queue_capacity: {}", config.ingest.queue_capacity));
    lines.push(format!("  send_timeout_ms: {}", config.ingest.send_timeout_ms));
    lines.push(format!("  sink_timeout_ms: {}", config.ingest.sink_timeout_ms));
    lines.push(String::new());

    match &config.webhook {
        Some(url) => lines.push(format!("webhook: \"{url}\"")),
        None => lines.push("webhook: null".into()),
    }

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listener.idle_timeout_secs, 300);
        assert_eq!(config.listener.grace_period_secs, 10);
        assert_eq!(config.listener.max_frame_errors, 16);
        assert_eq!(config.ingest.queue_capacity, 1024);
        assert_eq!(config.ingest.send_timeout(), Duration::from_millis(500));
        assert_eq!(config.ingest.sink_timeout(), Duration::from_secs(5));
        assert!(config.webhook.is_none());
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
listener:
  host: "127.0.0.1"
  idle_timeout_secs: 60
  grace_period_secs: 3
  max_frame_errors: 4

ports:
  amwell: 9001
  freedom: null
  haicom: 9003
  xexun: ~
  sniff: 9000

ingest:
  queue_capacity: 16
  send_timeout_ms: 100
  sink_timeout_ms: 2000

webhook: "https://example.com/hook"
"#;
        let config = parse_config(text).unwrap();
        assert_eq!(config.listener.host, "127.0.0.1");
        assert_eq!(config.listener.idle_timeout(), Duration::from_secs(60));
        assert_eq!(config.listener.grace_period(), Duration::from_secs(3));
        assert_eq!(config.listener.max_frame_errors, 4);
        assert_eq!(config.ports.port_for(Protocol::Amwell), Some(9001));
        assert_eq!(config.ports.port_for(Protocol::Freedom), None);
        assert_eq!(config.ports.port_for(Protocol::Haicom), Some(9003));
        assert_eq!(config.ports.port_for(Protocol::Xexun), None);
        assert_eq!(config.ports.sniff, Some(9000));
        assert_eq!(config.ingest.queue_capacity, 16);
        assert_eq!(config.ingest.sink_timeout(), Duration::from_secs(2));
        assert_eq!(config.webhook, Some("https://example.com/hook".into()));
    }

    #[test]
    fn test_parse_config_partial_keeps_defaults() {
        let text = "listener:\n  idle_timeout_secs: 5\n\nwebhook: null\n";
        let config = parse_config(text).unwrap();
        assert_eq!(config.listener.idle_timeout_secs, 5);
        assert_eq!(config.listener.host, "0.0.0.0");
        assert_eq!(config.ports, PortConfig::default());
        assert!(config.webhook.is_none());
    }

    #[test]
    fn test_parse_config_bad_values() {
        assert!(matches!(
            parse_config("ports:\n  amwell: 70000\n"),
            Err(GpsError::Config(_))
        ));
        assert!(parse_config("listener:\n  idle_timeout_secs: soon\n").is_err());
        assert!(parse_config("ingest:\n  queue_capacity: 0\n").is_err());
        assert!(parse_config("listener\n").is_err());
    }

    #[test]
    fn test_unknown_port_keys_ignored() {
        let config = parse_config("ports:\n  gt06: soon\n  amwell: 9001\n").unwrap();
        assert_eq!(config.ports.amwell, Some(9001));
        assert_eq!(config.ports.freedom, PortConfig::default().freedom);
    }

    #[test]
    fn test_roundtrip() {
        let config = Config {
            listener: ListenerConfig {
                host: "127.0.0.1".into(),
                idle_timeout_secs: 30,
                grace_period_secs: 2,
                max_frame_errors: 8,
            },
            ports: PortConfig {
                sniff: None,
                ..PortConfig::default()
            },
            ingest: IngestConfig {
                queue_capacity: 64,
                send_timeout_ms: 250,
                sink_timeout_ms: 1500,
            },
            webhook: Some("https://example.com".into()),
        };
        let text = serialize_config(&config);
        assert_eq!(parse_config(&text).unwrap(), config);
    }

    #[test]
    fn test_save_and_load_from_path() {
        let dir = std::env::temp_dir().join(format!("gps-config-test-{}", std::process::id()));
        let path = dir.join("config.yaml");
        let config = Config {
            webhook: Some("http://localhost:9/hook".into()),
            ..Config::default()
        };
        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(matches!(
            load_config_from(&dir.join("missing.yaml")),
            Err(GpsError::Config(_))
        ));
    }
}
