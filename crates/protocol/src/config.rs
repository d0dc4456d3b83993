use std::path::Path;

use serde::{Deserialize, Serialize};

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_event_path() -> String {
    "/api/v1/ws".to_string()
}

fn default_video_ingest_path() -> String {
    "/api/v1/ws/video".to_string()
}

fn default_signaling_path() -> String {
    "/api/v1/ws/webrtc/peer".to_string()
}

fn default_http_port() -> u16 {
    8999
}

fn default_log_dir() -> String {
    "./run_logs".to_string()
}

fn default_video_dir() -> String {
    "./run_logs/video".to_string()
}

fn default_prompt_timeout() -> f64 {
    60.0
}

fn default_ingest_connect_attempts() -> u32 {
    10
}

fn default_ingest_retry_delay_ms() -> u64 {
    500
}

/// Top-level CLI configuration, loaded once at startup from an optional TOML
/// file and never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            video: VideoConfig::default(),
            log: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub hostname: String,
    pub event_path: String,
    pub video_ingest_path: String,
    pub signaling_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            event_path: default_event_path(),
            video_ingest_path: default_video_ingest_path(),
            signaling_path: default_signaling_path(),
        }
    }
}

impl ServerConfig {
    pub fn event_ws_url(&self) -> String {
        format!("ws://{}{}", self.hostname, self.event_path)
    }

    pub fn video_ingest_ws_url(&self) -> String {
        format!("ws://{}{}", self.hostname, self.video_ingest_path)
    }

    pub fn signaling_ws_url(&self) -> String {
        format!("ws://{}{}", self.hostname, self.signaling_path)
    }

    pub fn base_http_url(&self) -> String {
        format!("http://{}", self.hostname)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_video_dir")]
    pub capture_dir: String,
    #[serde(default = "default_ingest_connect_attempts")]
    pub ingest_connect_attempts: u32,
    #[serde(default = "default_ingest_retry_delay_ms")]
    pub ingest_retry_delay_ms: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            capture_dir: default_video_dir(),
            ingest_connect_attempts: default_ingest_connect_attempts(),
            ingest_retry_delay_ms: default_ingest_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    #[serde(default = "default_log_dir")]
    pub output_dir: String,
    #[serde(default = "default_prompt_timeout")]
    pub default_prompt_timeout: f64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            output_dir: default_log_dir(),
            default_prompt_timeout: default_prompt_timeout(),
        }
    }
}

/// Load configuration from `path`. A missing file is not an error: defaults
/// are used and a warning is logged by the caller. A present-but-malformed
/// file is a `Configuration` error.
pub fn load_config(path: &Path) -> anyhow::Result<CliConfig> {
    use anyhow::Context;

    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(CliConfig::default());
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: CliConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    tracing::info!(path = %path.display(), "loaded configuration");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config: CliConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.hostname, "localhost");
        assert_eq!(config.video.http_port, 8999);
        assert_eq!(config.video.ingest_connect_attempts, 10);
        assert_eq!(config.video.ingest_retry_delay_ms, 500);
        assert_eq!(config.log.default_prompt_timeout, 60.0);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/path/cli.toml")).unwrap();
        assert_eq!(config.server.hostname, "localhost");
    }

    #[test]
    fn partial_file_only_overrides_given_fields() {
        let config: CliConfig = toml::from_str(
            r#"
            [server]
            hostname = "backend.example.com"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.hostname, "backend.example.com");
        assert_eq!(config.server.event_path, "/api/v1/ws");
        assert_eq!(config.video.http_port, 8999);
    }

    #[test]
    fn event_ws_url_is_built_from_hostname() {
        let config = CliConfig::default();
        assert_eq!(config.server.event_ws_url(), "ws://localhost/api/v1/ws");
    }
}
