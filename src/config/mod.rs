//! Configuration management for rtc-relay

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Video codec that local descriptions can be rewritten to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    VP8,
    VP9,
    AV1,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::VP8 => "vp8",
            VideoCodec::VP9 => "vp9",
            VideoCodec::AV1 => "av1",
        }
    }

    /// Encoding name as it appears in `a=rtpmap` lines
    pub fn encoding_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::VP8 => "VP8",
            VideoCodec::VP9 => "VP9",
            VideoCodec::AV1 => "AV1",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "h264" => Some(VideoCodec::H264),
            "vp8" => Some(VideoCodec::VP8),
            "vp9" => Some(VideoCodec::VP9),
            "av1" => Some(VideoCodec::AV1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Signaling endpoint configuration
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Liveness probing
    #[serde(default)]
    pub liveness: LivenessConfig,

    /// Client-side negotiation defaults
    #[serde(default)]
    pub negotiation: NegotiationConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Listen port
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// WebSocket endpoint path
    #[serde(default = "default_signaling_path")]
    pub path: String,

    /// Frames buffered per endpoint before it is treated as not writable
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    /// Largest accepted inbound message in bytes
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            path: default_signaling_path(),
            outbound_queue: default_outbound_queue(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Seconds between liveness sweeps; an endpoint missing two probes is evicted
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NegotiationConfig {
    /// Codec moved to the front of local descriptions (none = leave untouched)
    #[serde(default)]
    pub preferred_codec: Option<VideoCodec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log file path
    pub logfile: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            signaling: SignalingConfig::default(),
            liveness: LivenessConfig::default(),
            negotiation: NegotiationConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                logfile: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.server.host.trim().is_empty() {
            return Err("Server host must not be empty".into());
        }

        if !self.signaling.path.starts_with('/') {
            return Err("Signaling path must start with '/'".into());
        }

        if matches!(self.signaling.path.as_str(), "/health" | "/metrics") {
            return Err("Signaling path collides with a built-in endpoint".into());
        }

        if self.signaling.outbound_queue == 0 {
            return Err("Signaling outbound_queue must be non-zero".into());
        }

        if self.signaling.max_message_bytes < 1024 {
            return Err("Signaling max_message_bytes must be at least 1024".into());
        }

        if self.liveness.ping_interval_secs == 0 {
            return Err("Liveness ping interval must be non-zero".into());
        }

        Ok(())
    }

    /// Address the server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.liveness.ping_interval_secs, 10);
        assert_eq!(cfg.signaling.path, "/ws");
        assert_eq!(cfg.bind_addr(), "0.0.0.0:3000");
        // no codec is preferred unless configured
        assert_eq!(cfg.negotiation.preferred_codec, None);
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut cfg = Config::default();
        cfg.liveness.ping_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_reserved_path() {
        let mut cfg = Config::default();
        cfg.signaling.path = "/health".to_string();
        assert!(cfg.validate().is_err());
        cfg.signaling.path = "ws".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 8080

            [negotiation]
            preferred_codec = "av1"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.negotiation.preferred_codec, Some(VideoCodec::AV1));
        assert_eq!(cfg.signaling.outbound_queue, default_outbound_queue());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let cfg = Config::load(&PathBuf::from("/nonexistent/rtc-relay.toml")).unwrap();
        assert_eq!(cfg.server.port, 3000);
    }

    #[test]
    fn video_codec_parse() {
        assert_eq!(VideoCodec::parse("VP9"), Some(VideoCodec::VP9));
        assert_eq!(VideoCodec::parse("theora"), None);
    }
}

fn default_signaling_path() -> String {
    "/ws".to_string()
}

fn default_outbound_queue() -> usize {
    64
}

fn default_max_message_bytes() -> usize {
    64 * 1024
}

fn default_ping_interval_secs() -> u64 {
    10
}
