use clap::Parser;
use std::path::PathBuf;

use rtc_relay::config::{self, VideoCodec};

#[derive(Parser, Debug)]
#[command(name = "rtc-relay")]
#[command(version)]
#[command(about = "WebRTC signaling relay", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/rtc-relay.toml")]
    pub config: PathBuf,

    /// Listen address
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// WebSocket endpoint path
    #[arg(long)]
    pub path: Option<String>,

    /// Seconds between liveness sweeps
    #[arg(long)]
    pub ping_interval: Option<u64>,

    /// Preferred video codec hint (h264, vp8, vp9, av1)
    #[arg(long, value_parser = parse_codec)]
    pub preferred_codec: Option<VideoCodec>,

    /// Verbose logging
    #[arg(short, long, action)]
    pub verbose: bool,
}

impl Args {
    pub fn load_config(&self) -> Result<config::Config, Box<dyn std::error::Error>> {
        config::Config::load(&self.config)
    }

    /// Apply command line overrides on top of the loaded file
    pub fn apply_overrides(&self, config: &mut config::Config) {
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref path) = self.path {
            config.signaling.path = path.clone();
        }
        if let Some(interval) = self.ping_interval {
            config.liveness.ping_interval_secs = interval;
        }
        if self.preferred_codec.is_some() {
            config.negotiation.preferred_codec = self.preferred_codec;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

fn parse_codec(value: &str) -> Result<VideoCodec, String> {
    VideoCodec::parse(value).ok_or_else(|| format!("unknown codec '{}'", value))
}
