use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments of the relay binary.
///
/// Every flag is optional: anything left unset falls back to the configuration file, then to the
/// built-in defaults. `--port` also reads the `PORT` environment variable, which is how the relay
/// has historically been deployed.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "livepush")]
#[command(version)]
#[command(about = "Relays browser media streams to an RTMP ingest through a transcoder")]
pub struct CliArgs {
    /// Path to a TOML configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Address the relay listens on
    #[arg(long)]
    pub bind_address: Option<String>,

    /// Port the relay listens on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Base URL of the upstream ingest endpoint; the stream key is appended to it
    #[arg(long)]
    pub upstream_base: Option<String>,

    /// Transcoder executable
    #[arg(long)]
    pub transcoder: Option<String>,
}

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file where every section and every field is optional,
/// then selectively overridden from the command line (see [`CliArgs`]).
///
/// # Fields Overview
///
/// - `server`: listener address and port, and whether the status routes are served
/// - `upstream`: the fixed ingest base URL that routing tokens are appended to, plus optional
///   token hardening rules
/// - `transcoder`: executable and codec/container values of the transcoder argument template,
///   and the kill grace period
/// - `session`: concurrency limit, queue bounds and per-connection behaviour
///
/// # Examples
///
/// ```
/// use livepush::configuration::config::Config;
///
/// let config = Config::from_toml_str("[server]\nport = 9000\n").unwrap();
/// assert_eq!(config.server.port, 9000);
/// assert_eq!(config.transcoder.program, "ffmpeg");
/// ```
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub transcoder: TranscoderConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Reading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the effective configuration: file (if any), then command-line overrides.
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("No configuration file given, using defaults");
                Config::default()
            }
        };
        config.apply_overrides(args);
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(base) = &args.upstream_base {
            self.upstream.base_url = base.clone();
        }
        if let Some(program) = &args.transcoder {
            self.transcoder.program = program.clone();
        }
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        if self.server.port == 0 {
            return Err(ConfigError::NotInRange(String::from("server.port must not be 0")));
        }
        if self.upstream.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue(String::from("upstream.base_url")));
        }
        if let Some(pattern) = &self.upstream.token_pattern {
            regex::Regex::new(pattern).map_err(|e| ConfigError::BadPattern(e.to_string()))?;
        }
        if self.upstream.max_token_length == Some(0) {
            return Err(ConfigError::NotInRange(String::from(
                "upstream.max_token_length must be at least 1",
            )));
        }
        if self.transcoder.program.trim().is_empty() {
            return Err(ConfigError::EmptyValue(String::from("transcoder.program")));
        }
        if !(8000..=192_000).contains(&self.transcoder.audio_sample_rate) {
            return Err(ConfigError::NotInRange(format!(
                "transcoder.audio_sample_rate {} not in 8000..=192000",
                self.transcoder.audio_sample_rate
            )));
        }
        if self.session.frame_queue_capacity == 0 || self.session.event_queue_capacity == 0 {
            return Err(ConfigError::NotInRange(String::from(
                "session queue capacities must be at least 1",
            )));
        }
        if self.session.max_frame_bytes == 0 {
            return Err(ConfigError::NotInRange(String::from(
                "session.max_frame_bytes must be at least 1",
            )));
        }
        Ok(())
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.transcoder.kill_grace_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.session.close_timeout_ms)
    }

    /// Address the relay binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self
            .server
            .bind_address
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::BadIPFormatting(format!("{}: {}", self.server.bind_address, e)))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }
}
