use serde::{Deserialize, Serialize};

/// Listener settings for the relay endpoint and the status routes.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub status_routes: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: 8081,
            status_routes: true,
        }
    }
}

/// Where transcoded streams are pushed, and what a routing token may look like.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub token_pattern: Option<String>,
    pub max_token_length: Option<usize>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("rtmps://global-live.mux.com/app"),
            token_pattern: None,
            max_token_length: None,
        }
    }
}

/// Transcoder executable and the values substituted into its argument template.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub program: String,
    pub video_codec: String,
    pub preset: String,
    pub tune: String,
    pub audio_codec: String,
    pub audio_sample_rate: u32,
    pub audio_bitrate: String,
    pub buffer_size: String,
    pub output_format: String,
    pub kill_grace_ms: u64,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: String::from("ffmpeg"),
            video_codec: String::from("libx264"),
            preset: String::from("veryfast"),
            tune: String::from("zerolatency"),
            audio_codec: String::from("aac"),
            audio_sample_rate: 44100,
            audio_bitrate: String::from("64k"),
            buffer_size: String::from("1000"),
            output_format: String::from("flv"),
            kill_grace_ms: 5000,
        }
    }
}

/// Per-session limits and behaviour.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 0 means unlimited.
    pub max_sessions: usize,
    pub frame_queue_capacity: usize,
    pub event_queue_capacity: usize,
    pub max_frame_bytes: usize,
    pub mirror_diagnostics: bool,
    pub close_timeout_ms: u64,
    /// How long a stalled transcoder may hold back connection reads before frames are discarded.
    pub stall_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 0,
            frame_queue_capacity: 32,
            event_queue_capacity: 64,
            max_frame_bytes: 16 * 1024 * 1024,
            mirror_diagnostics: false,
            close_timeout_ms: 2000,
            stall_timeout_ms: 3000,
        }
    }
}
