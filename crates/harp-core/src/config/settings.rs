//! HARP settings
//!
//! One YAML file with a section per subsystem. Every field has a default so
//! a partial file (or none at all) is always valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarpConfig {
    pub client: ClientConfig,
    pub render: RenderConfig,
    pub jobs: JobsConfig,
}

/// Remote model client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// TCP connect timeout for every request
    pub connect_timeout_ms: u64,

    /// Timeout for short requests (controls, upload, cancel, event id)
    pub request_timeout_ms: u64,

    /// Timeout for token validation requests
    pub token_timeout_ms: u64,

    /// Timeout for the Gradio long-poll stream
    ///
    /// Sleeping Hugging Face spaces can take a while to wake up, so this is
    /// generous. Default: 120 s
    pub poll_timeout_ms: u64,

    /// Bytes per upload/download chunk; cancellation is checked between chunks
    pub chunk_size: usize,

    pub huggingface_token: Option<String>,
    pub stability_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            request_timeout_ms: 10_000,
            token_timeout_ms: 5_000,
            poll_timeout_ms: 120_000,
            chunk_size: 8192,
            huggingface_token: None,
            stability_token: None,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_millis(self.token_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Chunk size, never zero
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

/// Playback and preview rendering settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Loop seam crossfade in the editor preview
    pub crossfade_samples: usize,

    /// Fade applied when a preview starts or stops
    pub preview_fade_samples: usize,

    /// Length of the looped window around the click position
    pub preview_window_seconds: f64,

    /// Length of audio copied into the preview buffer
    pub preview_buffer_seconds: f64,

    /// Gain of dimmed regions in the preview
    pub dimmed_gain: f32,

    /// Largest host block pre-allocated for
    pub max_block_size: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            crossfade_samples: crate::looper::DEFAULT_CROSSFADE_SAMPLES,
            preview_fade_samples: 50,
            preview_window_seconds: 1.0,
            preview_buffer_seconds: 4.0,
            dimmed_gain: 0.25,
            max_block_size: crate::types::MAX_BLOCK_SIZE,
        }
    }
}

/// Job scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Queue length of each event subscriber
    pub event_capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { event_capacity: 1024 }
    }
}
