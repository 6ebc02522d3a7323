//! Playback engine seam.
//!
//! ```text
//!   PlaybackController
//!         │ owns
//!         ├── Box<dyn AudioOutput>     the single output (plays URLs natively if it can)
//!         ├── Box<dyn EngineFactory>   builds the tuned HLS engine when it can't
//!         └── Option<Box<dyn PlaybackEngine>>   at most one live instance
//! ```
//!
//! Engines report back asynchronously through [`EngineEvent`]s stamped with
//! the generation they were created with, so events from a torn-down engine
//! can be recognised and dropped.

use std::time::Duration;

use serde::Serialize;

/// MIME type of an HLS manifest.
pub const HLS_MIME: &str = "application/vnd.apple.mpegurl";

pub type EngineGeneration = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Network,
    Media,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    /// Manifest parsed; playback can start.
    Ready,
    Error {
        fatal: bool,
        kind: ErrorKind,
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub generation: EngineGeneration,
    pub signal: EngineSignal,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("playback engine is gone")]
    Closed,
    #[error("retry budget of {0} exhausted")]
    RetriesExhausted(u32),
    #[error("engine command failed: {0}")]
    Command(String),
}

/// The single audio output.
pub trait AudioOutput: Send {
    /// Whether the output can play this container/codec without an engine.
    fn can_play_type(&self, mime: &str) -> bool;
    fn set_source(&mut self, url: &str) -> Result<(), EngineError>;
    fn play(&mut self) -> Result<(), EngineError>;
    fn pause(&mut self) -> Result<(), EngineError>;
    fn is_paused(&self) -> bool;
    /// 0-100.
    fn set_volume(&mut self, volume: u8) -> Result<(), EngineError>;
    fn set_muted(&mut self, muted: bool) -> Result<(), EngineError>;
}

/// A compatibility engine instance feeding the output.
pub trait PlaybackEngine: Send {
    fn load_source(&mut self, url: &str) -> Result<(), EngineError>;
    /// Reload the manifest after a network failure.
    fn start_load(&mut self) -> Result<(), EngineError>;
    /// Repair the media pipeline in place after a decode failure.
    fn recover_media_error(&mut self) -> Result<(), EngineError>;
    /// Must be safe to call more than once.
    fn destroy(&mut self);
}

pub trait EngineFactory: Send {
    fn is_supported(&self) -> bool;
    fn create(
        &mut self,
        generation: EngineGeneration,
        config: &HlsConfig,
    ) -> Result<Box<dyn PlaybackEngine>, EngineError>;
}

/// Compatibility-engine tuning.  Fixed and biased towards low latency.
#[derive(Debug, Clone, PartialEq)]
pub struct HlsConfig {
    /// Segments behind the live edge to start from.
    pub live_sync_segments: u32,
    /// Segments behind live before the engine jumps forward.
    pub live_max_latency_segments: u32,
    /// Treat the stream as having no end.
    pub live_duration_infinite: bool,
    pub manifest_max_retry: u32,
    pub manifest_timeout: Duration,
    pub level_max_retry: u32,
    pub level_timeout: Duration,
    pub low_latency: bool,
    /// Already-played audio kept buffered.
    pub back_buffer: Duration,
}

impl HlsConfig {
    pub const fn low_latency() -> Self {
        Self {
            live_sync_segments: 3,
            live_max_latency_segments: 10,
            live_duration_infinite: true,
            manifest_max_retry: 6,
            manifest_timeout: Duration::from_secs(10),
            level_max_retry: 6,
            level_timeout: Duration::from_secs(10),
            low_latency: true,
            back_buffer: Duration::from_secs(30),
        }
    }
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self::low_latency()
    }
}

/// Output used when no real player is available: it can play nothing.
#[derive(Debug, Default)]
pub struct NullOutput {
    paused: bool,
}

impl AudioOutput for NullOutput {
    fn can_play_type(&self, _mime: &str) -> bool {
        false
    }

    fn set_source(&mut self, _url: &str) -> Result<(), EngineError> {
        Err(EngineError::Closed)
    }

    fn play(&mut self) -> Result<(), EngineError> {
        Err(EngineError::Closed)
    }

    fn pause(&mut self) -> Result<(), EngineError> {
        self.paused = true;
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_volume(&mut self, _volume: u8) -> Result<(), EngineError> {
        Ok(())
    }

    fn set_muted(&mut self, _muted: bool) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Factory that never produces an engine.
#[derive(Debug, Default)]
pub struct NoEngine;

impl EngineFactory for NoEngine {
    fn is_supported(&self) -> bool {
        false
    }

    fn create(
        &mut self,
        _generation: EngineGeneration,
        _config: &HlsConfig,
    ) -> Result<Box<dyn PlaybackEngine>, EngineError> {
        Err(EngineError::Closed)
    }
}
