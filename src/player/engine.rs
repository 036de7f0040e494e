//! Playback engine contract.
//!
//! The worker thread is the only caller of a [`MediaEngine`]. The engine is
//! created on that thread from a `Send` factory, so implementations are free
//! to hold thread-bound resources such as an audio output stream.

use std::path::{Path, PathBuf};

/// Result type for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Opaque platform surface handle for video output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawableHandle(pub u64);

/// State reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    Playing,
    Paused,
    Stopped,
    /// End of stream reached
    Ended,
    Error,
}

/// Kind of an elementary stream in the loaded media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
    Subtitle,
}

/// Operations the player needs from a playback engine.
pub trait MediaEngine {
    /// Load media from a path, replacing anything previously loaded.
    fn load(&mut self, path: &Path) -> EngineResult<()>;

    fn play(&mut self) -> EngineResult<()>;

    fn pause(&mut self) -> EngineResult<()>;

    /// Stop playback and rewind; the media stays loaded.
    fn stop(&mut self) -> EngineResult<()>;

    /// Current time in milliseconds.
    fn time_ms(&self) -> u64;

    fn set_time_ms(&mut self, ms: u64) -> EngineResult<()>;

    /// Media length in milliseconds (0 when unknown).
    fn length_ms(&self) -> u64;

    /// Seek to a normalized position (0.0 - 1.0).
    fn set_position(&mut self, fraction: f32) -> EngineResult<()>;

    fn state(&self) -> EngineState;

    fn is_seekable(&self) -> bool;

    /// Streams in the loaded media.
    fn tracks(&self) -> Vec<TrackKind>;

    /// Output volume on the 0 - 200 scale, 100 being unity.
    fn set_volume(&mut self, volume: u32) -> EngineResult<()>;

    fn set_video_output(&mut self, handle: Option<DrawableHandle>) -> EngineResult<()>;

    /// Free engine resources. No other call is made afterwards.
    fn release(&mut self);
}

/// Engine errors. None of these are fatal to the player.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("Engine initialization failed: {0}")]
    Init(String),

    #[error("Failed to open {path}: {reason}")]
    Open { path: PathBuf, reason: String },

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Unsupported media format: {0}")]
    UnsupportedFormat(String),

    #[error("No media loaded")]
    NoMedia,

    #[error("Audio output error: {0}")]
    Output(String),
}

impl EngineError {
    /// Create an open error.
    pub fn open(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Open {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_names_file() {
        let err = EngineError::open("/music/missing.flac", "no such file");
        let msg = err.to_string();
        assert!(msg.contains("missing.flac"));
        assert!(msg.contains("no such file"));
    }
}
