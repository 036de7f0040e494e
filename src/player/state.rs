//! Player state machine, command and event types.

use std::fmt;
use std::path::PathBuf;

use super::engine::DrawableHandle;

/// Lifecycle state of the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    NoMedia,
    Loading,
    Playing,
    Paused,
    Stopped,
    Finished,
    Error,
}

impl PlayerState {
    /// Whether `play` is a defined transition from this state.
    pub fn can_play(self) -> bool {
        matches!(self, Self::Paused | Self::Stopped | Self::Finished)
    }

    /// Whether `stop` is a defined transition from this state.
    pub fn can_stop(self) -> bool {
        matches!(self, Self::Playing | Self::Paused)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NoMedia => "no media",
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Finished => "finished",
            Self::Error => "error",
        };
        f.write_str(label)
    }
}

/// Cached view of the worker, readable from any thread.
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub state: PlayerState,
    /// File currently loaded (cleared on stop)
    pub current_media_path: Option<PathBuf>,
    /// Last polled position in milliseconds
    pub position_ms: u64,
    /// Length of the loaded media in milliseconds
    pub duration_ms: u64,
    /// Signal gain in decibels
    pub gain_db: f64,
    /// Monitor volume (0 - 100)
    pub volume_percent: f64,
    /// Whether the loaded media carries a video track
    pub has_video: bool,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            state: PlayerState::NoMedia,
            current_media_path: None,
            position_ms: 0,
            duration_ms: 0,
            gain_db: 0.0,
            volume_percent: 100.0,
            has_video: false,
        }
    }
}

impl PlayerSnapshot {
    /// Position as a fraction (0.0 - 1.0).
    pub fn position_fraction(&self) -> f32 {
        if self.duration_ms == 0 {
            0.0
        } else {
            (self.position_ms as f64 / self.duration_ms as f64).clamp(0.0, 1.0) as f32
        }
    }
}

/// Commands consumed by the worker thread, in enqueue order.
#[derive(Debug, Clone)]
pub enum PlayerCommand {
    /// Load a file and park it paused
    Load(PathBuf),
    /// Start/resume playback
    Play,
    /// Pause playback
    Pause,
    /// Stop playback and forget the current file
    Stop,
    /// Seek to a normalized position (0.0 - 1.0)
    SetPosition(f32),
    /// Seek relative to the current time
    SeekBy(i64),
    /// Set signal gain in decibels
    SetGainDb(f64),
    /// Set monitor volume (0 - 100)
    SetVolumePercent(f64),
    /// Bind the video output surface
    SetDrawable(DrawableHandle),
    /// Free the engine and end the worker
    Release,
}

/// What the loaded media turned out to contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub has_video: bool,
    pub duration_ms: u64,
}

/// Notifications published by the worker for the caller to drain on its own thread.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlayerState),
    TimeChanged { current_ms: u64, total_ms: u64 },
    MediaParsed(MediaInfo),
}

/// Format milliseconds as MM:SS or HH:MM:SS.
pub fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}
