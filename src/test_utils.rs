//! Test utilities and fixtures for playdeck tests.
//!
//! The centerpiece is [`FakeEngine`], a scripted [`MediaEngine`] whose state
//! lives behind a [`FakeHandle`] that tests keep to inspect and drive it
//! while the worker thread owns the engine itself.
//!
//! # Example
//!
//! ```ignore
//! let handle = FakeHandle::with_length(20_000);
//! let player = spawn_fake(&handle, Arc::new(store), test_options());
//! player.load(&media)?;
//! handle.finish(); // simulate end of stream
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use crate::player::{
    DrawableHandle, EngineError, EngineResult, EngineState, MediaEngine, Player, PlayerEvent,
    PlayerOptions, PlayerState, TrackKind,
};
use crate::resume::{PositionStore, STATE_FILE_NAME};

/// How long helpers wait before giving up.
const TIMEOUT: Duration = Duration::from_secs(2);

/// Observable state of a [`FakeEngine`].
#[derive(Debug)]
pub struct FakeMedia {
    pub state: EngineState,
    pub loaded: Option<PathBuf>,
    pub time_ms: u64,
    /// Length reported for whatever gets loaded
    pub length_ms: u64,
    pub seekable: bool,
    pub tracks: Vec<TrackKind>,
    /// Last volume accepted
    pub volume: Option<u32>,
    pub video_output: Option<DrawableHandle>,
    pub released: bool,
    /// Make `set_volume` fail
    pub fail_volume: bool,
    /// Make `load` fail
    pub fail_load: bool,
    /// Transport calls in order ("play", "pause", "stop", "set_time N", "load")
    pub calls: Vec<String>,
}

impl Default for FakeMedia {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
            loaded: None,
            time_ms: 0,
            length_ms: 0,
            seekable: true,
            tracks: vec![TrackKind::Audio],
            volume: None,
            video_output: None,
            released: false,
            fail_volume: false,
            fail_load: false,
            calls: Vec::new(),
        }
    }
}

/// Shared handle to a [`FakeEngine`]'s state.
#[derive(Debug, Clone, Default)]
pub struct FakeHandle(Arc<Mutex<FakeMedia>>);

impl FakeHandle {
    /// A handle whose media will report `length_ms`.
    pub fn with_length(length_ms: u64) -> Self {
        let handle = Self::default();
        handle.with(|m| m.length_ms = length_ms);
        handle
    }

    /// Create an engine bound to this handle.
    pub fn engine(&self) -> FakeEngine {
        FakeEngine {
            media: self.clone(),
        }
    }

    /// Inspect or modify the fake's state.
    pub fn with<R>(&self, f: impl FnOnce(&mut FakeMedia) -> R) -> R {
        f(&mut self.0.lock())
    }

    /// Jump to the end and signal end of stream.
    pub fn finish(&self) {
        self.with(|m| {
            m.time_ms = m.length_ms;
            m.state = EngineState::Ended;
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|m| m.calls.clone())
    }

    pub fn clear_calls(&self) {
        self.with(|m| m.calls.clear());
    }
}

/// Scripted engine for driving the worker in tests.
pub struct FakeEngine {
    media: FakeHandle,
}

impl MediaEngine for FakeEngine {
    fn load(&mut self, path: &Path) -> EngineResult<()> {
        self.media.with(|m| {
            m.calls.push("load".to_string());
            if m.fail_load {
                return Err(EngineError::UnsupportedFormat(path.display().to_string()));
            }
            m.loaded = Some(path.to_path_buf());
            m.time_ms = 0;
            m.state = EngineState::Idle;
            Ok(())
        })
    }

    fn play(&mut self) -> EngineResult<()> {
        self.media.with(|m| {
            m.calls.push("play".to_string());
            if m.loaded.is_none() {
                return Err(EngineError::NoMedia);
            }
            m.state = EngineState::Playing;
            Ok(())
        })
    }

    fn pause(&mut self) -> EngineResult<()> {
        self.media.with(|m| {
            m.calls.push("pause".to_string());
            if m.state == EngineState::Playing {
                m.state = EngineState::Paused;
            }
            Ok(())
        })
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.media.with(|m| {
            m.calls.push("stop".to_string());
            m.state = EngineState::Stopped;
            m.time_ms = 0;
            Ok(())
        })
    }

    fn time_ms(&self) -> u64 {
        self.media.with(|m| m.time_ms)
    }

    fn set_time_ms(&mut self, ms: u64) -> EngineResult<()> {
        self.media.with(|m| {
            m.calls.push(format!("set_time {}", ms));
            m.time_ms = ms.min(m.length_ms);
            Ok(())
        })
    }

    fn length_ms(&self) -> u64 {
        self.media.with(|m| if m.loaded.is_some() { m.length_ms } else { 0 })
    }

    fn set_position(&mut self, fraction: f32) -> EngineResult<()> {
        self.media.with(|m| {
            m.time_ms = (m.length_ms as f64 * fraction as f64) as u64;
            Ok(())
        })
    }

    fn state(&self) -> EngineState {
        self.media.with(|m| m.state)
    }

    fn is_seekable(&self) -> bool {
        self.media.with(|m| m.loaded.is_some() && m.seekable)
    }

    fn tracks(&self) -> Vec<TrackKind> {
        self.media.with(|m| m.tracks.clone())
    }

    fn set_volume(&mut self, volume: u32) -> EngineResult<()> {
        self.media.with(|m| {
            if m.fail_volume {
                return Err(EngineError::Output("mixer unavailable".to_string()));
            }
            m.volume = Some(volume);
            Ok(())
        })
    }

    fn set_video_output(&mut self, handle: Option<DrawableHandle>) -> EngineResult<()> {
        self.media.with(|m| m.video_output = handle);
        Ok(())
    }

    fn release(&mut self) {
        self.media.with(|m| {
            m.released = true;
            m.loaded = None;
        });
    }
}

/// Creates a position store backed by a file in a temporary directory.
///
/// Keep the TempDir alive for the duration of your test.
pub fn temp_store() -> (PositionStore, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let store = PositionStore::open(dir.path().join(STATE_FILE_NAME));
    (store, dir)
}

/// Create an empty media file so existence checks pass.
pub fn touch_media(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"").expect("Failed to create media file");
    path
}

/// Worker options tuned for fast tests.
pub fn test_options() -> PlayerOptions {
    PlayerOptions {
        poll_interval: Duration::from_millis(10),
        load_settle: Duration::ZERO,
        ..PlayerOptions::default()
    }
}

/// Spawn a player around a fake engine bound to `handle`.
pub fn spawn_fake(handle: &FakeHandle, store: Arc<PositionStore>, options: PlayerOptions) -> Player {
    let handle = handle.clone();
    Player::spawn(move || Ok(handle.engine()), store, options).expect("Failed to spawn player")
}

/// Next state notification, skipping other events.
pub fn next_state(player: &Player) -> Option<PlayerState> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match player.events().recv_timeout(remaining).ok()? {
            PlayerEvent::StateChanged(state) => return Some(state),
            _ => continue,
        }
    }
}

/// State notifications up to and including `target`.
///
/// Panics if `target` does not arrive in time.
pub fn collect_states_until(player: &Player, target: PlayerState) -> Vec<PlayerState> {
    let mut states = Vec::new();
    loop {
        let state = next_state(player)
            .unwrap_or_else(|| panic!("Timed out waiting for {target}, saw {states:?}"));
        states.push(state);
        if state == target {
            return states;
        }
    }
}

/// Poll `condition` until it holds or the timeout passes.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_store_is_empty() {
        let (store, dir) = temp_store();
        assert!(store.entries().is_empty());
        assert!(store.file().unwrap().starts_with(dir.path()));
    }

    #[test]
    fn test_fake_engine_transport() {
        let handle = FakeHandle::with_length(10_000);
        let mut engine = handle.engine();

        assert!(engine.play().is_err());
        engine.load(Path::new("/media/a.mp3")).unwrap();
        engine.play().unwrap();
        engine.set_time_ms(25_000).unwrap();
        assert_eq!(engine.time_ms(), 10_000);

        handle.finish();
        assert_eq!(engine.state(), EngineState::Ended);
        engine.stop().unwrap();
        assert_eq!(engine.time_ms(), 0);
    }

    #[test]
    fn test_touch_media_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch_media(dir.path(), "x.mp4");
        assert!(path.exists());
    }
}
