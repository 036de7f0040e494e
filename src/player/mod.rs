//! Playback command/state core.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Player (caller thread)                      │
//! │   Enqueues commands, reads the cached snapshot, drains events   │
//! └───────────────┬─────────────────────────────────▲───────────────┘
//!                 │ PlayerCommand                   │ PlayerEvent
//!                 ▼           crossbeam channels    │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Playback worker (one thread)                  │
//! │  State machine, engine polling, gain mixing, resume positions   │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ MediaEngine trait
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │          SymphoniaEngine (decode thread + cpal output)          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing but the worker touches the engine. Notifications reach the caller
//! only through the event channel, so the caller decides which thread reacts
//! to them.

mod audio;
mod decoder;
mod engine;
mod mixer;
mod resampler;
mod state;
mod worker;

pub use audio::{SymphoniaEngine, list_audio_devices};
pub use engine::{DrawableHandle, EngineError, EngineResult, EngineState, MediaEngine, TrackKind};
pub use mixer::{MAX_VOLUME, UNITY_VOLUME, mix};
pub use state::{MediaInfo, PlayerCommand, PlayerEvent, PlayerSnapshot, PlayerState, format_ms};
pub use worker::PlayerOptions;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::resume::PositionStore;
use worker::Worker;

/// Handle to a running playback worker.
///
/// Every control method only enqueues a command and returns immediately.
/// Dropping the handle releases the engine once queued commands have run.
pub struct Player {
    /// Cached worker state
    shared: Arc<RwLock<PlayerSnapshot>>,
    /// Command sender to the worker thread
    command_tx: Sender<PlayerCommand>,
    /// Notifications from the worker thread
    event_rx: Receiver<PlayerEvent>,
    worker: Option<JoinHandle<()>>,
}

impl Player {
    /// Start a worker thread and create the engine on it.
    ///
    /// Fails if the engine cannot be created.
    pub fn spawn<E, F>(
        factory: F,
        store: Arc<PositionStore>,
        options: PlayerOptions,
    ) -> Result<Self, PlayerError>
    where
        E: MediaEngine + 'static,
        F: FnOnce() -> EngineResult<E> + Send + 'static,
    {
        let shared = Arc::new(RwLock::new(PlayerSnapshot {
            gain_db: options.gain_db,
            volume_percent: options.volume_percent.clamp(0.0, 100.0),
            ..PlayerSnapshot::default()
        }));
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded::<EngineResult<()>>(1);

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("playback-worker".to_string())
            .spawn(move || {
                let engine = match factory() {
                    Ok(engine) => {
                        let _ = ready_tx.send(Ok(()));
                        engine
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                Worker::new(engine, store, worker_shared, event_tx, options).run(command_rx);
            })
            .map_err(|e| PlayerError::Spawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(PlayerError::EngineInit(e));
            }
            Err(_) => return Err(PlayerError::ChannelClosed),
        }

        Ok(Self {
            shared,
            command_tx,
            event_rx,
            worker: Some(worker),
        })
    }

    /// Load a file. The player ends up paused at any saved position.
    pub fn load(&self, path: impl Into<PathBuf>) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Load(path.into()))
    }

    /// Play / resume playback.
    pub fn play(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Play)
    }

    /// Pause playback.
    pub fn pause(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Pause)
    }

    /// Toggle play/pause based on the last known state.
    pub fn toggle_play_pause(&self) -> Result<(), PlayerError> {
        match self.state() {
            PlayerState::Playing => self.pause(),
            PlayerState::Loading => Ok(()),
            _ => self.play(),
        }
    }

    /// Stop playback.
    pub fn stop(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Stop)
    }

    /// Seek to a position (0.0 - 1.0).
    pub fn set_position(&self, fraction: f32) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SetPosition(fraction.clamp(0.0, 1.0)))
    }

    /// Seek forward (positive) or backward (negative) by `delta_ms`.
    pub fn seek_by(&self, delta_ms: i64) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SeekBy(delta_ms))
    }

    /// Set signal gain in decibels.
    pub fn set_gain_db(&self, db: f64) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SetGainDb(db))
    }

    /// Set monitor volume (0 - 100).
    pub fn set_volume_percent(&self, percent: f64) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SetVolumePercent(percent.clamp(0.0, 100.0)))
    }

    /// Bind the video output surface.
    pub fn set_drawable(&self, handle: DrawableHandle) -> Result<(), PlayerError> {
        self.send(PlayerCommand::SetDrawable(handle))
    }

    /// Release the engine after all queued commands have run.
    pub fn release(&self) -> Result<(), PlayerError> {
        self.send(PlayerCommand::Release)
    }

    /// Last published state.
    pub fn state(&self) -> PlayerState {
        self.shared.read().state
    }

    /// File currently loaded, if any.
    pub fn current_media_path(&self) -> Option<PathBuf> {
        self.shared.read().current_media_path.clone()
    }

    /// Get current playback snapshot.
    pub fn snapshot(&self) -> PlayerSnapshot {
        self.shared.read().clone()
    }

    /// Notifications from the worker, for use with `recv`/`select!`.
    pub fn events(&self) -> &Receiver<PlayerEvent> {
        &self.event_rx
    }

    /// Drain pending notifications (non-blocking).
    pub fn drain_events(&self) -> Vec<PlayerEvent> {
        self.event_rx.try_iter().collect()
    }

    /// Block until the worker thread has exited.
    ///
    /// Call after [`release`](Self::release), otherwise this waits forever.
    pub fn wait(mut self) {
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("Playback worker panicked");
        }
    }

    fn send(&self, command: PlayerCommand) -> Result<(), PlayerError> {
        self.command_tx
            .send(command)
            .map_err(|_| PlayerError::ChannelClosed)
    }
}

/// Player errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayerError {
    #[error("Playback engine initialization failed: {0}")]
    EngineInit(EngineError),

    #[error("Failed to start playback worker: {0}")]
    Spawn(String),

    #[error("Playback worker has shut down")]
    ChannelClosed,
}
