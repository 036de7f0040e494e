//! Playback command worker.
//!
//! A single thread owns the engine. It drains the command queue in order and,
//! whenever the queue stays quiet for one poll interval, polls the engine for
//! end of stream and the current time. Everything the caller can observe is
//! written to the shared [`PlayerSnapshot`] and published as [`PlayerEvent`]s.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;

use super::engine::{DrawableHandle, EngineState, MediaEngine, TrackKind};
use super::mixer;
use super::state::{MediaInfo, PlayerCommand, PlayerEvent, PlayerSnapshot, PlayerState};
use crate::config::Config;
use crate::resume::PositionStore;

/// Tunables for the worker.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// How long the worker waits for a command before polling the engine
    pub poll_interval: Duration,
    /// Pause between the priming play and pause on load, and after rewinding a finished file
    pub load_settle: Duration,
    /// Restore positions on load and record them while playing
    pub remember_position: bool,
    /// Initial gain in decibels
    pub gain_db: f64,
    /// Initial monitor volume (0 - 100)
    pub volume_percent: f64,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            load_settle: Duration::from_millis(50),
            remember_position: true,
            gain_db: 0.0,
            volume_percent: 100.0,
        }
    }
}

impl From<&Config> for PlayerOptions {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.playback.poll_interval(),
            load_settle: config.playback.load_settle(),
            remember_position: config.playback.remember_position,
            gain_db: config.audio.gain_db,
            volume_percent: config.audio.volume_percent.clamp(0.0, 100.0),
        }
    }
}

/// State owned by the worker thread.
pub(super) struct Worker<E: MediaEngine> {
    engine: E,
    store: Arc<PositionStore>,
    shared: Arc<RwLock<PlayerSnapshot>>,
    events: Sender<PlayerEvent>,
    options: PlayerOptions,
    state: PlayerState,
    /// File positions are recorded for (cleared on stop)
    current_path: Option<PathBuf>,
    /// File the engine holds, kept across stop so play can restart it
    loaded_path: Option<PathBuf>,
    gain_db: f64,
    volume_percent: f64,
    drawable: Option<DrawableHandle>,
}

impl<E: MediaEngine> Worker<E> {
    pub(super) fn new(
        engine: E,
        store: Arc<PositionStore>,
        shared: Arc<RwLock<PlayerSnapshot>>,
        events: Sender<PlayerEvent>,
        options: PlayerOptions,
    ) -> Self {
        let gain_db = options.gain_db;
        let volume_percent = options.volume_percent.clamp(0.0, 100.0);
        Self {
            engine,
            store,
            shared,
            events,
            options,
            state: PlayerState::NoMedia,
            current_path: None,
            loaded_path: None,
            gain_db,
            volume_percent,
            drawable: None,
        }
    }

    /// Run until `Release` is processed or every handle is gone.
    pub(super) fn run(mut self, commands: Receiver<PlayerCommand>) {
        tracing::debug!("Playback worker started");
        self.apply_volume();

        loop {
            match commands.recv_timeout(self.options.poll_interval) {
                Ok(command) => {
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => self.poll(),
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("Player handle dropped, releasing engine");
                    self.release();
                    break;
                }
            }
        }

        tracing::debug!("Playback worker stopped");
    }

    /// Handle one command, returning whether to keep running.
    fn handle_command(&mut self, command: PlayerCommand) -> bool {
        tracing::debug!(?command, state = %self.state, "Player command");
        match command {
            PlayerCommand::Load(path) => self.load(path),
            PlayerCommand::Play => self.play(),
            PlayerCommand::Pause => self.pause(),
            PlayerCommand::Stop => self.stop(),
            PlayerCommand::SetPosition(fraction) => self.set_position(fraction),
            PlayerCommand::SeekBy(delta_ms) => self.seek_by(delta_ms),
            PlayerCommand::SetGainDb(db) => {
                self.gain_db = if db.is_finite() { db } else { 0.0 };
                let gain_db = self.gain_db;
                self.publish(|s| s.gain_db = gain_db);
                self.apply_volume();
            }
            PlayerCommand::SetVolumePercent(percent) => {
                self.volume_percent = if percent.is_finite() {
                    percent.clamp(0.0, 100.0)
                } else {
                    0.0
                };
                let volume_percent = self.volume_percent;
                self.publish(|s| s.volume_percent = volume_percent);
                self.apply_volume();
            }
            PlayerCommand::SetDrawable(handle) => self.set_drawable(handle),
            PlayerCommand::Release => {
                self.release();
                return false;
            }
        }
        true
    }

    fn load(&mut self, path: PathBuf) {
        // The outgoing file keeps its place
        self.save_position();
        self.transition(PlayerState::Loading);

        if !path.exists() {
            tracing::error!("Cannot load {:?}: file not found", path);
            self.transition(PlayerState::Error);
            return;
        }

        if let Some(handle) = self.drawable
            && let Err(e) = self.engine.set_video_output(Some(handle))
        {
            tracing::warn!("Failed to bind video output: {}", e);
        }

        if let Err(e) = self.engine.load(&path) {
            tracing::error!("Failed to load {:?}: {}", path, e);
            self.current_path = None;
            self.loaded_path = None;
            self.publish(|s| {
                s.current_media_path = None;
                s.has_video = false;
                s.position_ms = 0;
                s.duration_ms = 0;
            });
            self.transition(PlayerState::Error);
            return;
        }

        self.current_path = Some(path.clone());
        self.loaded_path = Some(path.clone());
        let has_video = self.engine.tracks().contains(&TrackKind::Video);

        // Engines only report length and tracks once media has started
        if let Err(e) = self.engine.play() {
            tracing::warn!("Priming play failed: {}", e);
        }
        thread::sleep(self.options.load_settle);
        if let Err(e) = self.engine.pause() {
            tracing::warn!("Priming pause failed: {}", e);
        }

        let duration_ms = self.engine.length_ms();
        self.emit(PlayerEvent::MediaParsed(MediaInfo {
            path: path.clone(),
            has_video,
            duration_ms,
        }));

        if self.options.remember_position
            && let Some(position) = self.store.get_position(&path)
            && position > 0
        {
            match self.engine.set_time_ms(position) {
                Ok(()) => tracing::info!("Restored position {} ms for {:?}", position, path),
                Err(e) => tracing::warn!("Failed to restore position: {}", e),
            }
        }

        self.apply_volume();

        let position_ms = self.engine.time_ms();
        self.publish(|s| {
            s.current_media_path = Some(path);
            s.has_video = has_video;
            s.position_ms = position_ms;
            s.duration_ms = duration_ms;
        });
        self.emit(PlayerEvent::TimeChanged {
            current_ms: position_ms,
            total_ms: duration_ms,
        });
        self.transition(PlayerState::Paused);
    }

    fn play(&mut self) {
        if !self.state.can_play() {
            tracing::debug!("Ignoring play while {}", self.state);
            return;
        }
        let Some(path) = self.loaded_path.clone() else {
            return;
        };

        let restart =
            self.state == PlayerState::Finished || self.engine.state() == EngineState::Ended;
        if restart {
            if let Err(e) = self.engine.stop() {
                tracing::warn!("Failed to stop finished media: {}", e);
            }
            thread::sleep(self.options.load_settle);
        }

        if let Err(e) = self.engine.play() {
            tracing::warn!("Engine refused to play: {}", e);
            return;
        }

        if restart {
            if let Err(e) = self.engine.set_time_ms(0) {
                tracing::warn!("Failed to rewind finished media: {}", e);
            }
            self.publish(|s| s.position_ms = 0);
        }

        if self.current_path.is_none() {
            self.current_path = Some(path.clone());
            self.publish(|s| s.current_media_path = Some(path));
        }
        self.transition(PlayerState::Playing);
    }

    fn pause(&mut self) {
        if self.state != PlayerState::Playing {
            return;
        }
        if let Err(e) = self.engine.pause() {
            tracing::warn!("Engine refused to pause: {}", e);
            return;
        }
        self.transition(PlayerState::Paused);
    }

    fn stop(&mut self) {
        if !self.state.can_stop() {
            return;
        }
        self.save_position();
        if let Err(e) = self.engine.stop() {
            tracing::warn!("Engine refused to stop: {}", e);
            return;
        }
        self.current_path = None;
        self.publish(|s| {
            s.current_media_path = None;
            s.has_video = false;
            s.position_ms = 0;
        });
        self.transition(PlayerState::Stopped);
    }

    fn set_position(&mut self, fraction: f32) {
        if self.loaded_path.is_none() || !fraction.is_finite() {
            return;
        }
        if !self.engine.is_seekable() {
            tracing::debug!("Media is not seekable, ignoring seek");
            return;
        }
        match self.engine.set_position(fraction.clamp(0.0, 1.0)) {
            Ok(()) => self.emit_time(),
            Err(e) => tracing::warn!("Seek failed: {}", e),
        }
    }

    fn seek_by(&mut self, delta_ms: i64) {
        if self.loaded_path.is_none() || !self.engine.is_seekable() {
            return;
        }
        let length = self.engine.length_ms() as i64;
        let target = (self.engine.time_ms() as i64)
            .saturating_add(delta_ms)
            .clamp(0, length.max(0));
        match self.engine.set_time_ms(target as u64) {
            Ok(()) => self.emit_time(),
            Err(e) => tracing::warn!("Seek failed: {}", e),
        }
    }

    fn set_drawable(&mut self, handle: DrawableHandle) {
        self.drawable = Some(handle);
        if let Err(e) = self.engine.set_video_output(Some(handle)) {
            tracing::warn!("Failed to bind video output: {}", e);
        }
    }

    fn release(&mut self) {
        self.save_position();
        self.engine.release();
        self.current_path = None;
        self.loaded_path = None;
        self.publish(|s| {
            s.current_media_path = None;
            s.has_video = false;
        });
        self.transition(PlayerState::NoMedia);
        tracing::info!("Playback engine released");
    }

    /// Idle work: detect end of stream, report time while playing.
    fn poll(&mut self) {
        if self.loaded_path.is_none() {
            return;
        }

        if self.engine.state() == EngineState::Ended && self.state != PlayerState::Finished {
            tracing::info!("Playback finished");
            self.record_finished();
            self.transition(PlayerState::Finished);
        } else if self.state == PlayerState::Playing {
            let current_ms = self.engine.time_ms();
            let total_ms = self.engine.length_ms();
            self.publish(|s| {
                s.position_ms = current_ms;
                s.duration_ms = total_ms;
            });
            self.emit(PlayerEvent::TimeChanged {
                current_ms,
                total_ms,
            });
            self.save_position();
        }
    }

    /// Push the mixed gain/volume to the engine. Failures are not fatal.
    fn apply_volume(&mut self) {
        let volume = mixer::mix(self.gain_db, self.volume_percent);
        match self.engine.set_volume(volume) {
            Ok(()) => tracing::debug!("Output volume {}", volume),
            Err(e) => tracing::warn!("Failed to set output volume {}: {}", volume, e),
        }
    }

    fn save_position(&self) {
        if !self.options.remember_position {
            return;
        }
        let Some(ref path) = self.current_path else {
            return;
        };
        let position = self.engine.time_ms();
        if position > 0 {
            self.store
                .save_position(path, position as i64, self.engine.length_ms() as i64);
        }
    }

    /// Overwrite the stored position with the end so the file is not resumed.
    fn record_finished(&self) {
        if !self.options.remember_position {
            return;
        }
        let Some(ref path) = self.current_path else {
            return;
        };
        let length = self.engine.length_ms() as i64;
        self.store.save_position(path, length, length);
    }

    fn emit_time(&mut self) {
        let current_ms = self.engine.time_ms();
        let total_ms = self.engine.length_ms();
        self.publish(|s| {
            s.position_ms = current_ms;
            s.duration_ms = total_ms;
        });
        self.emit(PlayerEvent::TimeChanged {
            current_ms,
            total_ms,
        });
    }

    fn transition(&mut self, state: PlayerState) {
        if self.state == state {
            return;
        }
        tracing::debug!("Player state {} -> {}", self.state, state);
        self.state = state;
        self.publish(|s| s.state = state);
        self.emit(PlayerEvent::StateChanged(state));
    }

    fn publish(&self, update: impl FnOnce(&mut PlayerSnapshot)) {
        update(&mut self.shared.write());
    }

    fn emit(&self, event: PlayerEvent) {
        // Nobody listening is fine; the snapshot still carries the state
        let _ = self.events.send(event);
    }
}
