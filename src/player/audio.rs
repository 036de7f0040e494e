//! Audio engine using symphonia for decoding and cpal for output.
//!
//! Two threads besides the caller's:
//! - a decode thread that reads packets, resamples to the device rate and
//!   pushes chunks into a small bounded channel
//! - the cpal callback, which pulls chunks, applies volume and tracks the
//!   playback position
//!
//! Every seek bumps a generation counter; chunks decoded before the seek
//! carry the old generation and are dropped by the callback.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::{Mutex, RwLock};

use super::decoder::AudioDecoder;
use super::engine::{DrawableHandle, EngineError, EngineResult, EngineState, MediaEngine, TrackKind};
use super::resampler::Resampler;

/// Decoded chunks buffered between the decode thread and the output callback.
const CHUNK_BUFFER: usize = 8;

/// Device name fragments that suggest headphones.
const HEADPHONE_KEYWORDS: [&str; 6] = ["headphone", "headset", "earphone", "airpod", "buds", "earbuds"];

/// State shared between the engine, the decode thread and the output callback.
#[derive(Debug)]
struct OutputState {
    status: EngineState,
    position: Duration,
    duration: Duration,
    /// Linear gain, 1.0 = unity
    volume: f32,
    /// Bumped on every load/seek/stop
    generation: u64,
    /// Decoder has delivered its last chunk
    eof: bool,
    underruns: u32,
}

impl Default for OutputState {
    fn default() -> Self {
        Self {
            status: EngineState::Idle,
            position: Duration::ZERO,
            duration: Duration::ZERO,
            volume: 1.0,
            generation: 0,
            eof: false,
            underruns: 0,
        }
    }
}

/// A chunk of interleaved samples at the device rate and channel count.
struct AudioChunk {
    samples: Vec<f32>,
    timestamp: Duration,
    generation: u64,
}

/// Decoder plus the conversion needed to feed the device.
struct LoadedMedia {
    decoder: AudioDecoder,
    resampler: Resampler,
    tracks: Vec<TrackKind>,
}

/// Audio-only playback engine.
pub struct SymphoniaEngine {
    state: Arc<RwLock<OutputState>>,
    media: Arc<Mutex<Option<LoadedMedia>>>,
    running: Arc<AtomicBool>,
    decode_thread: Option<JoinHandle<()>>,
    output_rate: u32,
    video_output: Option<DrawableHandle>,
    _stream: Stream,
}

impl SymphoniaEngine {
    /// Open the output device and start the decode thread.
    ///
    /// `preferred_device` picks a device by (case-insensitive) name; when empty
    /// or absent, headphones are preferred over the system default.
    pub fn new(preferred_device: &str) -> EngineResult<Self> {
        let host = cpal::default_host();
        let device = select_device(&host, preferred_device)?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        tracing::info!("Using audio device: {}", device_name);

        let supported_config = device
            .default_output_config()
            .map_err(|e| EngineError::Init(e.to_string()))?;

        let output_rate = supported_config.sample_rate().0;
        let output_channels = supported_config.channels();
        tracing::info!("Audio format: {}Hz, {} channels", output_rate, output_channels);

        let config = StreamConfig {
            channels: output_channels,
            sample_rate: supported_config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let state = Arc::new(RwLock::new(OutputState::default()));
        let media = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let (chunk_tx, chunk_rx) = bounded::<AudioChunk>(CHUNK_BUFFER);

        let stream = match supported_config.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, chunk_rx, Arc::clone(&state)),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, chunk_rx, Arc::clone(&state)),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, chunk_rx, Arc::clone(&state)),
            format => {
                return Err(EngineError::Init(format!(
                    "Unsupported sample format: {:?}",
                    format
                )));
            }
        }
        .map_err(|e| EngineError::Init(e.to_string()))?;

        stream.play().map_err(|e| EngineError::Init(e.to_string()))?;

        let decode_thread = {
            let state = Arc::clone(&state);
            let media = Arc::clone(&media);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("audio-decoder".to_string())
                .spawn(move || {
                    decode_thread_main(state, media, chunk_tx, running, output_channels as usize)
                })
                .map_err(|e| EngineError::Init(e.to_string()))?
        };

        Ok(Self {
            state,
            media,
            running,
            decode_thread: Some(decode_thread),
            output_rate,
            video_output: None,
            _stream: stream,
        })
    }

    /// Start a new generation: pending chunks become stale.
    fn restart_stream_at(&self, position: Duration) {
        let mut s = self.state.write();
        s.generation += 1;
        s.position = position;
        s.eof = false;
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.decode_thread.take()
            && handle.join().is_err()
        {
            tracing::error!("Audio decode thread panicked");
        }
    }
}

impl MediaEngine for SymphoniaEngine {
    fn load(&mut self, path: &Path) -> EngineResult<()> {
        let decoder = AudioDecoder::open(path)?;
        let resampler = Resampler::new(decoder.sample_rate(), self.output_rate, decoder.channels());
        let tracks = decoder.tracks().to_vec();
        let duration = decoder.duration();

        tracing::debug!(
            "Loaded {:?}: {}Hz, {} channels, {:?}",
            path,
            decoder.sample_rate(),
            decoder.channels(),
            duration
        );

        *self.media.lock() = Some(LoadedMedia {
            decoder,
            resampler,
            tracks,
        });

        self.restart_stream_at(Duration::ZERO);
        let mut s = self.state.write();
        s.status = EngineState::Idle;
        s.duration = duration;
        Ok(())
    }

    fn play(&mut self) -> EngineResult<()> {
        if self.media.lock().is_none() {
            return Err(EngineError::NoMedia);
        }
        self.state.write().status = EngineState::Playing;
        Ok(())
    }

    fn pause(&mut self) -> EngineResult<()> {
        let mut s = self.state.write();
        if s.status == EngineState::Playing {
            s.status = EngineState::Paused;
        }
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        if let Some(loaded) = self.media.lock().as_mut() {
            loaded.decoder.seek(Duration::ZERO)?;
            loaded.resampler.reset();
        }
        self.restart_stream_at(Duration::ZERO);
        self.state.write().status = EngineState::Stopped;
        Ok(())
    }

    fn time_ms(&self) -> u64 {
        self.state.read().position.as_millis() as u64
    }

    fn set_time_ms(&mut self, ms: u64) -> EngineResult<()> {
        let target = Duration::from_millis(ms).min(self.state.read().duration);
        {
            let mut media = self.media.lock();
            let loaded = media.as_mut().ok_or(EngineError::NoMedia)?;
            loaded.decoder.seek(target)?;
            loaded.resampler.reset();
        }
        self.restart_stream_at(target);

        let mut s = self.state.write();
        if s.status == EngineState::Ended {
            s.status = EngineState::Paused;
        }
        Ok(())
    }

    fn length_ms(&self) -> u64 {
        self.state.read().duration.as_millis() as u64
    }

    fn set_position(&mut self, fraction: f32) -> EngineResult<()> {
        let duration = self.state.read().duration;
        let target = duration.mul_f64(fraction.clamp(0.0, 1.0) as f64);
        self.set_time_ms(target.as_millis() as u64)
    }

    fn state(&self) -> EngineState {
        self.state.read().status
    }

    fn is_seekable(&self) -> bool {
        self.media.lock().is_some() && !self.state.read().duration.is_zero()
    }

    fn tracks(&self) -> Vec<TrackKind> {
        self.media
            .lock()
            .as_ref()
            .map(|loaded| loaded.tracks.clone())
            .unwrap_or_default()
    }

    fn set_volume(&mut self, volume: u32) -> EngineResult<()> {
        self.state.write().volume = volume.min(super::mixer::MAX_VOLUME) as f32 / 100.0;
        Ok(())
    }

    fn set_video_output(&mut self, handle: Option<DrawableHandle>) -> EngineResult<()> {
        if handle.is_some() {
            tracing::debug!("Audio-only engine, video output {:?} kept but unused", handle);
        }
        self.video_output = handle;
        Ok(())
    }

    fn release(&mut self) {
        self.shutdown();
        *self.media.lock() = None;
        let mut s = self.state.write();
        if s.underruns > 0 {
            tracing::debug!("Audio output had {} underruns", s.underruns);
        }
        s.status = EngineState::Idle;
    }
}

impl Drop for SymphoniaEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pick the output device: by name, then headphones, then the default.
fn select_device(host: &cpal::Host, preferred: &str) -> EngineResult<Device> {
    let devices: Vec<Device> = host
        .output_devices()
        .map_err(|e| EngineError::Init(e.to_string()))?
        .collect();

    for device in &devices {
        if let Ok(name) = device.name() {
            tracing::debug!("Available audio device: {}", name);
        }
    }

    let preferred = preferred.trim().to_lowercase();
    if !preferred.is_empty() {
        if let Some(device) = devices
            .iter()
            .find(|d| d.name().is_ok_and(|n| n.to_lowercase() == preferred))
        {
            return Ok(device.clone());
        }
        tracing::warn!("Audio device {:?} not found, falling back", preferred);
    }

    if let Some(device) = devices.iter().find(|d| {
        d.name().is_ok_and(|n| {
            let n = n.to_lowercase();
            HEADPHONE_KEYWORDS.iter().any(|k| n.contains(k))
        })
    }) {
        tracing::info!("Selected headphones");
        return Ok(device.clone());
    }

    host.default_output_device()
        .ok_or_else(|| EngineError::Init("No output device found".to_string()))
}

/// List available audio output devices.
pub fn list_audio_devices() -> Vec<String> {
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// Build the output stream for any supported sample type.
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    chunk_rx: Receiver<AudioChunk>,
    state: Arc<RwLock<OutputState>>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut pending: Option<(AudioChunk, usize)> = None;

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let (playing, volume, generation) = {
                let s = state.read();
                (s.status == EngineState::Playing, s.volume, s.generation)
            };

            if pending.as_ref().is_some_and(|(chunk, _)| chunk.generation != generation) {
                pending = None;
            }

            if !playing {
                data.fill(T::from_sample(0.0f32));
                return;
            }

            let mut written = 0;
            while written < data.len() {
                if pending.is_none() {
                    match chunk_rx.try_recv() {
                        Ok(chunk) if chunk.generation != generation => continue,
                        Ok(chunk) => {
                            state.write().position = chunk.timestamp;
                            pending = Some((chunk, 0));
                        }
                        Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                            let mut s = state.write();
                            if s.eof && s.generation == generation {
                                s.position = s.duration;
                                s.status = EngineState::Ended;
                            } else {
                                s.underruns += 1;
                            }
                            data[written..].fill(T::from_sample(0.0f32));
                            return;
                        }
                    }
                }

                let mut exhausted = false;
                if let Some((chunk, offset)) = pending.as_mut() {
                    let count = (chunk.samples.len() - *offset).min(data.len() - written);
                    for (out, sample) in data[written..written + count]
                        .iter_mut()
                        .zip(&chunk.samples[*offset..*offset + count])
                    {
                        *out = T::from_sample((sample * volume).clamp(-1.0, 1.0));
                    }
                    *offset += count;
                    written += count;
                    exhausted = *offset >= chunk.samples.len();
                }
                if exhausted {
                    pending = None;
                }
            }
        },
        |err| {
            tracing::error!("Audio stream error: {}", err);
        },
        None,
    )
}

/// Main loop for the decode thread.
fn decode_thread_main(
    state: Arc<RwLock<OutputState>>,
    media: Arc<Mutex<Option<LoadedMedia>>>,
    chunk_tx: Sender<AudioChunk>,
    running: Arc<AtomicBool>,
    output_channels: usize,
) {
    while running.load(Ordering::Relaxed) {
        let (status, generation, eof) = {
            let s = state.read();
            (s.status, s.generation, s.eof)
        };

        if status != EngineState::Playing || eof {
            thread::sleep(Duration::from_millis(10));
            continue;
        }

        let decoded = media
            .lock()
            .as_mut()
            .map(|loaded| next_chunk(loaded, generation, output_channels));
        let Some(decoded) = decoded else {
            thread::sleep(Duration::from_millis(10));
            continue;
        };

        match decoded {
            Ok(Some(chunk)) if chunk.samples.is_empty() => {}
            Ok(Some(chunk)) => {
                if !send_chunk(&chunk_tx, chunk, &state, &running) {
                    return;
                }
            }
            Ok(None) => {
                let mut s = state.write();
                if s.generation == generation {
                    s.eof = true;
                }
            }
            Err(e) => {
                tracing::error!("Decode error: {}", e);
                let mut s = state.write();
                if s.generation == generation {
                    s.status = EngineState::Error;
                }
            }
        }
    }
}

/// Decode one packet into a device-ready chunk. `Ok(None)` at end of stream,
/// after the resampler's tail has been delivered.
fn next_chunk(
    loaded: &mut LoadedMedia,
    generation: u64,
    output_channels: usize,
) -> EngineResult<Option<AudioChunk>> {
    let input_channels = loaded.decoder.channels() as usize;
    let mut samples = Vec::with_capacity(4096);

    let timestamp = match loaded.decoder.decode_next(|s| samples.extend_from_slice(s))? {
        Some(frame) => {
            samples = loaded.resampler.process(&samples);
            frame.timestamp
        }
        None => {
            samples = loaded.resampler.flush();
            if samples.is_empty() {
                return Ok(None);
            }
            loaded.decoder.duration()
        }
    };

    Ok(Some(AudioChunk {
        samples: remap_channels(&samples, input_channels, output_channels),
        timestamp,
        generation,
    }))
}

/// Send a chunk, giving up when the engine shuts down or seeks away.
/// Returns false once the output side is gone.
fn send_chunk(
    chunk_tx: &Sender<AudioChunk>,
    mut chunk: AudioChunk,
    state: &RwLock<OutputState>,
    running: &AtomicBool,
) -> bool {
    loop {
        match chunk_tx.send_timeout(chunk, Duration::from_millis(50)) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if !running.load(Ordering::Relaxed)
                    || state.read().generation != returned.generation
                {
                    return true;
                }
                chunk = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// Map interleaved frames from `from` channels to `to` channels.
///
/// Downmixing to mono averages; otherwise extra output channels repeat the
/// last input channel and surplus input channels are dropped.
fn remap_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let frames = samples.chunks_exact(from);
    if to == 1 {
        return frames
            .map(|frame| frame.iter().sum::<f32>() / from as f32)
            .collect();
    }

    let mut output = Vec::with_capacity(samples.len() / from * to);
    for frame in frames {
        for channel in 0..to {
            output.push(frame[channel.min(from - 1)]);
        }
    }
    output
}
