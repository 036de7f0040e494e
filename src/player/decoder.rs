//! Audio decoder using symphonia for multi-format support.
//!
//! Supported formats:
//! - MP3
//! - FLAC
//! - OGG Vorbis
//! - WAV/PCM
//! - AAC (in MP4 container)

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use super::engine::{EngineError, TrackKind};

/// Audio decoder wrapper for symphonia.
pub struct AudioDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    duration: Duration,
    time_base: Option<TimeBase>,
    tracks: Vec<TrackKind>,
}

impl AudioDecoder {
    /// Open a file for decoding.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path).map_err(|e| EngineError::open(path, e))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension() {
            hint.with_extension(&ext.to_string_lossy());
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let metadata_opts = MetadataOptions::default();

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &metadata_opts)
            .map_err(|e| EngineError::UnsupportedFormat(e.to_string()))?;

        let reader = probed.format;

        // Symphonia only demuxes audio, so every decodable track is an audio track
        let tracks = reader
            .tracks()
            .iter()
            .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .map(|_| TrackKind::Audio)
            .collect();

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| EngineError::UnsupportedFormat("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| EngineError::Decode("Unknown sample rate".to_string()))?;
        let channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(2);

        let time_base = codec_params.time_base;
        let duration = match (codec_params.n_frames, time_base) {
            (Some(n_frames), Some(tb)) => to_duration(tb.calc_time(n_frames)),
            // Estimate from sample rate
            (Some(n_frames), None) => Duration::from_secs_f64(n_frames as f64 / sample_rate as f64),
            (None, _) => Duration::ZERO,
        };

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            duration,
            time_base,
            tracks,
        })
    }

    /// Get the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the number of channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Get the total duration (zero when the container does not say).
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Decodable tracks in the container.
    pub fn tracks(&self) -> &[TrackKind] {
        &self.tracks
    }

    /// Seek to an absolute time.
    pub fn seek(&mut self, target: Duration) -> Result<(), EngineError> {
        if self.duration.is_zero() {
            return Ok(());
        }

        let target = target.min(self.duration);
        let seek_to = SeekTo::Time {
            time: Time::from(target.as_secs_f64()),
            track_id: Some(self.track_id),
        };

        self.reader
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| EngineError::Decode(format!("Seek failed: {}", e)))?;

        // Reset decoder state after seeking
        self.decoder.reset();

        Ok(())
    }

    /// Decode the next chunk of audio samples.
    ///
    /// Returns `Ok(None)` at end of stream.
    /// The callback receives interleaved f32 samples.
    pub fn decode_next<F>(&mut self, mut callback: F) -> Result<Option<DecodedFrame>, EngineError>
    where
        F: FnMut(&[f32]),
    {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => return Err(EngineError::Decode(e.to_string())),
            };

            // Skip packets from other tracks
            if packet.track_id() != self.track_id {
                continue;
            }

            let timestamp = self
                .time_base
                .map(|tb| to_duration(tb.calc_time(packet.ts())))
                .unwrap_or(Duration::ZERO);

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(_)) => continue, // Skip bad frame
                Err(e) => return Err(EngineError::Decode(e.to_string())),
            };

            let samples = interleave(&decoded);
            let frame = DecodedFrame {
                samples: samples.len() / self.channels.max(1) as usize,
                timestamp,
            };

            callback(&samples);

            return Ok(Some(frame));
        }
    }
}

fn to_duration(time: Time) -> Duration {
    Duration::from_secs_f64(time.seconds as f64 + time.frac)
}

/// Convert an audio buffer to interleaved f32 samples.
fn interleave(buffer: &AudioBufferRef) -> Vec<f32> {
    fn collect<S: Copy>(
        planes: &[&[S]],
        frames: usize,
        convert: impl Fn(S) -> f32,
    ) -> Vec<f32> {
        let mut output = Vec::with_capacity(frames * planes.len());
        for frame in 0..frames {
            for plane in planes {
                output.push(convert(plane[frame]));
            }
        }
        output
    }

    match buffer {
        AudioBufferRef::F32(buf) => collect(buf.planes().planes(), buf.frames(), |s| s),
        AudioBufferRef::S16(buf) => {
            collect(buf.planes().planes(), buf.frames(), |s| s as f32 / 32768.0)
        }
        AudioBufferRef::S24(buf) => {
            collect(buf.planes().planes(), buf.frames(), |s| s.0 as f32 / 8388608.0)
        }
        AudioBufferRef::S32(buf) => {
            collect(buf.planes().planes(), buf.frames(), |s| s as f32 / 2147483648.0)
        }
        AudioBufferRef::U8(buf) => {
            collect(buf.planes().planes(), buf.frames(), |s| (s as f32 - 128.0) / 128.0)
        }
        _ => Vec::new(),
    }
}

/// Information about a decoded frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Number of samples (per channel) decoded
    pub samples: usize,
    /// Timestamp of this frame
    pub timestamp: Duration,
}
