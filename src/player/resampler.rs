//! Sample rate conversion using rubato.
//!
//! Files are decoded at their own rate; the output device runs at its own.
//! Without conversion a 44.1kHz file on a 48kHz device plays fast and sharp.

use rubato::{FftFixedIn, Resampler as RubatoResampler};

/// Frames per conversion block. Larger is cheaper but adds latency.
const CHUNK_FRAMES: usize = 1024;

/// Interleaved-sample resampler.
pub struct Resampler {
    resampler: Option<FftFixedIn<f32>>,
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Per-channel input waiting for a full block
    input_buffer: Vec<Vec<f32>>,
}

impl Resampler {
    /// Create a resampler; passes audio through unchanged when the rates match
    /// or rubato rejects the configuration.
    pub fn new(input_rate: u32, output_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1) as usize;

        let resampler = if input_rate == output_rate || input_rate == 0 || output_rate == 0 {
            None
        } else {
            match FftFixedIn::<f32>::new(
                input_rate as usize,
                output_rate as usize,
                CHUNK_FRAMES,
                2,
                channels,
            ) {
                Ok(resampler) => {
                    tracing::info!(
                        "Resampler: {}Hz → {}Hz ({} channels)",
                        input_rate,
                        output_rate,
                        channels
                    );
                    Some(resampler)
                }
                Err(e) => {
                    tracing::warn!("Resampler unavailable, playing at source rate: {}", e);
                    None
                }
            }
        };

        Self {
            resampler,
            input_rate,
            output_rate,
            channels,
            input_buffer: vec![Vec::new(); channels],
        }
    }

    /// Check if resampling is needed.
    pub fn needs_resampling(&self) -> bool {
        self.resampler.is_some()
    }

    /// Output frames per input frame.
    pub fn ratio(&self) -> f64 {
        if self.input_rate == 0 {
            1.0
        } else {
            self.output_rate as f64 / self.input_rate as f64
        }
    }

    /// Process interleaved samples, returning resampled interleaved output.
    ///
    /// Output lags input by up to one block.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return input.to_vec();
        };

        for (i, sample) in input.iter().enumerate() {
            self.input_buffer[i % self.channels].push(*sample);
        }

        let mut output = Vec::new();
        while self.input_buffer[0].len() >= CHUNK_FRAMES {
            let block: Vec<Vec<f32>> = self
                .input_buffer
                .iter_mut()
                .map(|ch| ch.drain(..CHUNK_FRAMES).collect())
                .collect();

            match resampler.process(&block, None) {
                Ok(resampled) => interleave_into(&resampled, usize::MAX, &mut output),
                Err(e) => tracing::warn!("Resampling error: {}", e),
            }
        }

        output
    }

    /// Flush buffered samples at end of stream.
    pub fn flush(&mut self) -> Vec<f32> {
        let ratio = self.ratio();
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };

        let remaining = self.input_buffer[0].len();
        if remaining == 0 {
            return Vec::new();
        }

        let block: Vec<Vec<f32>> = self
            .input_buffer
            .iter_mut()
            .map(|ch| {
                let mut padded = std::mem::take(ch);
                padded.resize(CHUNK_FRAMES, 0.0);
                padded
            })
            .collect();

        let mut output = Vec::new();
        match resampler.process(&block, None) {
            Ok(resampled) => {
                // Only take the non-padded portion
                let expected_frames = (remaining as f64 * ratio).ceil() as usize;
                interleave_into(&resampled, expected_frames, &mut output);
            }
            Err(e) => tracing::warn!("Resampling flush error: {}", e),
        }
        output
    }

    /// Drop buffered input (call after seek).
    pub fn reset(&mut self) {
        for ch in &mut self.input_buffer {
            ch.clear();
        }
        if let Some(ref mut resampler) = self.resampler {
            resampler.reset();
        }
    }
}

fn interleave_into(planes: &[Vec<f32>], max_frames: usize, output: &mut Vec<f32>) {
    let Some(first) = planes.first() else {
        return;
    };
    let frames = first.len().min(max_frames);
    output.reserve(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            output.push(plane[frame]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_resampling_when_rates_match() {
        let resampler = Resampler::new(48000, 48000, 2);
        assert!(!resampler.needs_resampling());
    }

    #[test]
    fn test_resampling_needed_when_rates_differ() {
        let resampler = Resampler::new(44100, 48000, 2);
        assert!(resampler.needs_resampling());
        assert!((resampler.ratio() - 48000.0 / 44100.0).abs() < 0.0001);
    }

    #[test]
    fn test_passthrough_when_no_resampling() {
        let mut resampler = Resampler::new(48000, 48000, 2);
        let input = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(resampler.process(&input), input);
        assert!(resampler.flush().is_empty());
    }

    #[test]
    fn test_upsampling_produces_more_frames() {
        let mut resampler = Resampler::new(44100, 48000, 1);
        let input = vec![0.0f32; CHUNK_FRAMES * 8];
        let mut produced = resampler.process(&input).len();
        produced += resampler.flush().len();
        assert!(produced > CHUNK_FRAMES * 6);
    }
}
