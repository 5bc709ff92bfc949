//! Streaming PCM stages between the decoder and the Opus encoder.
//!
//! Every stage consumes one block of interleaved i16 samples and appends its
//! output, so nothing larger than a decoded packet is held at a time.

pub trait PcmStage: Send {
    /// Consume interleaved `input` and **append** the result to `output`.
    fn process(&mut self, input: &[i16], output: &mut Vec<i16>);
}

/// Maps any source layout onto interleaved stereo: mono is duplicated, extra
/// channels beyond the first two are dropped.
pub struct ChannelMapper {
    source_channels: usize,
}

impl ChannelMapper {
    pub fn new(source_channels: usize) -> Self {
        Self {
            source_channels: source_channels.max(1),
        }
    }
}

impl PcmStage for ChannelMapper {
    fn process(&mut self, input: &[i16], output: &mut Vec<i16>) {
        match self.source_channels {
            1 => {
                output.reserve(input.len() * 2);
                for &s in input {
                    output.push(s);
                    output.push(s);
                }
            }
            2 => output.extend_from_slice(input),
            n => {
                for frame in input.chunks_exact(n) {
                    output.push(frame[0]);
                    output.push(frame[1]);
                }
            }
        }
    }
}

/// Fast linear-interpolation resampler.
///
/// Interpolates between the two nearest source samples for every output tick.
/// Not band-limited; good enough for background music and chimes.
pub struct LinearResampler {
    /// Source / target ratio (< 1.0 upsamples, > 1.0 downsamples).
    ratio: f64,
    /// Fractional read head within the current input block.
    index: f64,
    /// Last sample of the previous block (per channel) for cross-block interpolation.
    last_samples: Vec<i16>,
    channels: usize,
}

impl LinearResampler {
    pub fn new(source_rate: u32, target_rate: u32, channels: usize) -> Self {
        Self {
            ratio: source_rate as f64 / target_rate as f64,
            index: 0.0,
            last_samples: vec![0; channels],
            channels,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        (self.ratio - 1.0).abs() < f64::EPSILON
    }
}

impl PcmStage for LinearResampler {
    fn process(&mut self, input: &[i16], output: &mut Vec<i16>) {
        if self.is_passthrough() {
            output.extend_from_slice(input);
            return;
        }

        let num_frames = input.len() / self.channels;
        if num_frames == 0 {
            return;
        }

        while self.index < num_frames as f64 {
            let idx = self.index as usize;
            let fract = self.index.fract();

            for c in 0..self.channels {
                let s1 = if idx == 0 {
                    self.last_samples[c] as f64
                } else {
                    input[(idx - 1) * self.channels + c] as f64
                };
                let s2 = input[idx * self.channels + c] as f64;

                output.push((s1 * (1.0 - fract) + s2 * fract).round() as i16);
            }

            self.index += self.ratio;
        }

        self.index -= num_frames as f64;

        for c in 0..self.channels {
            self.last_samples[c] = input[(num_frames - 1) * self.channels + c];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_is_duplicated() {
        let mut out = Vec::new();
        ChannelMapper::new(1).process(&[1, -2, 3], &mut out);
        assert_eq!(out, vec![1, 1, -2, -2, 3, 3]);
    }

    #[test]
    fn surround_keeps_front_pair() {
        let mut out = Vec::new();
        ChannelMapper::new(6).process(&[1, 2, 9, 9, 9, 9, 3, 4, 9, 9, 9, 9], &mut out);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn upsampling_output_length_tracks_ratio() {
        let mut resampler = LinearResampler::new(44_100, 48_000, 2);
        let block = vec![100i16; 441 * 2];
        let mut out = Vec::new();
        for _ in 0..100 {
            resampler.process(&block, &mut out);
        }
        // one second in, one second out
        let frames = out.len() / 2;
        assert!((47_998..=48_002).contains(&frames), "got {frames}");
    }

    #[test]
    fn downsampling_halves_length() {
        let mut resampler = LinearResampler::new(96_000, 48_000, 1);
        let mut out = Vec::new();
        resampler.process(&vec![5i16; 9_600], &mut out);
        assert_eq!(out.len(), 4_800);
    }

    #[test]
    fn constant_signal_stays_constant_after_warmup() {
        let mut resampler = LinearResampler::new(22_050, 48_000, 1);
        let mut out = Vec::new();
        resampler.process(&vec![1_000i16; 2_205], &mut out);
        assert!(out[3..].iter().all(|&s| s == 1_000));
    }

    #[test]
    fn same_rate_is_passthrough() {
        let mut resampler = LinearResampler::new(48_000, 48_000, 2);
        assert!(resampler.is_passthrough());
        let mut out = Vec::new();
        resampler.process(&[1, 2, 3, 4], &mut out);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }
}
