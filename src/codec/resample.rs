//! Channel down-mixing and band-limited resampling
//!
//! Rate conversion goes through rubato's FFT resampler, which low-passes
//! below the lower Nyquist frequency so content above it is removed rather
//! than folded back into the speech band.

use rubato::{FftFixedIn, Resampler};

use crate::error::CodecError;

/// Input frames per resampler pass
pub const RESAMPLER_CHUNK_FRAMES: usize = 1024;

/// Average interleaved channels into a mono signal
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => interleaved.to_vec(),
        n => interleaved
            .chunks_exact(n as usize)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect(),
    }
}

/// Mono resampler fed with blocks of any size.
///
/// Input is collected until a whole resampler chunk is available, so the
/// output does not depend on how the device happened to split its
/// callbacks. Matching rates pass samples straight through.
pub struct StreamResampler {
    from_rate: u32,
    to_rate: u32,
    /// `None` when both rates match
    inner: Option<FftFixedIn<f32>>,
    /// Input not yet making up a whole chunk
    pending: Vec<f32>,
    /// Single-channel scratch buffers handed to rubato
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, chunk_frames: usize) -> Result<Self, CodecError> {
        if from_rate == 0 || to_rate == 0 {
            return Err(CodecError::Resampler(format!(
                "invalid rates {} Hz -> {} Hz",
                from_rate, to_rate
            )));
        }

        let inner = if from_rate == to_rate {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                from_rate as usize,
                to_rate as usize,
                chunk_frames.max(1),
                1,
                1,
            )
            .map_err(|e| CodecError::Resampler(e.to_string()))?;
            Some(resampler)
        };
        let (input, output) = match &inner {
            Some(resampler) => (
                resampler.input_buffer_allocate(true),
                resampler.output_buffer_allocate(true),
            ),
            None => (Vec::new(), Vec::new()),
        };

        Ok(Self {
            from_rate,
            to_rate,
            inner,
            pending: Vec::new(),
            input,
            output,
        })
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Input frames the next pass consumes, `None` when passing through
    pub fn input_frames_next(&self) -> Option<usize> {
        self.inner.as_ref().map(|r| r.input_frames_next())
    }

    /// Output samples of latency the filter adds at the start
    pub fn output_delay(&self) -> usize {
        self.inner.as_ref().map(|r| r.output_delay()).unwrap_or(0)
    }

    /// Samples buffered until the next whole chunk
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Resample `input`, appending whatever complete chunks produce to `output`
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<(), CodecError> {
        let Some(resampler) = self.inner.as_mut() else {
            output.extend_from_slice(input);
            return Ok(());
        };

        self.pending.extend_from_slice(input);
        let mut consumed = 0;
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }
            self.input[0].clear();
            self.input[0].extend_from_slice(&self.pending[consumed..consumed + needed]);

            let (frames_in, frames_out) = resampler
                .process_into_buffer(&self.input, &mut self.output, None)
                .map_err(|e| CodecError::Resampler(e.to_string()))?;
            output.extend_from_slice(&self.output[0][..frames_out]);
            consumed += frames_in;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    /// Forget buffered input and filter history
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.inner.as_mut() {
            resampler.reset();
        }
    }
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Convert a whole mono signal, compensating for the filter delay so the
/// result lines up with the input and has the matching length
pub fn resample_all(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, CodecError> {
    let mut resampler = StreamResampler::new(from_rate, to_rate, RESAMPLER_CHUNK_FRAMES)?;
    if resampler.is_passthrough() {
        return Ok(samples.to_vec());
    }

    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay);
    resampler.process(samples, &mut out)?;

    // Flush the tail with silence
    let padding = vec![0.0; resampler.input_frames_next().unwrap_or(RESAMPLER_CHUNK_FRAMES)];
    while out.len() < expected + delay {
        let before = out.len();
        resampler.process(&padding, &mut out)?;
        if out.len() == before {
            break;
        }
    }

    out.drain(..delay.min(out.len()));
    out.resize(expected, 0.0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt()
    }

    fn run(resampler: &mut StreamResampler, input: &[f32], block: usize) -> Vec<f32> {
        let mut out = Vec::new();
        for chunk in input.chunks(block) {
            resampler.process(chunk, &mut out).unwrap();
        }
        out
    }

    #[test]
    fn test_downmix() {
        assert_eq!(downmix_to_mono(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix_to_mono(&[0.25, 0.75], 1), vec![0.25, 0.75]);
        assert!(downmix_to_mono(&[1.0], 0).is_empty());
    }

    #[test]
    fn test_passthrough() {
        let mut resampler = StreamResampler::new(16_000, 16_000, RESAMPLER_CHUNK_FRAMES).unwrap();
        assert!(resampler.is_passthrough());
        assert_eq!(resampler.input_frames_next(), None);
        let mut out = Vec::new();
        resampler.process(&[0.1, 0.2, 0.3], &mut out).unwrap();
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(StreamResampler::new(0, 16_000, RESAMPLER_CHUNK_FRAMES).is_err());
        assert!(StreamResampler::new(48_000, 0, RESAMPLER_CHUNK_FRAMES).is_err());
    }

    #[test]
    fn test_downsample_by_three_keeps_rate() {
        let mut resampler = StreamResampler::new(48_000, 16_000, RESAMPLER_CHUNK_FRAMES).unwrap();
        let out = run(&mut resampler, &tone(440.0, 48_000, 48_000), 441);

        // Everything but the last partial chunk has come out
        let chunk = resampler.input_frames_next().unwrap();
        assert!(resampler.pending_samples() < chunk);
        let consumed = 48_000 - resampler.pending_samples();
        assert_eq!(out.len(), consumed / 3);
    }

    #[test]
    fn test_block_size_does_not_change_output() {
        let input = tone(440.0, 48_000, 20_000);
        let mut a = StreamResampler::new(48_000, 16_000, RESAMPLER_CHUNK_FRAMES).unwrap();
        let mut b = StreamResampler::new(48_000, 16_000, RESAMPLER_CHUNK_FRAMES).unwrap();
        assert_eq!(run(&mut a, &input, 441), run(&mut b, &input, 1000));
    }

    #[test]
    fn test_speech_band_passes() {
        let mut resampler = StreamResampler::new(48_000, 16_000, RESAMPLER_CHUNK_FRAMES).unwrap();
        let input = tone(1_000.0, 48_000, 48_000);
        let out = run(&mut resampler, &input, 480);
        let settled = &out[resampler.output_delay() + 1024..];
        let ratio = rms(settled) / rms(&input);
        assert!((ratio - 1.0).abs() < 0.05, "ratio {}", ratio);
    }

    #[test]
    fn test_tone_above_nyquist_is_attenuated() {
        // 15 kHz cannot be represented at 16 kHz and must not alias to 1 kHz
        let mut resampler = StreamResampler::new(48_000, 16_000, RESAMPLER_CHUNK_FRAMES).unwrap();
        let input = tone(15_000.0, 48_000, 48_000);
        let out = run(&mut resampler, &input, 480);
        let settled = &out[resampler.output_delay() + 1024..];
        let ratio = rms(settled) / rms(&input);
        assert!(ratio < 0.05, "ratio {}", ratio);
    }

    #[test]
    fn test_reset_forgets_pending_input() {
        let mut resampler = StreamResampler::new(48_000, 16_000, RESAMPLER_CHUNK_FRAMES).unwrap();
        let mut out = Vec::new();
        resampler.process(&[0.5; 100], &mut out).unwrap();
        assert_eq!(resampler.pending_samples(), 100);
        resampler.reset();
        assert_eq!(resampler.pending_samples(), 0);
    }

    #[test]
    fn test_resample_all_matches_duration() {
        let input = tone(440.0, 24_000, 2400);
        let out = resample_all(&input, 24_000, 48_000).unwrap();
        assert_eq!(out.len(), 4800);
        let ratio = rms(&out[1200..3600]) / rms(&input[600..1800]);
        assert!((ratio - 1.0).abs() < 0.05, "ratio {}", ratio);

        assert_eq!(resample_all(&input, 24_000, 24_000).unwrap(), input);
    }
}
