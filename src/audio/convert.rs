// Sample format conversion for the mixing graph
//
// Every graph input is converted to the context format before summing:
// channel layout first, then sample rate.

/// Convert interleaved samples between channel layouts
///
/// Mono is duplicated into every output channel; downmixing to mono
/// averages the input channels. Other layouts keep the first channels and
/// pad missing ones with the last available channel.
pub fn convert_channels(samples: &[i16], from: u16, to: u16) -> Vec<i16> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let (from, to) = (from as usize, to as usize);
    let frames = samples.len() / from;
    let mut output = Vec::with_capacity(frames * to);

    for frame in samples.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            output.push((sum / from as i32) as i16);
        } else {
            for channel in 0..to {
                output.push(frame[channel.min(from - 1)]);
            }
        }
    }

    output
}

/// Streaming linear-interpolation resampler
///
/// Keeps the last input frame between calls so consecutive chunks join
/// without a discontinuity.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    /// Read position in input frames, relative to the carried frame
    position: f64,
    carry: Option<Vec<i16>>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Self {
        Self {
            from_rate,
            to_rate,
            channels: channels.max(1) as usize,
            position: 0.0,
            carry: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate || self.from_rate == 0 || self.to_rate == 0
    }

    pub fn process(&mut self, samples: &[i16]) -> Vec<i16> {
        if self.is_passthrough() {
            return samples.to_vec();
        }

        let carry = self.carry.take();
        let mut frames: Vec<&[i16]> = Vec::with_capacity(samples.len() / self.channels + 1);
        if let Some(previous) = carry.as_deref() {
            frames.push(previous);
        }
        frames.extend(samples.chunks_exact(self.channels));

        if frames.len() < 2 {
            self.carry = frames.first().map(|f| f.to_vec());
            return Vec::new();
        }

        let step = self.from_rate as f64 / self.to_rate as f64;
        let last = (frames.len() - 1) as f64;
        let estimated = ((last / step).ceil() as usize + 1) * self.channels;
        let mut output = Vec::with_capacity(estimated);

        while self.position < last {
            let index = self.position.floor() as usize;
            let frac = self.position - index as f64;
            let (a, b) = (frames[index], frames[index + 1]);
            for channel in 0..self.channels {
                let start = a[channel] as f64;
                let end = b[channel] as f64;
                output.push((start + (end - start) * frac).round() as i16);
            }
            self.position += step;
        }

        self.position -= last;
        self.carry = frames.last().map(|f| f.to_vec());
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_to_stereo_duplicates() {
        assert_eq!(convert_channels(&[1, 2, 3], 1, 2), vec![1, 1, 2, 2, 3, 3]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        assert_eq!(convert_channels(&[100, 200, -50, 50], 2, 1), vec![150, 0]);
    }

    #[test]
    fn test_same_layout_is_copied() {
        assert_eq!(convert_channels(&[7, 8], 2, 2), vec![7, 8]);
    }

    #[test]
    fn test_upsample_interpolates_across_chunks() {
        let mut resampler = LinearResampler::new(24_000, 48_000, 1);

        assert_eq!(resampler.process(&[0, 100, 200]), vec![0, 50, 100, 150]);
        assert_eq!(resampler.process(&[300]), vec![200, 250]);
    }

    #[test]
    fn test_downsample_halves_frame_count() {
        let mut resampler = LinearResampler::new(96_000, 48_000, 2);
        let input: Vec<i16> = (0..200).map(|i| (i / 2) as i16).collect();

        let output = resampler.process(&input);
        assert_eq!(output.len(), 100);
        assert_eq!(&output[..4], &[0, 0, 2, 2]);
    }

    #[test]
    fn test_passthrough_when_rates_match() {
        let mut resampler = LinearResampler::new(48_000, 48_000, 2);
        assert!(resampler.is_passthrough());
        assert_eq!(resampler.process(&[1, 2, 3, 4]), vec![1, 2, 3, 4]);
    }
}
