//! PCM waveforms, the WAV codec and the segment assembler.

use std::io::Cursor;
use std::path::Path;

use tracing::debug;

use crate::error::{PipelineError, Result};

/// Bytes per sample for signed 16-bit PCM, the only width handled.
pub const PCM16_WIDTH_BYTES: u16 = 2;

/// Longest silence accepted between two assembled segments.
pub const MAX_GAP_SECONDS: f32 = 60.0;

/// Interleaved signed 16-bit PCM with its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveformSegment {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_width_bytes: u16,
}

impl WaveformSegment {
    pub fn mono(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
            sample_width_bytes: PCM16_WIDTH_BYTES,
        }
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / usize::from(self.channels)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    fn check_format(&self, index: usize) -> Result<()> {
        if self.sample_width_bytes != PCM16_WIDTH_BYTES {
            return Err(PipelineError::UnsupportedFormat(format!(
                "segment {index} has {}-byte samples; only 16-bit PCM is supported",
                self.sample_width_bytes
            )));
        }
        if self.sample_rate == 0 || self.channels == 0 {
            return Err(PipelineError::UnsupportedFormat(format!(
                "segment {index} has sample rate {} and {} channels",
                self.sample_rate, self.channels
            )));
        }
        if self.samples.len() % usize::from(self.channels) != 0 {
            return Err(PipelineError::UnsupportedFormat(format!(
                "segment {index} has {} samples, not a whole number of {}-channel frames",
                self.samples.len(),
                self.channels
            )));
        }
        Ok(())
    }
}

/// Decode a 16-bit integer PCM wave file.
pub fn read_wav(path: &Path) -> Result<WaveformSegment> {
    let reader = hound::WavReader::open(path)?;
    decode(reader)
}

pub fn decode_wav_bytes(bytes: &[u8]) -> Result<WaveformSegment> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    decode(reader)
}

fn decode<R: std::io::Read>(reader: hound::WavReader<R>) -> Result<WaveformSegment> {
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(PipelineError::UnsupportedFormat(format!(
            "expected 16-bit integer PCM, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    let samples = reader
        .into_samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(WaveformSegment {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        sample_width_bytes: PCM16_WIDTH_BYTES,
    })
}

fn wav_spec(segment: &WaveformSegment) -> Result<hound::WavSpec> {
    segment.check_format(0)?;
    Ok(hound::WavSpec {
        channels: segment.channels,
        sample_rate: segment.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    })
}

pub fn write_wav(path: &Path, segment: &WaveformSegment) -> Result<()> {
    let mut writer = hound::WavWriter::create(path, wav_spec(segment)?)?;
    for sample in &segment.samples {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Encode a segment as an in-memory wave file, e.g. for a download button.
pub fn wav_bytes(segment: &WaveformSegment) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(segment)?)?;
        for sample in &segment.samples {
            writer.write_sample(*sample)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Linearly interpolate interleaved samples from `from_rate` to `to_rate`.
///
/// The frame count becomes `round(frames * to_rate / from_rate)` and the new
/// frames sit at evenly spaced positions spanning the first to the last input
/// frame. Each channel is interpolated on its own. Results are rounded and
/// clamped to the i16 range.
pub fn resample_linear(samples: &[i16], channels: u16, from_rate: u32, to_rate: u32) -> Vec<i16> {
    let channels = usize::from(channels.max(1));
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / channels;
    if frames == 0 {
        return Vec::new();
    }
    let new_frames =
        (frames as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;
    if new_frames == 0 {
        return Vec::new();
    }

    let step = if new_frames > 1 {
        (frames - 1) as f64 / (new_frames - 1) as f64
    } else {
        0.0
    };

    let mut out = Vec::with_capacity(new_frames * channels);
    for k in 0..new_frames {
        let position = k as f64 * step;
        let left = (position.floor() as usize).min(frames - 1);
        let right = (left + 1).min(frames - 1);
        let frac = position - left as f64;
        for channel in 0..channels {
            let a = f64::from(samples[left * channels + channel]);
            let b = f64::from(samples[right * channels + channel]);
            out.push(to_i16(a + (b - a) * frac));
        }
    }
    out
}

fn to_i16(value: f64) -> i16 {
    value.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

/// Number of zero samples making up `seconds` of silence, or `None` when that
/// does not fit in memory.
pub fn silence_len(seconds: f32, sample_rate: u32, channels: u16) -> Option<usize> {
    let frames = (f64::from(seconds) * f64::from(sample_rate)).round();
    if !frames.is_finite() || frames < 0.0 || frames >= usize::MAX as f64 {
        return None;
    }
    (frames as usize).checked_mul(usize::from(channels))
}

/// Concatenate segments in order into one waveform.
///
/// The first segment fixes the output rate, channel count and width. Later
/// segments at a different rate are resampled; a different channel count or a
/// non-16-bit width is rejected. With a positive `silence_between_seconds`, that
/// much silence separates consecutive segments, up to [`MAX_GAP_SECONDS`].
pub fn assemble(segments: &[WaveformSegment], silence_between_seconds: f32) -> Result<WaveformSegment> {
    let invalid_gap = || PipelineError::InvalidGap(silence_between_seconds);
    if !(0.0..=MAX_GAP_SECONDS).contains(&silence_between_seconds) {
        return Err(invalid_gap());
    }
    let Some(first) = segments.first() else {
        return Err(PipelineError::NothingToAssemble);
    };

    for (index, segment) in segments.iter().enumerate() {
        segment.check_format(index)?;
        if segment.channels != first.channels {
            return Err(PipelineError::UnsupportedFormat(format!(
                "segment {index} has {} channels but the output has {}",
                segment.channels, first.channels
            )));
        }
    }

    let target_rate = first.sample_rate;
    let gap = if silence_between_seconds > 0.0 {
        silence_len(silence_between_seconds, target_rate, first.channels).ok_or_else(invalid_gap)?
    } else {
        0
    };

    let capacity = segments
        .iter()
        .try_fold(0usize, |total, s| total.checked_add(s.samples.len()))
        .and_then(|total| total.checked_add(gap.checked_mul(segments.len() - 1)?))
        .ok_or_else(invalid_gap)?;
    let mut samples = Vec::with_capacity(capacity);
    for (index, segment) in segments.iter().enumerate() {
        if segment.sample_rate == target_rate {
            samples.extend_from_slice(&segment.samples);
        } else {
            debug!(
                index,
                from = segment.sample_rate,
                to = target_rate,
                "resampling segment"
            );
            samples.extend(resample_linear(
                &segment.samples,
                segment.channels,
                segment.sample_rate,
                target_rate,
            ));
        }
        if index + 1 < segments.len() {
            samples.resize(samples.len() + gap, 0);
        }
    }

    Ok(WaveformSegment {
        samples,
        sample_rate: target_rate,
        channels: first.channels,
        sample_width_bytes: first.sample_width_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment_is_returned_unchanged() {
        let segment = WaveformSegment::mono(vec![1, -2, 3, i16::MAX, i16::MIN], 22_050);
        let out = assemble(std::slice::from_ref(&segment), 0.0).expect("assemble");
        assert_eq!(out, segment);

        let with_gap = assemble(std::slice::from_ref(&segment), 2.0).expect("assemble");
        assert_eq!(with_gap, segment);
    }

    #[test]
    fn equal_rates_concatenate_exactly() {
        let a = WaveformSegment::mono(vec![1, 2, 3], 16_000);
        let b = WaveformSegment::mono(vec![4, 5], 16_000);
        let out = assemble(&[a, b], 0.0).expect("assemble");
        assert_eq!(out.samples, vec![1, 2, 3, 4, 5]);
        assert_eq!(out.sample_rate, 16_000);
    }

    #[test]
    fn half_rate_segment_is_stretched_to_double_length() {
        let a = WaveformSegment::mono(vec![0; 100], 22_050);
        let b_samples: Vec<i16> = (0..50).map(|i| ((i * 997) % 65_536 - 32_768) as i16).collect();
        let b = WaveformSegment::mono(b_samples, 11_025);

        let out = assemble(&[a, b], 0.0).expect("assemble");
        assert_eq!(out.sample_rate, 22_050);
        assert_eq!(out.samples.len(), 100 + 100);
    }

    #[test]
    fn interpolation_overshoot_is_clamped() {
        // Rounding at the extremes must never wrap around.
        let b = WaveformSegment::mono(vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN], 8_000);
        let a = WaveformSegment::mono(vec![0], 44_100);
        let out = assemble(&[a, b], 0.0).expect("assemble");
        assert!(out.samples.len() > 4);
        assert!(out.samples[1..].iter().any(|&s| s == i16::MAX));
        assert!(out.samples[1..].iter().any(|&s| s == i16::MIN));
    }

    #[test]
    fn resample_matches_linear_positions() {
        assert_eq!(resample_linear(&[0, 100], 1, 1, 2), vec![0, 33, 67, 100]);
        assert_eq!(resample_linear(&[0, 10, 20, 30], 1, 2, 1), vec![0, 30]);
        assert_eq!(resample_linear(&[7], 1, 8_000, 16_000), vec![7, 7]);
        assert!(resample_linear(&[], 1, 8_000, 16_000).is_empty());
    }

    #[test]
    fn stereo_channels_are_interpolated_independently() {
        let interleaved = vec![0, 1_000, 100, 1_000];
        let out = resample_linear(&interleaved, 2, 1, 2);
        assert_eq!(out.len(), 8);
        assert!(out.chunks_exact(2).all(|frame| frame[1] == 1_000));
        assert_eq!(out[0], 0);
        assert_eq!(out[6], 100);
    }

    #[test]
    fn one_second_gap_adds_rate_times_channels_zeros() {
        let a = WaveformSegment::mono(vec![5; 10], 8_000);
        let b = WaveformSegment::mono(vec![6; 10], 8_000);
        let out = assemble(&[a, b], 1.0).expect("assemble");
        assert_eq!(out.samples.len(), 10 + 8_000 + 10);
        assert!(out.samples[10..8_010].iter().all(|&s| s == 0));

        let stereo = |fill| WaveformSegment {
            samples: vec![fill; 4],
            sample_rate: 8_000,
            channels: 2,
            sample_width_bytes: PCM16_WIDTH_BYTES,
        };
        let out = assemble(&[stereo(1), stereo(2), stereo(3)], 1.0).expect("assemble");
        assert_eq!(out.samples.len(), 12 + 2 * 16_000);
        assert!(out.samples[4..16_004].iter().all(|&s| s == 0));
        assert_eq!(out.samples[16_004], 2);
    }

    #[test]
    fn assembly_is_deterministic() {
        let segments = vec![
            WaveformSegment::mono((0..300).map(|i| (i * 37) as i16).collect(), 22_050),
            WaveformSegment::mono((0..200).map(|i| (i * -53) as i16).collect(), 16_000),
        ];
        let a = assemble(&segments, 0.25).expect("assemble");
        let b = assemble(&segments, 0.25).expect("assemble");
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_mismatched_channels_and_widths() {
        let mono = WaveformSegment::mono(vec![1, 2], 22_050);
        let stereo = WaveformSegment {
            samples: vec![1, 2, 3, 4],
            sample_rate: 22_050,
            channels: 2,
            sample_width_bytes: PCM16_WIDTH_BYTES,
        };
        assert!(matches!(
            assemble(&[mono.clone(), stereo], 0.0),
            Err(PipelineError::UnsupportedFormat(_))
        ));

        let wide = WaveformSegment {
            sample_width_bytes: 4,
            ..mono.clone()
        };
        assert!(matches!(
            assemble(&[mono, wide], 0.0),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn rejects_empty_input_and_bad_gaps() {
        assert!(matches!(assemble(&[], 0.0), Err(PipelineError::NothingToAssemble)));
        let seg = WaveformSegment::mono(vec![1], 8_000);
        assert!(matches!(
            assemble(std::slice::from_ref(&seg), -1.0),
            Err(PipelineError::InvalidGap(_))
        ));
        assert!(matches!(
            assemble(std::slice::from_ref(&seg), f32::NAN),
            Err(PipelineError::InvalidGap(_))
        ));
    }

    #[test]
    fn oversized_gaps_are_rejected_instead_of_overflowing() {
        let mono = WaveformSegment::mono(vec![1, 2], 8_000);
        let stereo = WaveformSegment {
            samples: vec![1, 2, 3, 4],
            sample_rate: 8_000,
            channels: 2,
            sample_width_bytes: PCM16_WIDTH_BYTES,
        };
        for segment in [mono, stereo] {
            let pair = [segment.clone(), segment];
            assert!(matches!(assemble(&pair, 1e30), Err(PipelineError::InvalidGap(_))));
            assert!(matches!(
                assemble(&pair, MAX_GAP_SECONDS * 2.0),
                Err(PipelineError::InvalidGap(_))
            ));
            assert!(matches!(assemble(&pair, f32::INFINITY), Err(PipelineError::InvalidGap(_))));
        }
        assert_eq!(silence_len(f32::MAX, u32::MAX, 2), None);
        assert_eq!(silence_len(0.5, 8_000, 2), Some(8_000));
    }

    #[test]
    fn partial_trailing_frame_is_unsupported() {
        let ragged = WaveformSegment {
            samples: vec![1, 2, 3],
            sample_rate: 8_000,
            channels: 2,
            sample_width_bytes: PCM16_WIDTH_BYTES,
        };
        let whole = WaveformSegment {
            samples: vec![4, 5],
            ..ragged.clone()
        };
        assert!(matches!(
            assemble(&[ragged.clone(), whole.clone()], 0.0),
            Err(PipelineError::UnsupportedFormat(_))
        ));
        let resampled = WaveformSegment {
            sample_rate: 16_000,
            ..ragged
        };
        assert!(matches!(
            assemble(&[whole, resampled], 0.0),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn wav_codec_preserves_samples() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.wav");
        let segment = WaveformSegment::mono(vec![0, 1, -1, i16::MAX, i16::MIN], 22_050);

        write_wav(&path, &segment).expect("write");
        assert_eq!(read_wav(&path).expect("read"), segment);

        let bytes = wav_bytes(&segment).expect("encode");
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(decode_wav_bytes(&bytes).expect("decode"), segment);
    }

    #[test]
    fn float_wav_is_unsupported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("create");
        writer.write_sample(0.5_f32).expect("write");
        writer.finalize().expect("finalize");

        assert!(matches!(read_wav(&path), Err(PipelineError::UnsupportedFormat(_))));
    }
}
