//! ============================================================================
//! WAV Audio - Decode, slice and encode RIFF/WAVE data
//! ============================================================================
//! Accepts PCM16 and IEEE float32 input with any channel count; everything
//! is downmixed to mono f32 in [-1, 1]. Output is always PCM16 mono.
//! ============================================================================

use std::path::Path;

use super::AudioError;

const FORMAT_PCM: u16 = 1;
const FORMAT_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Mono audio at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl WavAudio {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Samples between `start` and `end` seconds, clamped to the audio
    pub fn slice_seconds(&self, start: f64, end: f64) -> WavAudio {
        let to_index = |t: f64| {
            let idx = (t.max(0.0) * self.sample_rate as f64).round() as usize;
            idx.min(self.samples.len())
        };
        let from = to_index(start);
        let to = to_index(end).max(from);
        WavAudio::new(self.sample_rate, self.samples[from..to].to_vec())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AudioError> {
        decode_wav(bytes)
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_wav(self)
    }

    pub fn read_file(path: &Path) -> Result<Self, AudioError> {
        let bytes = std::fs::read(path)?;
        decode_wav(&bytes)
    }

    pub fn write_file(&self, path: &Path) -> Result<(), AudioError> {
        std::fs::write(path, encode_wav(self))?;
        Ok(())
    }
}

struct FormatChunk {
    format: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

fn invalid(msg: impl Into<String>) -> AudioError {
    AudioError::InvalidWav(msg.into())
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16, AudioError> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| invalid("truncated header"))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, AudioError> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| invalid("truncated header"))
}

/// Decode a RIFF/WAVE buffer into mono f32 samples
pub fn decode_wav(bytes: &[u8]) -> Result<WavAudio, AudioError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(invalid("missing RIFF/WAVE header"));
    }

    let mut format: Option<FormatChunk> = None;
    let mut data: Option<&[u8]> = None;
    let mut offset = 12;

    while offset + 8 <= bytes.len() {
        let id = &bytes[offset..offset + 4];
        let size = read_u32(bytes, offset + 4)? as usize;
        let body_start = offset + 8;
        let body_end = body_start.saturating_add(size).min(bytes.len());
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => {
                let mut chunk = FormatChunk {
                    format: read_u16(body, 0)?,
                    channels: read_u16(body, 2)?,
                    sample_rate: read_u32(body, 4)?,
                    bits_per_sample: read_u16(body, 14)?,
                };
                if chunk.format == FORMAT_EXTENSIBLE {
                    // Sub-format GUID starts with the plain format code
                    chunk.format = read_u16(body, 24)?;
                }
                format = Some(chunk);
            }
            b"data" => data = Some(body),
            _ => {}
        }

        // Chunks are word aligned
        offset = body_start.saturating_add(size).saturating_add(size & 1);
    }

    let format = format.ok_or_else(|| invalid("missing fmt chunk"))?;
    let data = data.ok_or_else(|| invalid("missing data chunk"))?;

    if format.channels == 0 {
        return Err(invalid("zero channels"));
    }
    if format.sample_rate == 0 {
        return Err(invalid("zero sample rate"));
    }

    let interleaved: Vec<f32> = match (format.format, format.bits_per_sample) {
        (FORMAT_PCM, 16) => data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
            .collect(),
        (FORMAT_FLOAT, 32) => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        (fmt, bits) => {
            return Err(AudioError::Unsupported(format!(
                "format {} with {} bits per sample",
                fmt, bits
            )))
        }
    };

    Ok(WavAudio::new(
        format.sample_rate,
        downmix(&interleaved, format.channels),
    ))
}

/// Average interleaved channels into one
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Encode mono audio as a PCM16 WAV buffer
pub fn encode_wav(audio: &WavAudio) -> Vec<u8> {
    let data_size = (audio.samples.len() * 2) as u32;
    let byte_rate = audio.sample_rate * 2;

    let mut out = Vec::with_capacity(44 + data_size as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&audio.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    for sample in &audio.samples {
        let clamped = sample.clamp(-1.0, 1.0);
        out.extend_from_slice(&((clamped * i16::MAX as f32) as i16).to_le_bytes());
    }
    out
}

#[cfg(test)]
pub(crate) fn sine(freq: f32, seconds: f64, sample_rate: u32) -> WavAudio {
    let n = (seconds * sample_rate as f64) as usize;
    let samples = (0..n)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
        .collect();
    WavAudio::new(sample_rate, samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_stereo_wav(frames: &[(f32, f32)], sample_rate: u32) -> Vec<u8> {
        let data_size = (frames.len() * 8) as u32;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_size).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&FORMAT_FLOAT.to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 8).to_le_bytes());
        out.extend_from_slice(&8u16.to_le_bytes());
        out.extend_from_slice(&32u16.to_le_bytes());
        // Unknown chunk with odd size is skipped with padding
        out.extend_from_slice(b"LIST");
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(&[1, 2, 3, 0]);
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_size.to_le_bytes());
        for (l, r) in frames {
            out.extend_from_slice(&l.to_le_bytes());
            out.extend_from_slice(&r.to_le_bytes());
        }
        out
    }

    #[test]
    fn test_pcm16_encode_decode() {
        let audio = WavAudio::new(16_000, vec![0.0, 0.5, -0.5, 1.0]);
        let decoded = decode_wav(&encode_wav(&audio)).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.samples.len(), 4);
        for (a, b) in audio.samples.iter().zip(decoded.samples.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_float_stereo_downmix() {
        let bytes = float_stereo_wav(&[(1.0, 0.0), (0.5, 0.5), (-1.0, 1.0)], 8_000);
        let decoded = decode_wav(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 8_000);
        assert_eq!(decoded.samples, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(decode_wav(b"not a wav"), Err(AudioError::InvalidWav(_))));
    }

    #[test]
    fn test_slice_and_duration() {
        let audio = WavAudio::new(10, (0..100).map(|i| i as f32).collect());
        assert_eq!(audio.duration_seconds(), 10.0);

        let slice = audio.slice_seconds(2.0, 3.5);
        assert_eq!(slice.samples.len(), 15);
        assert_eq!(slice.samples[0], 20.0);

        assert!(audio.slice_seconds(20.0, 30.0).samples.is_empty());
        assert_eq!(audio.slice_seconds(9.0, 30.0).samples.len(), 10);
    }
}
