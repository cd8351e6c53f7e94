//! ============================================================================
//! Speaker Models - Voiceprint extraction
//! ============================================================================
//! A `SpeakerModel` maps audio to a fixed-length voiceprint; voiceprints of
//! the same speaker have high cosine similarity. `SharedSpeakerModel` loads
//! a model once, on first use, no matter how many tasks ask concurrently.
//! ============================================================================

use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use super::audio::WavAudio;
use super::AudioError;

pub trait SpeakerModel: Send + Sync {
    fn embed(&self, audio: &WavAudio) -> Result<Vec<f32>, AudioError>;

    fn name(&self) -> &str;
}

// ============================================================================
// Spectral voiceprint
// ============================================================================

const FRAME_LEN: usize = 512;
const HOP_LEN: usize = 256;
const NUM_BANDS: usize = 32;
const MIN_HZ: f32 = 60.0;
const LOG_FLOOR: f32 = 1e-10;

/// Deterministic voiceprint: mean log energy in log-spaced frequency bands
/// over Hann-windowed FFT frames, with the band mean removed.
pub struct SpectralSpeakerModel {
    window: Vec<f32>,
}

impl Default for SpectralSpeakerModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectralSpeakerModel {
    pub fn new() -> Self {
        let window = (0..FRAME_LEN)
            .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / FRAME_LEN as f32).cos())
            .collect();
        Self { window }
    }

    /// FFT bin ranges for each band, log-spaced from MIN_HZ to Nyquist
    fn band_edges(sample_rate: u32) -> Vec<(usize, usize)> {
        let nyquist = sample_rate as f32 / 2.0;
        let bins = FRAME_LEN / 2 + 1;
        let hz_per_bin = sample_rate as f32 / FRAME_LEN as f32;
        let ratio = (nyquist / MIN_HZ).max(1.0);

        (0..NUM_BANDS)
            .map(|b| {
                let lo_hz = MIN_HZ * ratio.powf(b as f32 / NUM_BANDS as f32);
                let hi_hz = MIN_HZ * ratio.powf((b + 1) as f32 / NUM_BANDS as f32);
                let lo = ((lo_hz / hz_per_bin).floor() as usize).min(bins - 1);
                let hi = ((hi_hz / hz_per_bin).ceil() as usize).clamp(lo + 1, bins);
                (lo, hi)
            })
            .collect()
    }
}

impl SpeakerModel for SpectralSpeakerModel {
    fn embed(&self, audio: &WavAudio) -> Result<Vec<f32>, AudioError> {
        if audio.samples.is_empty() {
            return Err(AudioError::Model("cannot embed empty audio".into()));
        }

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FRAME_LEN);
        let edges = Self::band_edges(audio.sample_rate);

        let mut padded = audio.samples.clone();
        if padded.len() < FRAME_LEN {
            padded.resize(FRAME_LEN, 0.0);
        }
        let num_frames = (padded.len() - FRAME_LEN) / HOP_LEN + 1;

        let mut energies = vec![0.0f32; NUM_BANDS];
        let mut frame = vec![Complex::new(0.0f32, 0.0); FRAME_LEN];

        for frame_idx in 0..num_frames {
            let start = frame_idx * HOP_LEN;
            for (i, slot) in frame.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            fft.process(&mut frame);

            for (band, (lo, hi)) in edges.iter().enumerate() {
                let power: f32 = frame[*lo..*hi].iter().map(|c| c.norm_sqr()).sum();
                energies[band] += (power / (hi - lo) as f32 + LOG_FLOOR).ln();
            }
        }

        for e in energies.iter_mut() {
            *e /= num_frames as f32;
        }
        let mean = energies.iter().sum::<f32>() / NUM_BANDS as f32;
        for e in energies.iter_mut() {
            *e -= mean;
        }

        Ok(energies)
    }

    fn name(&self) -> &str {
        "spectral-bands"
    }
}

// ============================================================================
// Lazily loaded shared model
// ============================================================================

type ModelLoader = dyn Fn() -> Result<Arc<dyn SpeakerModel>, AudioError> + Send + Sync;

/// Loads the model on first `get` and hands out the same instance afterwards.
/// Concurrent first calls wait for a single load.
pub struct SharedSpeakerModel {
    cell: OnceCell<Arc<dyn SpeakerModel>>,
    loader: Arc<ModelLoader>,
}

impl SharedSpeakerModel {
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn SpeakerModel>, AudioError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            loader: Arc::new(loader),
        }
    }

    /// Shared model backed by `SpectralSpeakerModel`
    pub fn spectral() -> Self {
        Self::new(|| Ok(Arc::new(SpectralSpeakerModel::new()) as Arc<dyn SpeakerModel>))
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    pub async fn get(&self) -> Result<Arc<dyn SpeakerModel>, AudioError> {
        let model = self
            .cell
            .get_or_try_init(|| async {
                let loader = self.loader.clone();
                let model = tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| AudioError::Model(format!("Model loader panicked: {}", e)))??;
                info!("Loaded speaker model: {}", model.name());
                Ok::<_, AudioError>(model)
            })
            .await?;
        Ok(model.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speaker::audio::sine;
    use crate::vector::cosine_similarity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_voiceprint_is_deterministic() {
        let model = SpectralSpeakerModel::new();
        let audio = sine(220.0, 1.0, 16_000);
        let a = model.embed(&audio).unwrap();
        let b = model.embed(&audio).unwrap();
        assert_eq!(a.len(), NUM_BANDS);
        assert_eq!(a, b);
    }

    #[test]
    fn test_similar_sounds_score_higher() {
        let model = SpectralSpeakerModel::new();
        let low = model.embed(&sine(200.0, 1.0, 16_000)).unwrap();
        let low_again = model.embed(&sine(205.0, 1.5, 16_000)).unwrap();
        let high = model.embed(&sine(3_000.0, 1.0, 16_000)).unwrap();

        let same = cosine_similarity(&low, &low_again);
        let different = cosine_similarity(&low, &high);
        assert!(same > different, "same={} different={}", same, different);
        assert!(same > 0.9);
    }

    #[test]
    fn test_short_and_empty_audio() {
        let model = SpectralSpeakerModel::new();
        assert!(model.embed(&sine(440.0, 0.01, 16_000)).is_ok());
        assert!(model.embed(&WavAudio::new(16_000, vec![])).is_err());
    }

    #[tokio::test]
    async fn test_shared_model_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let shared = Arc::new(SharedSpeakerModel::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(SpectralSpeakerModel::new()) as Arc<dyn SpeakerModel>)
        }));
        assert!(!shared.is_loaded());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move { shared.get().await.map(|m| m.name().to_string()) }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "spectral-bands");
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(shared.is_loaded());
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let shared = SharedSpeakerModel::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AudioError::Model("weights missing".into()))
            } else {
                Ok(Arc::new(SpectralSpeakerModel::new()) as Arc<dyn SpeakerModel>)
            }
        });

        assert!(shared.get().await.is_err());
        assert!(shared.get().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
