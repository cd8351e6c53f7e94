//! Voice verification: does this chunk sound like that reference sample?

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::audio::WavAudio;
use super::model::{SharedSpeakerModel, SpeakerModel};
use super::AudioError;
use crate::vector::cosine_similarity;

/// Reference voiceprints kept before the cache is reset
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Scores one audio chunk against one reference sample. Returns 0.0 when
/// the voices do not match, otherwise a positive similarity.
pub trait VoiceVerifier: Send + Sync {
    fn score(&self, chunk: &Path, reference: &Path) -> Result<f32, AudioError>;

    /// One result per reference, in order
    fn score_many(&self, chunk: &Path, references: &[&Path]) -> Vec<Result<f32, AudioError>> {
        references
            .iter()
            .map(|reference| self.score(chunk, reference))
            .collect()
    }
}

/// Verifier over a `SpeakerModel`: a pair matches when the cosine similarity
/// of their voiceprints reaches the threshold.
pub struct ModelVerifier {
    model: Arc<dyn SpeakerModel>,
    threshold: f32,
    /// Reference voiceprints by SHA-256 of the WAV bytes. Sample files are
    /// fresh temp paths on every load, so paths are useless as keys.
    references: Mutex<HashMap<[u8; 32], Arc<Vec<f32>>>>,
    capacity: usize,
}

impl ModelVerifier {
    pub fn new(model: Arc<dyn SpeakerModel>, threshold: f32) -> Self {
        Self {
            model,
            threshold,
            references: Mutex::new(HashMap::new()),
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    pub async fn from_shared(shared: &SharedSpeakerModel, threshold: f32) -> Result<Self, AudioError> {
        Ok(Self::new(shared.get().await?, threshold))
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn cached_references(&self) -> usize {
        self.references.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    fn voiceprint(&self, path: &Path) -> Result<Vec<f32>, AudioError> {
        self.model.embed(&WavAudio::read_file(path)?)
    }

    fn reference_voiceprint(&self, path: &Path) -> Result<Arc<Vec<f32>>, AudioError> {
        let bytes = std::fs::read(path)?;
        let digest: [u8; 32] = Sha256::digest(&bytes).into();

        let poisoned = |_| AudioError::Model("reference cache poisoned".into());
        if let Some(cached) = self.references.lock().map_err(poisoned)?.get(&digest) {
            return Ok(cached.clone());
        }

        let print = Arc::new(self.model.embed(&WavAudio::decode(&bytes)?)?);
        let mut cache = self.references.lock().map_err(poisoned)?;
        if cache.len() >= self.capacity {
            debug!("Reference voiceprint cache full ({}), resetting", cache.len());
            cache.clear();
        }
        cache.insert(digest, print.clone());
        Ok(print)
    }

    fn gate(&self, chunk_print: &[f32], reference: &Path) -> Result<f32, AudioError> {
        let reference_print = self.reference_voiceprint(reference)?;
        let similarity = cosine_similarity(chunk_print, &reference_print);

        debug!(
            "Voice similarity {:.3} for {} (threshold {:.2})",
            similarity,
            reference.display(),
            self.threshold
        );

        if similarity >= self.threshold {
            Ok(similarity)
        } else {
            Ok(0.0)
        }
    }
}

impl VoiceVerifier for ModelVerifier {
    fn score(&self, chunk: &Path, reference: &Path) -> Result<f32, AudioError> {
        let chunk_print = self.voiceprint(chunk)?;
        self.gate(&chunk_print, reference)
    }

    fn score_many(&self, chunk: &Path, references: &[&Path]) -> Vec<Result<f32, AudioError>> {
        let chunk_print = match self.voiceprint(chunk) {
            Ok(print) => print,
            Err(e) => {
                let message = e.to_string();
                return references
                    .iter()
                    .map(|_| Err(AudioError::Model(message.clone())))
                    .collect();
            }
        };

        references
            .iter()
            .map(|reference| self.gate(&chunk_print, reference))
            .collect()
    }
}
