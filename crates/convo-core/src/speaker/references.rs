//! ============================================================================
//! Voice References - Owner and people voice samples
//! ============================================================================
//! Reference audio lives in an `AudioStore` under:
//!   speech-profiles/{uid}/speech_profile.wav
//!   speech-profiles/{uid}/people_profiles/{person_id}/*.wav
//! Samples are materialized as temporary WAV files for the verifier and
//! removed when the last handle is dropped.
//! ============================================================================

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, warn};

use super::AudioError;

/// Who a reference sample belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    /// The conversation owner
    User,
    Person(String),
}

/// A reference sample on disk. Samples built from bytes own a temporary
/// file that is deleted with the last clone.
#[derive(Debug, Clone)]
pub struct VoiceSample {
    path: PathBuf,
    _guard: Option<Arc<TempPath>>,
}

impl VoiceSample {
    /// Existing file, left untouched on drop
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _guard: None,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AudioError> {
        let mut file = tempfile::Builder::new()
            .prefix("voice-ref-")
            .suffix(".wav")
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        let temp_path = file.into_temp_path();
        Ok(Self {
            path: temp_path.to_path_buf(),
            _guard: Some(Arc::new(temp_path)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub struct VoiceReference {
    pub identity: Identity,
    pub samples: Vec<VoiceSample>,
}

impl VoiceReference {
    pub fn new(identity: Identity, samples: Vec<VoiceSample>) -> Self {
        Self { identity, samples }
    }
}

// ============================================================================
// Audio storage
// ============================================================================

#[async_trait]
pub trait AudioStore: Send + Sync {
    /// Object bytes, or None when the key does not exist
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, AudioError>;

    /// Keys directly under `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, AudioError>;
}

pub fn user_profile_key(owner_id: &str) -> String {
    format!("speech-profiles/{}/speech_profile.wav", owner_id)
}

pub fn person_profile_prefix(owner_id: &str, person_id: &str) -> String {
    format!("speech-profiles/{}/people_profiles/{}/", owner_id, person_id)
}

/// `AudioStore` over a local directory; keys are relative paths
pub struct FsAudioStore {
    root: PathBuf,
}

impl FsAudioStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, AudioError> {
        if key.split('/').any(|part| part == "..") {
            return Err(AudioError::Storage(format!("Invalid key: {}", key)));
        }
        Ok(self.root.join(key.trim_start_matches('/')))
    }
}

#[async_trait]
impl AudioStore for FsAudioStore {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, AudioError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, AudioError> {
        let dir = self.resolve(prefix)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let base = if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                keys.push(format!("{}{}", base, entry.file_name().to_string_lossy()));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Collect the owner's profile sample and the samples of each listed person.
/// The owner comes first. Missing profiles are skipped.
pub async fn load_voice_references(
    store: &dyn AudioStore,
    owner_id: &str,
    people: &[String],
) -> Result<Vec<VoiceReference>, AudioError> {
    let mut references = Vec::new();

    if let Some(bytes) = store.fetch(&user_profile_key(owner_id)).await? {
        references.push(VoiceReference::new(
            Identity::User,
            vec![VoiceSample::from_bytes(&bytes)?],
        ));
    } else {
        debug!("No speech profile for {}", owner_id);
    }

    for person_id in people {
        let mut samples = Vec::new();
        for key in store.list(&person_profile_prefix(owner_id, person_id)).await? {
            if !key.ends_with(".wav") {
                continue;
            }
            match store.fetch(&key).await? {
                Some(bytes) => samples.push(VoiceSample::from_bytes(&bytes)?),
                None => warn!("Listed voice sample disappeared: {}", key),
            }
        }

        if samples.is_empty() {
            debug!("No voice samples for person {}", person_id);
            continue;
        }
        references.push(VoiceReference::new(Identity::Person(person_id.clone()), samples));
    }

    Ok(references)
}
