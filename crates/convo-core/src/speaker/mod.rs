//! ============================================================================
//! Speaker Attribution
//! ============================================================================
//! Decides, per transcript segment, whether the owner or one of the owner's
//! known people is speaking by comparing the segment audio with stored voice
//! samples.
//!
//! - `audio`: WAV decoding, slicing, encoding
//! - `model`: voiceprint extraction and the lazily loaded shared model
//! - `verifier`: thresholded chunk-vs-sample scoring
//! - `references`: voice sample storage and loading
//! - `classifier`: chunking, concurrent scoring and aggregation
//! ============================================================================

mod audio;
mod classifier;
mod model;
mod references;
mod verifier;

pub use audio::{decode_wav, downmix, encode_wav, WavAudio};
pub use classifier::{chunk_windows, SpeakerClassifier, CHUNK_SECONDS};
pub use model::{SharedSpeakerModel, SpeakerModel, SpectralSpeakerModel};
pub use references::{
    load_voice_references, person_profile_prefix, user_profile_key, AudioStore, FsAudioStore,
    Identity, VoiceReference, VoiceSample,
};
pub use verifier::{ModelVerifier, VoiceVerifier};

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid WAV data: {0}")]
    InvalidWav(String),

    #[error("Unsupported audio: {0}")]
    Unsupported(String),

    #[error("Speaker model error: {0}")]
    Model(String),

    #[error("Audio storage error: {0}")]
    Storage(String),
}
