//! ============================================================================
//! Protection Codec - Transcript compression & per-owner encryption
//! ============================================================================
//! standard: segments -> JSON -> zlib -> hex
//! enhanced: segments -> JSON -> zlib -> hex -> AES-256-GCM -> base64
//!
//! Decoding is lenient: a record that fails to decrypt, inflate or parse is
//! handed back unchanged as `PassedThrough`, tagged with the anomaly and
//! counted in `CodecDiagnostics`, so mixed legacy/encrypted data keeps
//! loading while operators can still see corruption.
//! ============================================================================

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::keys::KeyDeriver;
use crate::types::{CoreError, ProtectionLevel, TranscriptSegment};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// The raw transcript field as persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredPayload {
    /// Legacy structured segments, never compressed
    Segments(Vec<TranscriptSegment>),
    /// Hex of the compressed JSON, or the ciphertext of that hex string
    Blob(String),
}

/// Storable form of a transcript, together with the flags needed to decode it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTranscript {
    pub protection_level: ProtectionLevel,
    pub compressed: bool,
    pub payload: StoredPayload,
}

impl StoredTranscript {
    /// Wrap legacy structured segments that predate compression
    pub fn legacy(protection_level: ProtectionLevel, segments: Vec<TranscriptSegment>) -> Self {
        Self {
            protection_level,
            compressed: false,
            payload: StoredPayload::Segments(segments),
        }
    }
}

/// Why a stored value was passed through instead of decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeAnomaly {
    /// Marked enhanced but holds plaintext (pre-encryption data)
    NotEncrypted,
    /// Ciphertext did not authenticate: wrong owner key or corruption
    Decrypt,
    /// Compressed payload was not valid hex
    HexDecode,
    /// zlib stream was invalid
    Decompress,
    /// Inflated bytes were not a segment list
    Parse,
}

impl std::fmt::Display for DecodeAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DecodeAnomaly::NotEncrypted => "not_encrypted",
            DecodeAnomaly::Decrypt => "decrypt",
            DecodeAnomaly::HexDecode => "hex_decode",
            DecodeAnomaly::Decompress => "decompress",
            DecodeAnomaly::Parse => "parse",
        };
        f.write_str(name)
    }
}

/// Result of decoding a stored transcript
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Decoded(Vec<TranscriptSegment>),
    PassedThrough {
        stored: StoredTranscript,
        anomaly: DecodeAnomaly,
    },
}

impl DecodeOutcome {
    pub fn is_decoded(&self) -> bool {
        matches!(self, DecodeOutcome::Decoded(_))
    }

    pub fn anomaly(&self) -> Option<DecodeAnomaly> {
        match self {
            DecodeOutcome::Decoded(_) => None,
            DecodeOutcome::PassedThrough { anomaly, .. } => Some(*anomaly),
        }
    }

    /// Best-effort segments: decoded ones, or legacy plaintext segments that
    /// were passed through. Opaque blobs yield nothing.
    pub fn into_segments(self) -> Option<Vec<TranscriptSegment>> {
        match self {
            DecodeOutcome::Decoded(segments) => Some(segments),
            DecodeOutcome::PassedThrough {
                stored:
                    StoredTranscript {
                        payload: StoredPayload::Segments(segments),
                        ..
                    },
                ..
            } => Some(segments),
            DecodeOutcome::PassedThrough { .. } => None,
        }
    }
}

/// Result of decoding a protected text field
#[derive(Debug, Clone, PartialEq)]
pub enum TextOutcome {
    Decoded(String),
    PassedThrough { text: String, anomaly: DecodeAnomaly },
}

impl TextOutcome {
    pub fn is_decoded(&self) -> bool {
        matches!(self, TextOutcome::Decoded(_))
    }

    /// The decoded text, or the stored text unchanged
    pub fn into_text(self) -> String {
        match self {
            TextOutcome::Decoded(text) => text,
            TextOutcome::PassedThrough { text, .. } => text,
        }
    }
}

/// Per-anomaly counters for lenient decodes
#[derive(Debug, Default)]
pub struct CodecDiagnostics {
    not_encrypted: AtomicU64,
    decrypt: AtomicU64,
    hex_decode: AtomicU64,
    decompress: AtomicU64,
    parse: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub not_encrypted: u64,
    pub decrypt: u64,
    pub hex_decode: u64,
    pub decompress: u64,
    pub parse: u64,
}

impl DiagnosticsSnapshot {
    pub fn total(&self) -> u64 {
        self.not_encrypted + self.decrypt + self.hex_decode + self.decompress + self.parse
    }
}

impl CodecDiagnostics {
    fn record(&self, anomaly: DecodeAnomaly) {
        let counter = match anomaly {
            DecodeAnomaly::NotEncrypted => &self.not_encrypted,
            DecodeAnomaly::Decrypt => &self.decrypt,
            DecodeAnomaly::HexDecode => &self.hex_decode,
            DecodeAnomaly::Decompress => &self.decompress,
            DecodeAnomaly::Parse => &self.parse,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            not_encrypted: self.not_encrypted.load(Ordering::Relaxed),
            decrypt: self.decrypt.load(Ordering::Relaxed),
            hex_decode: self.hex_decode.load(Ordering::Relaxed),
            decompress: self.decompress.load(Ordering::Relaxed),
            parse: self.parse.load(Ordering::Relaxed),
        }
    }
}

/// Stateless transcript codec. Cheap to clone; clones share diagnostics.
#[derive(Debug, Clone)]
pub struct ProtectionCodec {
    keys: Option<KeyDeriver>,
    diagnostics: Arc<CodecDiagnostics>,
}

impl ProtectionCodec {
    /// Codec able to encode both levels
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, CoreError> {
        Ok(Self {
            keys: Some(KeyDeriver::new(secret)?),
            diagnostics: Arc::new(CodecDiagnostics::default()),
        })
    }

    /// Codec without a master secret: standard records only. Enhanced
    /// records fail to encode and pass through on decode.
    pub fn standard_only() -> Self {
        Self {
            keys: None,
            diagnostics: Arc::new(CodecDiagnostics::default()),
        }
    }

    pub fn can_encrypt(&self) -> bool {
        self.keys.is_some()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ========================================================================
    // Transcripts
    // ========================================================================

    pub fn encode(
        &self,
        segments: &[TranscriptSegment],
        owner_id: &str,
        level: ProtectionLevel,
    ) -> Result<StoredTranscript, CoreError> {
        let compressed = compress_segments(segments)?;

        let blob = match level {
            ProtectionLevel::Standard => compressed,
            ProtectionLevel::Enhanced => {
                let key = self.owner_key(owner_id)?;
                encrypt_string(&compressed, &key)?
            }
        };

        debug!(
            "Encoded {} segments for owner {} ({})",
            segments.len(),
            owner_id,
            level
        );

        Ok(StoredTranscript {
            protection_level: level,
            compressed: true,
            payload: StoredPayload::Blob(blob),
        })
    }

    /// Decode a stored transcript. Never fails; see `DecodeOutcome`.
    pub fn decode(&self, stored: &StoredTranscript, owner_id: &str) -> DecodeOutcome {
        match self.try_decode(stored, owner_id) {
            Ok(segments) => DecodeOutcome::Decoded(segments),
            Err(anomaly) => {
                self.diagnostics.record(anomaly);
                warn!(
                    "Transcript for owner {} passed through undecoded ({}, level {})",
                    owner_id, anomaly, stored.protection_level
                );
                DecodeOutcome::PassedThrough {
                    stored: stored.clone(),
                    anomaly,
                }
            }
        }
    }

    /// True when `stored` holds an encoded blob this codec cannot decode for
    /// `owner_id`. Does not touch the diagnostics counters.
    pub fn is_opaque(&self, stored: &StoredTranscript, owner_id: &str) -> bool {
        matches!(stored.payload, StoredPayload::Blob(_)) && self.try_decode(stored, owner_id).is_err()
    }

    fn try_decode(
        &self,
        stored: &StoredTranscript,
        owner_id: &str,
    ) -> Result<Vec<TranscriptSegment>, DecodeAnomaly> {
        let blob = match &stored.payload {
            StoredPayload::Segments(segments) => {
                if stored.protection_level.is_encrypted() {
                    return Err(DecodeAnomaly::NotEncrypted);
                }
                return Ok(segments.clone());
            }
            StoredPayload::Blob(blob) => blob,
        };

        let plain = match stored.protection_level {
            ProtectionLevel::Standard => blob.clone(),
            ProtectionLevel::Enhanced => self.decrypt_for(blob, owner_id)?,
        };

        if stored.compressed {
            decompress_segments(&plain)
        } else {
            serde_json::from_str(&plain).map_err(|_| DecodeAnomaly::Parse)
        }
    }

    // ========================================================================
    // Protected text fields (memory content, chat messages)
    // ========================================================================

    pub fn encode_text(
        &self,
        text: &str,
        owner_id: &str,
        level: ProtectionLevel,
    ) -> Result<String, CoreError> {
        match level {
            ProtectionLevel::Standard => Ok(text.to_string()),
            ProtectionLevel::Enhanced => {
                let key = self.owner_key(owner_id)?;
                encrypt_string(text, &key)
            }
        }
    }

    pub fn decode_text(&self, stored: &str, owner_id: &str, level: ProtectionLevel) -> TextOutcome {
        if !level.is_encrypted() {
            return TextOutcome::Decoded(stored.to_string());
        }
        match self.decrypt_for(stored, owner_id) {
            Ok(text) => TextOutcome::Decoded(text),
            Err(anomaly) => {
                self.diagnostics.record(anomaly);
                warn!(
                    "Text field for owner {} passed through undecoded ({})",
                    owner_id, anomaly
                );
                TextOutcome::PassedThrough {
                    text: stored.to_string(),
                    anomaly,
                }
            }
        }
    }

    fn owner_key(&self, owner_id: &str) -> Result<[u8; 32], CoreError> {
        self.keys
            .as_ref()
            .ok_or_else(|| {
                CoreError::Encryption("No encryption secret configured for enhanced records".into())
            })?
            .derive(owner_id)
    }

    fn decrypt_for(&self, blob: &str, owner_id: &str) -> Result<String, DecodeAnomaly> {
        let key = self.owner_key(owner_id).map_err(|_| DecodeAnomaly::Decrypt)?;
        decrypt_string(blob, &key).map_err(|anomaly| {
            // Hex that inflates cleanly is a compressed payload written before encryption.
            if anomaly == DecodeAnomaly::Decrypt && decompress_segments(blob).is_ok() {
                DecodeAnomaly::NotEncrypted
            } else {
                anomaly
            }
        })
    }
}

// ============================================================================
// Compression
// ============================================================================

fn compress_segments(segments: &[TranscriptSegment]) -> Result<String, CoreError> {
    let json = serde_json::to_vec(segments)
        .map_err(|e| CoreError::InvalidInput(format!("Failed to serialize segments: {}", e)))?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| CoreError::Storage(format!("Compression failed: {}", e)))?;
    let bytes = encoder
        .finish()
        .map_err(|e| CoreError::Storage(format!("Compression failed: {}", e)))?;

    Ok(hex::encode(bytes))
}

fn decompress_segments(hex_str: &str) -> Result<Vec<TranscriptSegment>, DecodeAnomaly> {
    let bytes = hex::decode(hex_str).map_err(|_| DecodeAnomaly::HexDecode)?;

    let mut json = Vec::new();
    ZlibDecoder::new(bytes.as_slice())
        .read_to_end(&mut json)
        .map_err(|_| DecodeAnomaly::Decompress)?;

    serde_json::from_slice(&json).map_err(|_| DecodeAnomaly::Parse)
}

// ============================================================================
// Encryption
// ============================================================================

/// AES-256-GCM with a random nonce. Returns base64(nonce || ciphertext+tag).
fn encrypt_string(plain: &str, key: &[u8]) -> Result<String, CoreError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CoreError::Encryption("AES key must be 32 bytes".into()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plain.as_bytes())
        .map_err(|e| CoreError::Encryption(format!("AES-256-GCM encryption failed: {}", e)))?;

    let mut packed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    packed.extend_from_slice(&nonce_bytes);
    packed.extend_from_slice(&ciphertext);

    Ok(base64::engine::general_purpose::STANDARD.encode(packed))
}

/// Values that are not base64 or cannot hold nonce and tag were never
/// encrypted and report `NotEncrypted`; everything else that fails is `Decrypt`.
fn decrypt_string(encoded: &str, key: &[u8]) -> Result<String, DecodeAnomaly> {
    let packed = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| DecodeAnomaly::NotEncrypted)?;

    if packed.len() < NONCE_LEN + TAG_LEN {
        return Err(DecodeAnomaly::NotEncrypted);
    }

    let (nonce_bytes, ciphertext) = packed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| DecodeAnomaly::Decrypt)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| DecodeAnomaly::Decrypt)?;

    String::from_utf8(plaintext).map_err(|_| DecodeAnomaly::Decrypt)
}
