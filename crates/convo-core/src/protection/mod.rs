//! ============================================================================
//! Protection Module - Per-record transcript protection
//! ============================================================================
//! Two-tier policy applied to sensitive fields right before persistence and
//! right after loading:
//!
//! - **standard**: zlib-compressed, hex-encoded
//! - **enhanced**: compressed as above, then AES-256-GCM encrypted with a key
//!   derived from the owner id
//!
//! ## Usage
//! ```rust,ignore
//! use convo_core::protection::{ProtectionCodec, DecodeOutcome};
//!
//! let codec = ProtectionCodec::new(master_secret)?;
//! let stored = codec.encode(&segments, owner_id, ProtectionLevel::Enhanced)?;
//! match codec.decode(&stored, owner_id) {
//!     DecodeOutcome::Decoded(segments) => { /* ... */ }
//!     DecodeOutcome::PassedThrough { anomaly, .. } => { /* legacy or corrupt */ }
//! }
//! ```
//! ============================================================================

mod codec;
mod keys;

pub use codec::{
    CodecDiagnostics, DecodeAnomaly, DecodeOutcome, DiagnosticsSnapshot, ProtectionCodec,
    StoredPayload, StoredTranscript, TextOutcome,
};
pub use keys::{KeyDeriver, KEY_LEN, MIN_SECRET_LEN};
