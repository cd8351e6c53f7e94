//! ============================================================================
//! Key Derivation - Per-owner AES keys from a master secret
//! ============================================================================
//! HKDF-SHA256(master secret, salt, info = owner id). Every record of one
//! owner uses the same key; keys of different owners are independent.
//! Nothing is cached, so concurrent derivations cannot race.
//! ============================================================================

use hkdf::Hkdf;
use sha2::Sha256;

use crate::types::CoreError;

/// Minimum accepted master secret length in bytes
pub const MIN_SECRET_LEN: usize = 32;

/// AES-256 key length
pub const KEY_LEN: usize = 32;

const KEY_SALT: &[u8] = b"convo-transcript-protection-v1";

/// Derives owner keys from the process master secret
#[derive(Clone)]
pub struct KeyDeriver {
    secret: Vec<u8>,
}

impl KeyDeriver {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, CoreError> {
        let secret = secret.as_ref();
        if secret.len() < MIN_SECRET_LEN {
            return Err(CoreError::Encryption(format!(
                "Master secret must be at least {} bytes (got {})",
                MIN_SECRET_LEN,
                secret.len()
            )));
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    /// Derive the 256-bit key for `owner_id`
    pub fn derive(&self, owner_id: &str) -> Result<[u8; KEY_LEN], CoreError> {
        let hk = Hkdf::<Sha256>::new(Some(KEY_SALT), &self.secret);
        let mut key = [0u8; KEY_LEN];
        hk.expand(owner_id.as_bytes(), &mut key)
            .map_err(|e| CoreError::Encryption(format!("Key derivation failed: {}", e)))?;
        Ok(key)
    }
}

impl std::fmt::Debug for KeyDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDeriver")
            .field("secret", &"<redacted>")
            .finish()
    }
}
