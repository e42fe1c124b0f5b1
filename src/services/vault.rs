use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};

const NONCE_LEN: usize = 12;

/// Encrypted image bytes: 12-byte nonce followed by the AES-256-GCM ciphertext.
pub struct SealedImage(Vec<u8>);

impl SealedImage {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SealedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedImage({} bytes)", self.0.len())
    }
}

/// Keeps uploaded label images encrypted while they sit in the job store.
pub struct ImageVault {
    cipher: Aes256Gcm,
}

impl ImageVault {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, VaultError> {
        use base64::Engine;
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_base64.trim())
            .map_err(|_| VaultError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(VaultError::InvalidKey);
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| VaultError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Vault with a random per-process key; sealed images die with the process.
    pub fn ephemeral() -> Self {
        let key: Key<Aes256Gcm> = Aes256Gcm::generate_key(OsRng);
        Self {
            cipher: Aes256Gcm::new(&key),
        }
    }

    pub fn from_config(key_base64: Option<&str>) -> Result<Self, VaultError> {
        match key_base64 {
            Some(key) if !key.trim().is_empty() => Self::new(key),
            _ => {
                tracing::info!("ENCRYPTION_KEY not set, using an ephemeral image key");
                Ok(Self::ephemeral())
            }
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedImage, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| VaultError::SealFailed)?;

        let mut output = nonce.to_vec();
        output.extend(ciphertext);
        Ok(SealedImage(output))
    }

    pub fn open(&self, sealed: &SealedImage) -> Result<Vec<u8>, VaultError> {
        if sealed.0.len() < NONCE_LEN {
            return Err(VaultError::OpenFailed);
        }

        let (nonce_bytes, ciphertext) = sealed.0.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::OpenFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Failed to seal image")]
    SealFailed,

    #[error("Failed to open sealed image")]
    OpenFailed,
}
