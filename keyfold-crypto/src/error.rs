//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while deriving keys or processing envelopes.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The envelope's MAC did not verify. Tampered data or wrong key;
    /// the ciphertext must not be trusted.
    #[error("MAC verification failed (tampered envelope or wrong key)")]
    MacMismatch,

    #[error("unsupported envelope scheme: {0}")]
    UnsupportedScheme(u8),

    #[error("unsupported KDF identifier: {0}")]
    UnsupportedKdf(u32),

    #[error("malformed envelope: {0}")]
    InvalidEnvelope(String),

    #[error("invalid base64 in envelope: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}
