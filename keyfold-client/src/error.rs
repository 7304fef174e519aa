//! Client error types.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur during login, sync, or vault access.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request: {0}")]
    ServerRejected(String),

    /// The password grant succeeded credential-wise but the device is not
    /// recognized; retry with a device OTP. This is an expected outcome of
    /// the login flow, not a failure.
    #[error("device verification required")]
    TwoFactorRequired,

    #[error("authentication required")]
    AuthRequired,

    /// Stretched master key not present: login (or unlock after SSO) has not
    /// completed, so the vault cannot be decrypted.
    #[error("vault locked: no decryption keys available")]
    VaultLocked,

    #[error("crypto error: {0}")]
    Crypto(#[from] keyfold_crypto::CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
