//! Cryptographic engine for keyfold.
//!
//! Implements the vault key hierarchy:
//!
//! 1. **Master key**: derived from the user's password with PBKDF2 or
//!    Argon2id, parameters dictated by the server's prelogin response.
//!    Never stored; derived each time the user unlocks.
//! 2. **Stretched master key**: enc/mac key pair expanded from the master
//!    key via HKDF-SHA256.
//! 3. **User key**: the vault's primary symmetric key, held server-side
//!    wrapped with the stretched master key.
//! 4. **User private key**: RSA key wrapped with the user key, used to
//!    unwrap per-organization keys.
//!
//! All encrypted values travel as self-describing [`Envelope`] strings
//! carrying their own scheme tag, IV, ciphertext, and MAC. Integrity
//! failures are always fatal for the affected value: a MAC mismatch never
//! degrades to a default.

mod error;
pub mod envelope;
pub mod kdf;
mod key;
pub mod totp;

pub use envelope::{
    decrypt_asymmetric, decrypt_private_key, decrypt_symmetric, encrypt_symmetric,
    unwrap_key_with_private, unwrap_symmetric_key, Envelope,
};
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_master_key, derive_master_key_hash, stretch_master_key, KdfParams};
pub use key::{MasterKey, SymmetricKey, KEY_SIZE};
pub use totp::{calculate_totp, calculate_totp_at, TotpError, TotpResult};
