//! Password → master key derivation.
//!
//! The server's prelogin response dictates which KDF applies to an account.
//! PBKDF2 salts with the raw email; Argon2id salts with SHA-256 of the email
//! to get a fixed-length salt.

use argon2::Argon2;
use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::key::{MasterKey, SymmetricKey, KEY_SIZE};

/// KDF configuration fetched during prelogin.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KdfParams {
    Pbkdf2 {
        iterations: u32,
    },
    Argon2id {
        iterations: u32,
        /// Memory cost in KiB.
        memory_kib: u32,
        parallelism: u32,
    },
}

impl KdfParams {
    /// Maps the server's numeric KDF identifier (0 = PBKDF2, 1 = Argon2id)
    /// onto parameters. An unknown identifier is a fatal configuration
    /// error, not something to fall back from.
    pub fn from_server(
        kdf: u32,
        iterations: u32,
        memory_mib: Option<u32>,
        parallelism: Option<u32>,
    ) -> CryptoResult<Self> {
        match kdf {
            0 => Ok(Self::Pbkdf2 { iterations }),
            1 => Ok(Self::Argon2id {
                iterations,
                memory_kib: memory_mib.unwrap_or(64) * 1024,
                parallelism: parallelism.unwrap_or(4),
            }),
            other => Err(CryptoError::UnsupportedKdf(other)),
        }
    }
}

/// Derives the 32-byte master key from password and email.
pub fn derive_master_key(
    password: &str,
    email: &str,
    params: &KdfParams,
) -> CryptoResult<MasterKey> {
    let email = email.trim().to_lowercase();
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);

    match params {
        KdfParams::Pbkdf2 { iterations } => {
            pbkdf2_hmac::<Sha256>(
                password.as_bytes(),
                email.as_bytes(),
                *iterations,
                out.as_mut(),
            );
        }
        KdfParams::Argon2id {
            iterations,
            memory_kib,
            parallelism,
        } => {
            let salt = Sha256::digest(email.as_bytes());
            let argon2_params =
                argon2::Params::new(*memory_kib, *iterations, *parallelism, Some(KEY_SIZE))
                    .map_err(|e| CryptoError::KeyDerivation(format!("invalid argon2 params: {e}")))?;
            let argon2 = Argon2::new(
                argon2::Algorithm::Argon2id,
                argon2::Version::V0x13,
                argon2_params,
            );
            argon2
                .hash_password_into(password.as_bytes(), &salt, out.as_mut())
                .map_err(|e| CryptoError::KeyDerivation(format!("argon2 failed: {e}")))?;
        }
    }

    Ok(MasterKey::from_bytes(*out))
}

/// Derives the server authentication hash: one PBKDF2-HMAC-SHA256 round over
/// the master key, salted with the password. This hash is what goes over the
/// wire as the password-grant credential, never the password itself.
pub fn derive_master_key_hash(master_key: &MasterKey, password: &str) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};

    let mut out = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(master_key.as_bytes(), password.as_bytes(), 1, &mut out);
    STANDARD.encode(out)
}

/// Expands the master key into an enc/mac pair via HKDF-SHA256.
///
/// The master key is used directly as the PRK (no extract step), matching
/// the wire format's key schedule.
pub fn stretch_master_key(master_key: &MasterKey) -> SymmetricKey {
    let hk = Hkdf::<Sha256>::from_prk(master_key.as_bytes())
        .expect("32-byte PRK is always valid for SHA-256");

    let mut enc = [0u8; KEY_SIZE];
    let mut mac = [0u8; KEY_SIZE];
    hk.expand(b"enc", &mut enc)
        .expect("32 bytes is a valid HKDF output length");
    hk.expand(b"mac", &mut mac)
        .expect("32 bytes is a valid HKDF output length");

    SymmetricKey::new(enc, mac)
}
