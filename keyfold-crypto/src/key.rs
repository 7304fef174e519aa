//! Key material newtypes.
//!
//! Both key types zeroize on drop. Neither is ever serialized in plaintext
//! form; persistence of wrapped keys is the server's concern.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, CryptoResult};

/// Size of a single symmetric key component in bytes.
pub const KEY_SIZE: usize = 32;

/// Master key derived directly from the user's password.
///
/// Only ever used as input to [`crate::stretch_master_key`] and
/// [`crate::derive_master_key_hash`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey(pub(crate) [u8; KEY_SIZE]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// An enc/mac key pair for symmetric envelope operations.
///
/// Produced by stretching a master key or by unwrapping a wrapped key
/// (user key, organization key).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey {
    pub(crate) enc: [u8; KEY_SIZE],
    pub(crate) mac: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn new(enc: [u8; KEY_SIZE], mac: [u8; KEY_SIZE]) -> Self {
        Self { enc, mac }
    }

    /// Splits 64 bytes of unwrapped key material into enc and mac halves.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != KEY_SIZE * 2 {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE * 2,
                actual: bytes.len(),
            });
        }
        let mut enc = [0u8; KEY_SIZE];
        let mut mac = [0u8; KEY_SIZE];
        enc.copy_from_slice(&bytes[..KEY_SIZE]);
        mac.copy_from_slice(&bytes[KEY_SIZE..]);
        Ok(Self { enc, mac })
    }

    pub fn enc_key(&self) -> &[u8; KEY_SIZE] {
        &self.enc
    }

    pub fn mac_key(&self) -> &[u8; KEY_SIZE] {
        &self.mac
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}
