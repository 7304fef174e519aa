//! Scheme-tagged encrypted envelopes.
//!
//! The wire/storage form is `"<scheme>.<iv>|<ct>|<mac>"` for symmetric
//! envelopes (scheme 2, AES-256-CBC + HMAC-SHA256) and `"<scheme>.<ct>"`
//! for asymmetric ones (scheme 4, RSA-OAEP-SHA1), all parts base64.
//!
//! Decryption refuses an envelope whose scheme does not match the key kind,
//! and verifies the MAC in constant time before touching the ciphertext.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Oaep, RsaPrivateKey};
use sha1::Sha1;
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;

use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const SCHEME_AES_CBC_HMAC: u8 = 2;
const SCHEME_RSA_OAEP_SHA1: u8 = 4;

/// A parsed encrypted envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    /// Scheme 2: AES-256-CBC ciphertext authenticated by HMAC-SHA256(iv ‖ ct).
    AesCbcHmac {
        iv: Vec<u8>,
        ciphertext: Vec<u8>,
        mac: Vec<u8>,
    },
    /// Scheme 4: RSA-OAEP with SHA-1 digest and MGF1-SHA1.
    RsaOaepSha1 { ciphertext: Vec<u8> },
}

impl Envelope {
    pub fn scheme(&self) -> u8 {
        match self {
            Envelope::AesCbcHmac { .. } => SCHEME_AES_CBC_HMAC,
            Envelope::RsaOaepSha1 { .. } => SCHEME_RSA_OAEP_SHA1,
        }
    }
}

impl FromStr for Envelope {
    type Err = CryptoError;

    fn from_str(s: &str) -> CryptoResult<Self> {
        let (scheme, body) = s
            .split_once('.')
            .ok_or_else(|| CryptoError::InvalidEnvelope("missing scheme separator".into()))?;
        let scheme: u8 = scheme
            .parse()
            .map_err(|_| CryptoError::InvalidEnvelope(format!("non-numeric scheme {scheme:?}")))?;

        match scheme {
            SCHEME_AES_CBC_HMAC => {
                let mut parts = body.split('|');
                let (iv, ct, mac) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
                    (Some(iv), Some(ct), Some(mac), None) => (iv, ct, mac),
                    _ => {
                        return Err(CryptoError::InvalidEnvelope(
                            "scheme 2 requires iv|ciphertext|mac".into(),
                        ))
                    }
                };
                Ok(Envelope::AesCbcHmac {
                    iv: STANDARD.decode(iv)?,
                    ciphertext: STANDARD.decode(ct)?,
                    mac: STANDARD.decode(mac)?,
                })
            }
            SCHEME_RSA_OAEP_SHA1 => {
                if body.contains('|') {
                    return Err(CryptoError::InvalidEnvelope(
                        "scheme 4 carries a single ciphertext part".into(),
                    ));
                }
                Ok(Envelope::RsaOaepSha1 {
                    ciphertext: STANDARD.decode(body)?,
                })
            }
            other => Err(CryptoError::UnsupportedScheme(other)),
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::AesCbcHmac { iv, ciphertext, mac } => write!(
                f,
                "{}.{}|{}|{}",
                SCHEME_AES_CBC_HMAC,
                STANDARD.encode(iv),
                STANDARD.encode(ciphertext),
                STANDARD.encode(mac)
            ),
            Envelope::RsaOaepSha1 { ciphertext } => {
                write!(f, "{}.{}", SCHEME_RSA_OAEP_SHA1, STANDARD.encode(ciphertext))
            }
        }
    }
}

/// Encrypts plaintext into a scheme-2 envelope with a random IV.
pub fn encrypt_symmetric(key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<Envelope> {
    let mut iv = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(key.enc_key().into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut mac = HmacSha256::new_from_slice(key.mac_key())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    mac.update(&iv);
    mac.update(&ciphertext);
    let mac = mac.finalize().into_bytes().to_vec();

    Ok(Envelope::AesCbcHmac {
        iv: iv.to_vec(),
        ciphertext,
        mac,
    })
}

/// Decrypts a scheme-2 envelope.
///
/// The MAC over iv ‖ ciphertext is recomputed and compared in constant time
/// before any decryption happens. A mismatch is fatal for this value.
pub fn decrypt_symmetric(key: &SymmetricKey, envelope: &Envelope) -> CryptoResult<Vec<u8>> {
    let (iv, ciphertext, mac) = match envelope {
        Envelope::AesCbcHmac { iv, ciphertext, mac } => (iv, ciphertext, mac),
        other => return Err(CryptoError::UnsupportedScheme(other.scheme())),
    };

    let mut expected = HmacSha256::new_from_slice(key.mac_key())
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    expected.update(iv);
    expected.update(ciphertext);
    expected
        .verify_slice(mac)
        .map_err(|_| CryptoError::MacMismatch)?;

    if iv.len() != 16 {
        return Err(CryptoError::InvalidEnvelope(format!(
            "bad IV length {}",
            iv.len()
        )));
    }
    let mut iv_arr = [0u8; 16];
    iv_arr.copy_from_slice(iv);

    Aes256CbcDec::new(key.enc_key().into(), &iv_arr.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Decryption("bad PKCS7 padding".into()))
}

/// Decrypts a scheme-4 envelope with an RSA private key.
pub fn decrypt_asymmetric(
    private_key: &RsaPrivateKey,
    envelope: &Envelope,
) -> CryptoResult<Vec<u8>> {
    let ciphertext = match envelope {
        Envelope::RsaOaepSha1 { ciphertext } => ciphertext,
        other => return Err(CryptoError::UnsupportedScheme(other.scheme())),
    };

    private_key
        .decrypt(Oaep::new::<Sha1>(), ciphertext)
        .map_err(|e| CryptoError::Decryption(format!("RSA-OAEP failed: {e}")))
}

/// Unwraps a wrapped symmetric key (64 bytes → enc/mac pair).
pub fn unwrap_symmetric_key(key: &SymmetricKey, envelope: &Envelope) -> CryptoResult<SymmetricKey> {
    let material = decrypt_symmetric(key, envelope)?;
    SymmetricKey::from_bytes(&material)
}

/// Unwraps a key wrapped for an RSA private key (organization keys).
pub fn unwrap_key_with_private(
    private_key: &RsaPrivateKey,
    envelope: &Envelope,
) -> CryptoResult<SymmetricKey> {
    let material = decrypt_asymmetric(private_key, envelope)?;
    SymmetricKey::from_bytes(&material)
}

/// Decrypts and parses the user's wrapped RSA private key (PKCS#8 DER).
pub fn decrypt_private_key(key: &SymmetricKey, envelope: &Envelope) -> CryptoResult<RsaPrivateKey> {
    let der = decrypt_symmetric(key, envelope)?;
    RsaPrivateKey::from_pkcs8_der(&der)
        .map_err(|e| CryptoError::Decryption(format!("invalid private key DER: {e}")))
}
