//! Time-based one-time codes for vault login items.
//!
//! A stored seed is either a full `otpauth://totp/...` URL or a bare base32
//! secret. Each call is a pure function of (seed, time); the caller refreshes
//! on a timer aligned to the period.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use url::Url;

/// Result type for TOTP calculation.
pub type TotpResult<T> = Result<T, TotpError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TotpError {
    /// The seed has no usable `secret`, or the secret is not base32.
    #[error("TOTP seed has no usable secret")]
    InvalidSeed,
}

const DEFAULT_DIGITS: u32 = 6;
const DEFAULT_PERIOD: u64 = 30;

struct Seed {
    secret: Vec<u8>,
    digits: u32,
    period: u64,
}

/// Computes the current code for a seed.
pub fn calculate_totp(seed_url: &str) -> TotpResult<String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    calculate_totp_at(seed_url, now)
}

/// Computes the code for a seed at a fixed unix timestamp.
pub fn calculate_totp_at(seed_url: &str, unix_secs: u64) -> TotpResult<String> {
    let seed = parse_seed(seed_url)?;
    let counter = unix_secs / seed.period;
    Ok(hotp(&seed.secret, counter, seed.digits))
}

fn parse_seed(seed: &str) -> TotpResult<Seed> {
    let seed = seed.trim();
    if seed.is_empty() {
        return Err(TotpError::InvalidSeed);
    }

    if seed.starts_with("otpauth://") {
        let url = Url::parse(seed).map_err(|_| TotpError::InvalidSeed)?;
        let mut secret = None;
        let mut digits = DEFAULT_DIGITS;
        let mut period = DEFAULT_PERIOD;

        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "secret" => secret = base32_decode(&v),
                "digits" => digits = v.parse().unwrap_or(DEFAULT_DIGITS),
                "period" => period = v.parse().unwrap_or(DEFAULT_PERIOD),
                _ => {}
            }
        }

        let secret = secret.filter(|s| !s.is_empty()).ok_or(TotpError::InvalidSeed)?;
        if period == 0 {
            return Err(TotpError::InvalidSeed);
        }
        // 10^digits must stay in u32 range; anything odd falls back to 6.
        if !(1..=9).contains(&digits) {
            digits = DEFAULT_DIGITS;
        }
        Ok(Seed { secret, digits, period })
    } else {
        // Bare base32 seed; providers often insert spaces for readability.
        let compact: String = seed.split_whitespace().collect();
        let secret = base32_decode(&compact)
            .filter(|s| !s.is_empty())
            .ok_or(TotpError::InvalidSeed)?;
        Ok(Seed {
            secret,
            digits: DEFAULT_DIGITS,
            period: DEFAULT_PERIOD,
        })
    }
}

/// RFC 4226 HOTP with SHA-1 and dynamic truncation, zero-padded.
fn hotp(secret: &[u8], counter: u64, digits: u32) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret)
        .expect("HMAC accepts any key length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[19] & 0x0f) as usize;
    let binary = (u32::from(digest[offset] & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);

    let code = binary % 10u32.pow(digits);
    format!("{code:0width$}", width = digits as usize)
}

/// RFC 4648 base32 decode, case-insensitive, padding optional.
fn base32_decode(s: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    let mut bits: u32 = 0;
    let mut nbits: u32 = 0;
    let mut out = Vec::with_capacity(s.len() * 5 / 8);

    for b in s.trim_end_matches('=').bytes() {
        let b = b.to_ascii_uppercase();
        let value = ALPHABET.iter().position(|&a| a == b)? as u32;
        bits = (bits << 5) | value;
        nbits += 5;
        if nbits >= 8 {
            nbits -= 8;
            out.push((bits >> nbits) as u8);
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 test secret: base32 of "12345678901234567890".
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn rfc6238_reference_vectors() {
        let url = format!("otpauth://totp/acme:user?secret={RFC_SECRET}&digits=6&period=30");
        assert_eq!(calculate_totp_at(&url, 59).unwrap(), "287082");
        assert_eq!(calculate_totp_at(&url, 1_111_111_109).unwrap(), "081804");
        assert_eq!(calculate_totp_at(&url, 1_111_111_111).unwrap(), "050471");
    }

    #[test]
    fn eight_digit_codes() {
        let url = format!("otpauth://totp/acme?secret={RFC_SECRET}&digits=8");
        assert_eq!(calculate_totp_at(&url, 59).unwrap(), "94287082");
    }

    #[test]
    fn bare_base32_seed_uses_defaults() {
        assert_eq!(calculate_totp_at(RFC_SECRET, 59).unwrap(), "287082");
        // lowercase and spaces tolerated
        assert_eq!(
            calculate_totp_at("gezd gnbv gy3t qojq gezd gnbv gy3t qojq", 59).unwrap(),
            "287082"
        );
    }

    #[test]
    fn custom_period_changes_counter() {
        let url = format!("otpauth://totp/acme?secret={RFC_SECRET}&period=60");
        let at_59 = calculate_totp_at(&url, 59).unwrap();
        let at_61 = calculate_totp_at(&url, 61).unwrap();
        // Same 60s window, unlike the default 30s period.
        assert_eq!(at_59, at_61);
    }

    #[test]
    fn missing_secret_is_invalid_seed() {
        assert_eq!(
            calculate_totp_at("otpauth://totp/acme:user?digits=6", 0),
            Err(TotpError::InvalidSeed)
        );
        assert_eq!(
            calculate_totp_at("otpauth://totp/acme?secret=", 0),
            Err(TotpError::InvalidSeed)
        );
        assert_eq!(calculate_totp_at("", 0), Err(TotpError::InvalidSeed));
        assert_eq!(
            calculate_totp_at("not!base32@all", 0),
            Err(TotpError::InvalidSeed)
        );
    }

    #[test]
    fn zero_period_is_invalid_seed() {
        let url = format!("otpauth://totp/acme?secret={RFC_SECRET}&period=0");
        assert_eq!(calculate_totp_at(&url, 59), Err(TotpError::InvalidSeed));
    }
}
