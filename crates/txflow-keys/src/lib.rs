//! Secret-key and address helpers for the transfer form.
//!
//! Flow: raw input → 0x auto-prefix → shape check → secp256k1 public key
//! → keccak256 → last 20 bytes → EIP-55 checksummed address
//!
//! Nothing here rejects input. Callers use the results as hints and re-check
//! validity when the form is submitted.

use std::str::FromStr;

use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::SecretKey;
use rust_decimal::Decimal;
use sha3::{Digest, Keccak256};
use txflow_types::hex_to_bytes;

/// Length of a secret key in hex characters, without prefix.
const SECRET_HEX_LEN: usize = 64;

/// Length of an address in hex characters, without prefix.
const ADDRESS_HEX_LEN: usize = 40;

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Auto-prefix a pasted secret key.
///
/// Exactly 64 hex characters (after trimming) gain a `0x` prefix; anything
/// else is returned as typed.
pub fn normalize_secret_input(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() == SECRET_HEX_LEN && is_hex(trimmed) {
        format!("0x{}", trimmed)
    } else {
        raw.to_string()
    }
}

/// Canonical secret-key shape: `0x` followed by 64 hex characters.
pub fn is_secret_key(s: &str) -> bool {
    let s = s.trim();
    match s.strip_prefix("0x") {
        Some(body) => body.len() == SECRET_HEX_LEN && is_hex(body),
        None => false,
    }
}

/// Derive the sender address for a secret key.
///
/// Returns `None` for anything that is not a canonical secret key, including
/// shape-valid values outside the secp256k1 scalar range (zero, >= n).
pub fn derive_address(secret: &str) -> Option<String> {
    if !is_secret_key(secret) {
        return None;
    }
    let bytes = hex_to_bytes(secret.trim()).ok()?;
    let secret_key = SecretKey::from_slice(&bytes).ok()?;

    // Uncompressed SEC1 point: 0x04 || X || Y. The address hashes X || Y.
    let point = secret_key.public_key().to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    Some(to_checksum_address(&hash[12..]))
}

/// EIP-55 encoding of a 20-byte address.
pub fn to_checksum_address(address: &[u8]) -> String {
    let lower = hex::encode(address);
    let hash = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(lower.len() + 2);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Address check used for both recipient and delegated sender.
///
/// 40 hex characters, `0x` optional. Single-case input is accepted as is;
/// mixed-case input must carry a correct EIP-55 checksum.
pub fn is_valid_address(s: &str) -> bool {
    let body = s.strip_prefix("0x").unwrap_or(s);
    if body.len() != ADDRESS_HEX_LEN || !is_hex(body) {
        return false;
    }

    let has_upper = body.bytes().any(|b| b.is_ascii_uppercase());
    let has_lower = body.bytes().any(|b| b.is_ascii_lowercase());
    if !(has_upper && has_lower) {
        return true;
    }

    match hex::decode(body) {
        Ok(bytes) => to_checksum_address(&bytes)[2..] == *body,
        Err(_) => false,
    }
}

/// Parse a user-entered decimal amount. Accepts plain and scientific notation.
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() || s.contains('_') {
        return None;
    }
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// A transfer amount must be a number strictly greater than zero.
pub fn is_valid_amount(s: &str) -> bool {
    matches!(parse_amount(s), Some(value) if value > Decimal::ZERO)
}
