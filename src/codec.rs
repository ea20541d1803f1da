//! Reversible obfuscation codec standing in for transport encryption
//!
//! The text is XORed byte-wise against a repeating shared key and then
//! base64 encoded. It is deliberately weak: the attacker role is meant to
//! recover it.

use base64::Engine;

/// Shared secret used by every party in the simulation
pub const SECRET_KEY: &str = "SECURE_SIM_KEY_2024";

/// Key marker recorded when transport security is off
pub const NO_KEY: &str = "NONE";

/// Returned by [`decode`] when the input is not something [`encode`] produced
pub const DECODE_FAILURE: &str = "[DECRYPTION_ERROR_INVALID_FORMAT]";

fn xor_with_key(bytes: &[u8]) -> Vec<u8> {
    let key = SECRET_KEY.as_bytes();
    bytes
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()])
        .collect()
}

/// Obfuscates plaintext into its "ciphertext" form
pub fn encode(text: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(xor_with_key(text.as_bytes()))
}

/// Reverses [`encode`], returning `None` on malformed input
pub fn try_decode(cipher: &str) -> Option<String> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(cipher.trim())
        .ok()?;
    String::from_utf8(xor_with_key(&raw)).ok()
}

/// Reverses [`encode`]. Never fails: malformed input yields [`DECODE_FAILURE`].
pub fn decode(cipher: &str) -> String {
    try_decode(cipher).unwrap_or_else(|| DECODE_FAILURE.to_string())
}

/// True if `decoded` is the failure sentinel
pub fn is_failure(decoded: &str) -> bool {
    decoded == DECODE_FAILURE
}

/// Key to record in the ledger for the given transport-security state
pub fn key_marker(encrypted: bool) -> &'static str {
    if encrypted {
        SECRET_KEY
    } else {
        NO_KEY
    }
}
