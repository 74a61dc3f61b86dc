use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Bytes of entropy in an OAuth `state` value (128 bits).
pub const STATE_TOKEN_BYTES: usize = 16;

/// Bytes of entropy in a session token (256 bits).
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Generate an OAuth `state` value: 16 random bytes hex-encoded (32 chars).
pub fn generate_state_token() -> String {
    random_hex(STATE_TOKEN_BYTES)
}

/// Generate a session token: 32 random bytes hex-encoded (64 chars).
///
/// State and session tokens differ in length, so the two namespaces in the
/// credential store can never collide.
pub fn generate_session_token() -> String {
    random_hex(SESSION_TOKEN_BYTES)
}

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short, non-reversible identifier for a token, safe to put in logs.
pub fn token_fingerprint(token: &str) -> String {
    hash_token(token).chars().take(8).collect()
}

/// Generate `n` bytes from the OS CSPRNG and return them hex-encoded.
fn random_hex(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_token_has_128_bits_of_hex() {
        let state = generate_state_token();
        assert_eq!(state.len(), 32);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn session_token_has_256_bits_of_hex() {
        let token = generate_session_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_are_not_repeated() {
        assert_ne!(generate_session_token(), generate_session_token());
        assert_ne!(generate_state_token(), generate_state_token());
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let token = "abc123";
        assert_eq!(token_fingerprint(token), token_fingerprint(token));
        assert_eq!(token_fingerprint(token).len(), 8);
        assert!(hash_token(token).starts_with(&token_fingerprint(token)));
    }
}
