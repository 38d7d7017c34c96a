//! Refresh-token generation and hashing.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Token byte length before hex encoding (32 bytes = 64 hex chars).
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Raw refresh token, handed to the client exactly once.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

impl RefreshToken {
    /// Generate a fresh high-entropy token from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Storage form of this token.
    pub fn hash(&self) -> String {
        hash_refresh_token(&self.0)
    }
}

impl core::fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("RefreshToken(<redacted>)")
    }
}

/// SHA-256, single pass: tokens are already high-entropy, so no stretching.
pub fn hash_refresh_token(token: &str) -> String {
    let mut h = Sha256::new();
    h.update(token.as_bytes());
    hex::encode(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_unique() {
        let a = RefreshToken::generate();
        let b = RefreshToken::generate();
        assert_eq!(a.expose().len(), REFRESH_TOKEN_BYTES * 2);
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_stable_and_not_the_token() {
        let t = RefreshToken::generate();
        assert_eq!(t.hash(), hash_refresh_token(t.expose()));
        assert_ne!(t.hash(), t.expose());
        assert_eq!(t.hash().len(), 64);
    }

    #[test]
    fn debug_is_redacted() {
        let t = RefreshToken::generate();
        assert!(!format!("{t:?}").contains(t.expose()));
    }
}
