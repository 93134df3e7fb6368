//! PKCE (Proof Key for Code Exchange, RFC 7636) values.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Error, Result};

/// Challenge method sent to the authorization endpoint.
pub const CHALLENGE_METHOD: &str = "S256";

/// Code verifier and its derived challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    verifier: String,
    challenge: String,
}

impl PkceChallenge {
    /// Generates a fresh pair from 32 random bytes (a 43 character verifier).
    pub fn generate() -> Result<Self> {
        Ok(Self::from_verifier(random_token(32)?))
    }

    /// Derives the challenge for an existing verifier.
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(digest(&SHA256, verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }

    /// The secret kept locally until the code exchange.
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// The value sent with the authorization request.
    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("challenge", &self.challenge)
            .finish_non_exhaustive()
    }
}

/// Random URL-safe token of `len` bytes of entropy, used for `state`.
pub fn random_token(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| Error::AuthDenied("system random generator unavailable".to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
