//! Token derivation.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

/// Derive a collision-resistant token from `input`.
///
/// A fresh 32-byte salt from the OS is mixed into the digest, so concurrent
/// calls never collide even when they share the same input.
pub fn generate(input: &str) -> Result<String> {
    let mut salt = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut salt)
        .context("failed to generate token salt")?;
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hasher.update(salt);
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

/// Hash a credential for storage lookups; raw credentials never touch the
/// database.
#[must_use]
pub fn hash_credential(credential: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[tokio::test]
    async fn generate_cannot_repeat_concurrently() -> Result<()> {
        let mut handles = Vec::with_capacity(10);
        for _ in 0..10 {
            handles.push(tokio::spawn(async { generate("user-token") }));
        }
        let mut tokens = Vec::with_capacity(handles.len());
        for handle in handles {
            tokens.push(handle.await??);
        }
        for (i, token) in tokens.iter().enumerate() {
            for other in &tokens[i + 1..] {
                assert_ne!(token, other);
            }
        }
        Ok(())
    }

    #[test]
    fn generate_differs_for_same_input() -> Result<()> {
        let first = generate("pure@alanis.com")?;
        let second = generate("pure@alanis.com")?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn generate_encodes_a_sha256_digest() -> Result<()> {
        let token = generate("input")?;
        let decoded = URL_SAFE_NO_PAD.decode(token.as_bytes())?;
        assert_eq!(decoded.len(), 32);
        Ok(())
    }

    #[test]
    fn hash_credential_stable() {
        let first = hash_credential("token");
        let second = hash_credential("token");
        let different = hash_credential("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }
}
