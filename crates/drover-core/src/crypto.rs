use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context};
use base64::Engine;
use sha2::{Digest, Sha256};

const BLOB_PREFIX: &str = "v1:";
const NONCE_LEN: usize = 12;

/// AES-256-GCM cipher for secret values and provider keys at rest.
///
/// Values are stored as `v1:<base64(nonce || ciphertext)>`. Unprefixed
/// values decrypt to themselves so plaintext rows written before encryption
/// was enabled keep loading.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn from_passphrase(passphrase: &str) -> Self {
        let key = Sha256::digest(passphrase.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key).expect("SHA-256 digest is a valid AES key");
        Self { cipher }
    }

    pub fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("encryption failed: {e}"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(format!(
            "{BLOB_PREFIX}{}",
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> anyhow::Result<String> {
        let Some(encoded) = stored.strip_prefix(BLOB_PREFIX) else {
            return Ok(stored.to_string());
        };
        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("invalid secret blob encoding")?;
        if blob.len() <= NONCE_LEN {
            anyhow::bail!("secret blob too short");
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| anyhow!("decryption failed: {e}"))?;
        String::from_utf8(plaintext).context("decrypted secret is not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cipher = SecretCipher::from_passphrase("test-passphrase");
        let blob = cipher.encrypt("sk-live-12345").unwrap();
        assert!(blob.starts_with("v1:"));
        assert!(!blob.contains("sk-live"));
        assert_eq!(cipher.decrypt(&blob).unwrap(), "sk-live-12345");
    }

    #[test]
    fn nonces_differ_between_calls() {
        let cipher = SecretCipher::from_passphrase("test-passphrase");
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let cipher = SecretCipher::from_passphrase("test-passphrase");
        assert_eq!(cipher.decrypt("raw-value").unwrap(), "raw-value");
    }

    #[test]
    fn wrong_passphrase_fails() {
        let blob = SecretCipher::from_passphrase("one").encrypt("value").unwrap();
        assert!(SecretCipher::from_passphrase("two").decrypt(&blob).is_err());
    }

    #[test]
    fn tampered_blob_fails() {
        let cipher = SecretCipher::from_passphrase("test");
        let blob = cipher.encrypt("value").unwrap();
        let tampered = format!("v1:{}", base64::engine::general_purpose::STANDARD.encode(b"short"));
        assert!(cipher.decrypt(&tampered).is_err());
        let _ = blob;
    }
}
