//! Key-management provider contract and the local in-process provider.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rand::RngCore;
use zeroize::Zeroizing;

use betrace_types::TenantId;

use crate::error::KeyError;

/// Length of the Ed25519 seed handed out as a data key.
pub const DATA_KEY_LEN: usize = 32;

const NONCE_LEN: usize = 16;

/// A freshly generated data key: the plaintext exists only in memory and
/// zeroizes on drop; the ciphertext is safe to persist.
pub struct DataKey {
    pub plaintext: Zeroizing<Vec<u8>>,
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("plaintext", &"<redacted>")
            .field("ciphertext", &self.ciphertext)
            .finish()
    }
}

/// Narrow contract over the external key-management service.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn generate_data_key(&self, tenant: TenantId) -> Result<DataKey, KeyError>;

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &str,
    ) -> Result<Zeroizing<Vec<u8>>, KeyError>;

    async fn encrypt(&self, plaintext: &[u8], context: &str) -> Result<Vec<u8>, KeyError>;
}

/// In-process provider for tests and local runs.
///
/// Envelope encryption with a keyed BLAKE3 keystream bound to the caller's
/// context string; a random nonce is prepended to the ciphertext. Not a
/// substitute for a real KMS, but honest about the contract: plaintext in,
/// opaque bytes out.
pub struct LocalKeyProvider {
    master: [u8; 32],
    unavailable: AtomicBool,
}

impl LocalKeyProvider {
    pub fn new() -> Self {
        let mut master = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut master);
        Self {
            master,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate provider outage: while set, every call fails with
    /// [`KeyError::ProviderUnavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), KeyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(KeyError::ProviderUnavailable("provider offline".into()));
        }
        Ok(())
    }

    fn keystream(&self, nonce: &[u8], context: &str, len: usize) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new_keyed(&self.master);
        hasher.update(context.as_bytes());
        hasher.update(nonce);
        let mut out = vec![0u8; len];
        hasher.finalize_xof().fill(&mut out);
        out
    }
}

impl Default for LocalKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyProvider for LocalKeyProvider {
    async fn generate_data_key(&self, tenant: TenantId) -> Result<DataKey, KeyError> {
        self.check_available()?;
        let mut seed = Zeroizing::new(vec![0u8; DATA_KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut seed);
        let ciphertext = self.encrypt(&seed, &tenant.to_string()).await?;
        Ok(DataKey {
            plaintext: seed,
            ciphertext,
        })
    }

    async fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &str,
    ) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        self.check_available()?;
        if ciphertext.len() < NONCE_LEN {
            return Err(KeyError::InvalidKeyMaterial("ciphertext too short".into()));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_LEN);
        let stream = self.keystream(nonce, context, body.len());
        let mut plaintext = Zeroizing::new(body.to_vec());
        for (byte, k) in plaintext.iter_mut().zip(stream.iter()) {
            *byte ^= k;
        }
        Ok(plaintext)
    }

    async fn encrypt(&self, plaintext: &[u8], context: &str) -> Result<Vec<u8>, KeyError> {
        self.check_available()?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let stream = self.keystream(&nonce, context, plaintext.len());
        let mut out = Vec::with_capacity(NONCE_LEN + plaintext.len());
        out.extend_from_slice(&nonce);
        out.extend(plaintext.iter().zip(stream.iter()).map(|(p, k)| p ^ k));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encrypt_decrypt_round_trip() {
        let provider = LocalKeyProvider::new();
        let ciphertext = provider.encrypt(b"secret seed", "tenant-a").await.unwrap();
        assert_ne!(&ciphertext[NONCE_LEN..], b"secret seed".as_slice());

        let plaintext = provider.decrypt(&ciphertext, "tenant-a").await.unwrap();
        assert_eq!(plaintext.as_slice(), b"secret seed");
    }

    #[tokio::test]
    async fn decryption_is_context_bound() {
        let provider = LocalKeyProvider::new();
        let ciphertext = provider.encrypt(b"secret", "tenant-a").await.unwrap();
        let wrong = provider.decrypt(&ciphertext, "tenant-b").await.unwrap();
        assert_ne!(wrong.as_slice(), b"secret");
    }

    #[tokio::test]
    async fn generated_data_key_decrypts_to_plaintext() {
        let provider = LocalKeyProvider::new();
        let tenant = TenantId::generate();
        let key = provider.generate_data_key(tenant).await.unwrap();
        assert_eq!(key.plaintext.len(), DATA_KEY_LEN);

        let recovered = provider
            .decrypt(&key.ciphertext, &tenant.to_string())
            .await
            .unwrap();
        assert_eq!(recovered.as_slice(), key.plaintext.as_slice());
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let provider = LocalKeyProvider::new();
        provider.set_unavailable(true);
        let err = provider
            .generate_data_key(TenantId::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, KeyError::ProviderUnavailable(_)));
    }

    #[tokio::test]
    async fn truncated_ciphertext_is_rejected() {
        let provider = LocalKeyProvider::new();
        let err = provider.decrypt(&[1, 2, 3], "ctx").await.unwrap_err();
        assert!(matches!(err, KeyError::InvalidKeyMaterial(_)));
    }
}
