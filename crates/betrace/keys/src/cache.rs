//! TTL cache over the key provider, with per-tenant fetch coalescing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use tokio::sync::Mutex;
use tracing::{info, warn};

use betrace_types::TenantId;

use crate::error::KeyError;
use crate::provider::{KeyProvider, DATA_KEY_LEN};

/// Private material TTL: short, bounds exposure of decrypted keys.
pub const DEFAULT_PRIVATE_TTL_SECS: u64 = 3600;

/// Public material TTL: long, public keys are not secret.
pub const DEFAULT_PUBLIC_TTL_SECS: u64 = 86_400;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyState {
    Active,
    /// Superseded by a newer version. Never deleted: still needed to
    /// verify historically signed evidence.
    Rotated,
}

/// Persisted key metadata plus the provider-encrypted private key. Holds
/// no plaintext; safe to store or mirror into the ledger.
#[derive(Clone, Debug)]
pub struct KeyRecord {
    pub tenant_id: TenantId,
    pub version: u32,
    pub state: KeyState,
    pub created_at: DateTime<Utc>,
    pub ciphertext: Vec<u8>,
    pub public_key: VerifyingKey,
}

/// A decrypted signing key, held only inside the cache. The underlying
/// Ed25519 key zeroizes itself on drop.
pub struct KeyHandle {
    pub tenant_id: TenantId,
    pub version: u32,
    signing: SigningKey,
}

impl KeyHandle {
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }
}

struct CacheEntry {
    handle: Arc<KeyHandle>,
    expires_at: Instant,
}

/// Cache-first access to per-tenant signing keys.
///
/// On a miss the provider is called at most once per tenant regardless of
/// how many callers race the fetch (per-tenant async mutex). Rotation
/// marks the prior version `Rotated`, keeps it for verification, and
/// invalidates the cache entry immediately.
pub struct KeyCache {
    provider: Arc<dyn KeyProvider>,
    records: DashMap<TenantId, Vec<KeyRecord>>,
    cache: DashMap<TenantId, CacheEntry>,
    inflight: DashMap<TenantId, Arc<Mutex<()>>>,
    private_ttl: Duration,
}

impl KeyCache {
    pub fn new(provider: Arc<dyn KeyProvider>) -> Self {
        Self::with_ttl(provider, Duration::from_secs(DEFAULT_PRIVATE_TTL_SECS))
    }

    pub fn with_ttl(provider: Arc<dyn KeyProvider>, private_ttl: Duration) -> Self {
        Self {
            provider,
            records: DashMap::new(),
            cache: DashMap::new(),
            inflight: DashMap::new(),
            private_ttl,
        }
    }

    /// Current signing key for a tenant, generating the first version on
    /// first use. Cache-first; misses are coalesced per tenant.
    pub async fn get_signing_key(&self, tenant: TenantId) -> Result<Arc<KeyHandle>, KeyError> {
        if let Some(handle) = self.cached(tenant) {
            return Ok(handle);
        }

        let gate = self
            .inflight
            .entry(tenant)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        // A coalesced caller may have populated the cache while we waited.
        if let Some(handle) = self.cached(tenant) {
            return Ok(handle);
        }

        let handle = match self.active_record(tenant) {
            Some(record) => self.decrypt_record(&record).await?,
            None => self.provision(tenant).await?,
        };
        let handle = Arc::new(handle);
        self.cache.insert(
            tenant,
            CacheEntry {
                handle: Arc::clone(&handle),
                expires_at: Instant::now() + self.private_ttl,
            },
        );
        Ok(handle)
    }

    /// Public key for signature verification. `version: None` means the
    /// currently active key. Rotated versions remain resolvable forever.
    pub fn verifying_key(
        &self,
        tenant: TenantId,
        version: Option<u32>,
    ) -> Result<VerifyingKey, KeyError> {
        let records = self
            .records
            .get(&tenant)
            .ok_or(KeyError::KeyNotFound(tenant))?;
        let record = match version {
            Some(version) => records.iter().find(|r| r.version == version),
            None => records.iter().find(|r| r.state == KeyState::Active),
        };
        record
            .map(|r| r.public_key)
            .ok_or(KeyError::KeyNotFound(tenant))
    }

    /// Generate new key material and supersede the current version.
    /// Provider failure aborts the rotation: the existing key stays
    /// active and the cache is untouched.
    pub async fn rotate_key(&self, tenant: TenantId) -> Result<(), KeyError> {
        let gate = self
            .inflight
            .entry(tenant)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        let record = match self.make_record(tenant).await {
            Ok(record) => record,
            Err(err) => {
                warn!(tenant = %tenant, "key rotation aborted, prior key stays active: {err}");
                return Err(err);
            }
        };

        let mut records = self.records.entry(tenant).or_default();
        for prior in records.iter_mut() {
            prior.state = KeyState::Rotated;
        }
        records.push(record);
        drop(records);

        self.cache.remove(&tenant);
        info!(tenant = %tenant, "signing key rotated");
        Ok(())
    }

    /// Metadata view of a tenant's key history (no plaintext).
    pub fn key_records(&self, tenant: TenantId) -> Vec<KeyRecord> {
        self.records
            .get(&tenant)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn cached(&self, tenant: TenantId) -> Option<Arc<KeyHandle>> {
        let entry = self.cache.get(&tenant)?;
        if entry.expires_at <= Instant::now() {
            drop(entry);
            // Expired plaintext is discarded eagerly, not lazily.
            self.cache.remove(&tenant);
            return None;
        }
        Some(Arc::clone(&entry.handle))
    }

    fn active_record(&self, tenant: TenantId) -> Option<KeyRecord> {
        self.records
            .get(&tenant)?
            .iter()
            .find(|r| r.state == KeyState::Active)
            .cloned()
    }

    async fn provision(&self, tenant: TenantId) -> Result<KeyHandle, KeyError> {
        let record = self.make_record(tenant).await?;
        let handle = self.decrypt_record(&record).await?;
        self.records.entry(tenant).or_default().push(record);
        Ok(handle)
    }

    async fn make_record(&self, tenant: TenantId) -> Result<KeyRecord, KeyError> {
        let data_key = self.provider.generate_data_key(tenant).await?;
        let signing = signing_key_from_seed(&data_key.plaintext)?;
        let version = self.next_version(tenant);
        Ok(KeyRecord {
            tenant_id: tenant,
            version,
            state: KeyState::Active,
            created_at: Utc::now(),
            ciphertext: data_key.ciphertext,
            public_key: signing.verifying_key(),
        })
    }

    async fn decrypt_record(&self, record: &KeyRecord) -> Result<KeyHandle, KeyError> {
        let seed = self
            .provider
            .decrypt(&record.ciphertext, &record.tenant_id.to_string())
            .await?;
        let signing = signing_key_from_seed(&seed)?;
        if signing.verifying_key() != record.public_key {
            return Err(KeyError::InvalidKeyMaterial(
                "decrypted key does not match recorded public key".into(),
            ));
        }
        Ok(KeyHandle {
            tenant_id: record.tenant_id,
            version: record.version,
            signing,
        })
    }

    fn next_version(&self, tenant: TenantId) -> u32 {
        self.records
            .get(&tenant)
            .and_then(|records| records.iter().map(|r| r.version).max())
            .unwrap_or(0)
            + 1
    }
}

fn signing_key_from_seed(seed: &[u8]) -> Result<SigningKey, KeyError> {
    let bytes: [u8; DATA_KEY_LEN] = seed
        .try_into()
        .map_err(|_| KeyError::InvalidKeyMaterial("seed must be 32 bytes".into()))?;
    Ok(SigningKey::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{DataKey, LocalKeyProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use zeroize::Zeroizing;

    /// Provider wrapper counting calls, for coalescing and TTL tests.
    struct CountingProvider {
        inner: LocalKeyProvider,
        generates: AtomicU64,
        decrypts: AtomicU64,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                inner: LocalKeyProvider::new(),
                generates: AtomicU64::new(0),
                decrypts: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl KeyProvider for CountingProvider {
        async fn generate_data_key(&self, tenant: TenantId) -> Result<DataKey, KeyError> {
            self.generates.fetch_add(1, Ordering::SeqCst);
            // Widen the race window so coalescing is actually exercised.
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.generate_data_key(tenant).await
        }

        async fn decrypt(
            &self,
            ciphertext: &[u8],
            context: &str,
        ) -> Result<Zeroizing<Vec<u8>>, KeyError> {
            self.decrypts.fetch_add(1, Ordering::SeqCst);
            self.inner.decrypt(ciphertext, context).await
        }

        async fn encrypt(&self, plaintext: &[u8], context: &str) -> Result<Vec<u8>, KeyError> {
            self.inner.encrypt(plaintext, context).await
        }
    }

    #[tokio::test]
    async fn first_use_provisions_and_caches() {
        let provider = Arc::new(CountingProvider::new());
        let cache = KeyCache::new(Arc::clone(&provider) as Arc<dyn KeyProvider>);
        let tenant = TenantId::generate();

        let first = cache.get_signing_key(tenant).await.unwrap();
        let second = cache.get_signing_key(tenant).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.verifying_key(), second.verifying_key());
        assert_eq!(provider.generates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sign_verify_round_trip() {
        let cache = KeyCache::new(Arc::new(LocalKeyProvider::new()));
        let tenant = TenantId::generate();
        let handle = cache.get_signing_key(tenant).await.unwrap();

        let signature = handle.sign(b"evidence bytes");
        let public = cache.verifying_key(tenant, None).unwrap();
        assert!(public.verify_strict(b"evidence bytes", &signature).is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_misses_coalesce_to_one_provider_call() {
        let provider = Arc::new(CountingProvider::new());
        let cache = Arc::new(KeyCache::new(
            Arc::clone(&provider) as Arc<dyn KeyProvider>
        ));
        let tenant = TenantId::generate();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(
                async move { cache.get_signing_key(tenant).await },
            ));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(provider.generates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_refetch_through_provider() {
        let provider = Arc::new(CountingProvider::new());
        let cache = KeyCache::with_ttl(
            Arc::clone(&provider) as Arc<dyn KeyProvider>,
            Duration::from_millis(10),
        );
        let tenant = TenantId::generate();

        cache.get_signing_key(tenant).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.get_signing_key(tenant).await.unwrap();

        // One generate on first use, one decrypt after expiry.
        assert_eq!(provider.generates.load(Ordering::SeqCst), 1);
        assert!(provider.decrypts.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn rotation_supersedes_but_retains_prior_version() {
        let cache = KeyCache::new(Arc::new(LocalKeyProvider::new()));
        let tenant = TenantId::generate();

        let v1 = cache.get_signing_key(tenant).await.unwrap();
        let v1_public = v1.verifying_key();
        let signature = v1.sign(b"old evidence");

        cache.rotate_key(tenant).await.unwrap();
        let v2 = cache.get_signing_key(tenant).await.unwrap();
        assert_eq!(v2.version, 2);
        assert_ne!(v2.verifying_key(), v1_public);

        // Historical evidence still verifies against the rotated key.
        let old_public = cache.verifying_key(tenant, Some(1)).unwrap();
        assert_eq!(old_public, v1_public);
        assert!(old_public.verify_strict(b"old evidence", &signature).is_ok());

        let records = cache.key_records(tenant);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].state, KeyState::Rotated);
        assert_eq!(records[1].state, KeyState::Active);
    }

    #[tokio::test]
    async fn failed_rotation_leaves_current_key_active() {
        let provider = Arc::new(LocalKeyProvider::new());
        let cache = KeyCache::new(Arc::clone(&provider) as Arc<dyn KeyProvider>);
        let tenant = TenantId::generate();

        let before = cache.get_signing_key(tenant).await.unwrap();
        provider.set_unavailable(true);
        let err = cache.rotate_key(tenant).await.unwrap_err();
        assert!(matches!(err, KeyError::ProviderUnavailable(_)));
        provider.set_unavailable(false);

        let after = cache.get_signing_key(tenant).await.unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.verifying_key(), before.verifying_key());
    }

    #[tokio::test]
    async fn unknown_tenant_has_no_verifying_key() {
        let cache = KeyCache::new(Arc::new(LocalKeyProvider::new()));
        let tenant = TenantId::generate();
        assert_eq!(
            cache.verifying_key(tenant, None).unwrap_err(),
            KeyError::KeyNotFound(tenant)
        );
    }
}
