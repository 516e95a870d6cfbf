//! In-memory software keys for exercising the agent without hardware.

use crate::authentication::PersistedAuthentication;
use crate::provenance::SigningRequestProvenance;
use crate::secret::{Attributes, Secret, SecretId, SignedData, StoreId};
use crate::store::{CredentialStore, ModifiableCredentialStore, StoreError};
use async_trait::async_trait;
use p256::ecdsa::signature::Signer;
use parking_lot::RwLock;
use rand::rngs::OsRng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use warden_ssh::KeyType;

enum SigningKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
}

impl SigningKey {
    fn sign_der(&self, data: &[u8]) -> Vec<u8> {
        match self {
            SigningKey::P256(key) => {
                let signature: p256::ecdsa::Signature = key.sign(data);
                signature.to_der().as_bytes().to_vec()
            }
            SigningKey::P384(key) => {
                let signature: p384::ecdsa::Signature = key.sign(data);
                signature.to_der().as_bytes().to_vec()
            }
        }
    }
}

struct SoftwareKey {
    secret: Secret,
    signing: SigningKey,
}

pub struct SoftwareStore {
    id: StoreId,
    name: String,
    keys: RwLock<Vec<SoftwareKey>>,
    available: AtomicBool,
    failing: AtomicBool,
    sign_count: AtomicUsize,
    reload_count: AtomicUsize,
    changes: watch::Sender<u64>,
}

impl SoftwareStore {
    pub fn new(name: impl Into<String>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            id: StoreId::new(),
            name: name.into(),
            keys: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            sign_count: AtomicUsize::new(0),
            reload_count: AtomicUsize::new(0),
            changes,
        }
    }

    pub fn generate(&self, name: &str, key_type: KeyType) -> Result<Secret, StoreError> {
        self.generate_with(
            name,
            Attributes {
                key_type,
                requires_authentication: false,
                attribution: None,
            },
        )
    }

    pub fn generate_with(&self, name: &str, attributes: Attributes) -> Result<Secret, StoreError> {
        let (signing, public_key) = match attributes.key_type {
            KeyType::P256 => {
                let key = p256::ecdsa::SigningKey::random(&mut OsRng);
                let point = key.verifying_key().to_encoded_point(false);
                (SigningKey::P256(key), point.as_bytes().to_vec())
            }
            KeyType::P384 => {
                let key = p384::ecdsa::SigningKey::random(&mut OsRng);
                let point = key.verifying_key().to_encoded_point(false);
                (SigningKey::P384(key), point.as_bytes().to_vec())
            }
            other => return Err(StoreError::Unsupported(format!("{other} keys"))),
        };
        let secret = Secret {
            id: SecretId(rand::random::<[u8; 16]>().to_vec()),
            name: name.to_string(),
            key_type: attributes.key_type,
            public_key,
            requires_authentication: attributes.requires_authentication,
            attribution: attributes.attribution,
        };
        self.keys.write().push(SoftwareKey {
            secret: secret.clone(),
            signing,
        });
        self.changes.send_modify(|generation| *generation += 1);
        Ok(secret)
    }

    pub fn sign_count(&self) -> usize {
        self.sign_count.load(Ordering::SeqCst)
    }

    /// Receivers still subscribed to this store's change notifications.
    pub fn change_watchers(&self) -> usize {
        self.changes.receiver_count()
    }

    pub fn reload_count(&self) -> usize {
        self.reload_count.load(Ordering::SeqCst)
    }

    /// Makes every following `sign` fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialStore for SoftwareStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn secrets(&self) -> Vec<Secret> {
        self.keys.read().iter().map(|key| key.secret.clone()).collect()
    }

    async fn sign(
        &self,
        data: &[u8],
        secret: &Secret,
        _provenance: &SigningRequestProvenance,
    ) -> Result<SignedData, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("software store set to fail".to_string()));
        }
        let keys = self.keys.read();
        let key = keys
            .iter()
            .find(|key| key.secret.id == secret.id)
            .ok_or(StoreError::NotFound)?;
        self.sign_count.fetch_add(1, Ordering::SeqCst);
        Ok(SignedData {
            data: key.signing.sign_der(data),
            required_authentication: false,
        })
    }

    async fn verify(
        &self,
        signature: &[u8],
        data: &[u8],
        secret: &Secret,
    ) -> Result<bool, StoreError> {
        warden_ssh::signature::verify(secret.key_type, &secret.public_key, signature, data)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn existing_authorization_context(&self, _secret: &Secret) -> Option<PersistedAuthentication> {
        None
    }

    async fn persist_authentication(
        &self,
        _secret: &Secret,
        _duration: Duration,
    ) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("persist_authentication".to_string()))
    }

    async fn reload_secrets(&self) {
        self.reload_count.fetch_add(1, Ordering::SeqCst);
    }

    fn changes(&self) -> Option<watch::Receiver<u64>> {
        Some(self.changes.subscribe())
    }
}

#[async_trait]
impl ModifiableCredentialStore for SoftwareStore {
    async fn create(&self, name: &str, attributes: Attributes) -> Result<Secret, StoreError> {
        self.generate_with(name, attributes)
    }

    async fn delete(&self, secret: &Secret) -> Result<(), StoreError> {
        {
            let mut keys = self.keys.write();
            let before = keys.len();
            keys.retain(|key| key.secret.id != secret.id);
            if keys.len() == before {
                return Err(StoreError::NotFound);
            }
        }
        self.changes.send_modify(|generation| *generation += 1);
        Ok(())
    }

    async fn rename(&self, secret: &Secret, name: &str) -> Result<(), StoreError> {
        {
            let mut keys = self.keys.write();
            let key = keys
                .iter_mut()
                .find(|key| key.secret.id == secret.id)
                .ok_or(StoreError::NotFound)?;
            key.secret.name = name.to_string();
        }
        self.changes.send_modify(|generation| *generation += 1);
        Ok(())
    }
}
