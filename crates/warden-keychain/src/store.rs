use crate::authentication::{AuthorizationError, PersistedAuthentication};
use crate::provenance::SigningRequestProvenance;
use crate::secret::{Attributes, Secret, SignedData, StoreId};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("secret not found")]
    NotFound,
    #[error("store {0} is not modifiable")]
    NotModifiable(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
}

/// A backend holding secrets. Implementations must never expose private
/// key material.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    fn id(&self) -> StoreId;
    fn name(&self) -> &str;
    fn is_available(&self) -> bool;
    fn secrets(&self) -> Vec<Secret>;

    /// Returns an ASN.1 DER signature over `data`.
    async fn sign(
        &self,
        data: &[u8],
        secret: &Secret,
        provenance: &SigningRequestProvenance,
    ) -> Result<SignedData, StoreError>;

    async fn verify(
        &self,
        _signature: &[u8],
        _data: &[u8],
        _secret: &Secret,
    ) -> Result<bool, StoreError> {
        Err(StoreError::Unsupported("verify".to_string()))
    }

    fn existing_authorization_context(&self, secret: &Secret) -> Option<PersistedAuthentication>;

    async fn persist_authentication(
        &self,
        secret: &Secret,
        duration: Duration,
    ) -> Result<(), StoreError>;

    async fn reload_secrets(&self);

    /// Bumped whenever the secret list changes.
    fn changes(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

#[async_trait]
pub trait ModifiableCredentialStore: CredentialStore {
    async fn create(&self, name: &str, attributes: Attributes) -> Result<Secret, StoreError>;
    async fn delete(&self, secret: &Secret) -> Result<(), StoreError>;
    async fn rename(&self, secret: &Secret, name: &str) -> Result<(), StoreError>;
}

/// Type-erased store, optionally with its modification interface.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn CredentialStore>,
    modifiable: Option<Arc<dyn ModifiableCredentialStore>>,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            modifiable: None,
        }
    }

    pub fn modifiable<S: ModifiableCredentialStore + 'static>(store: Arc<S>) -> Self {
        Self {
            store: store.clone(),
            modifiable: Some(store),
        }
    }

    pub fn id(&self) -> StoreId {
        self.store.id()
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn is_modifiable(&self) -> bool {
        self.modifiable.is_some()
    }

    fn require_modifiable(&self) -> Result<&Arc<dyn ModifiableCredentialStore>, StoreError> {
        self.modifiable
            .as_ref()
            .ok_or_else(|| StoreError::NotModifiable(self.store.name().to_string()))
    }

    pub async fn create(&self, name: &str, attributes: Attributes) -> Result<Secret, StoreError> {
        self.require_modifiable()?.create(name, attributes).await
    }

    pub async fn delete(&self, secret: &Secret) -> Result<(), StoreError> {
        self.require_modifiable()?.delete(secret).await
    }

    pub async fn rename(&self, secret: &Secret, name: &str) -> Result<(), StoreError> {
        self.require_modifiable()?.rename(secret, name).await
    }
}

impl PartialEq for StoreHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for StoreHandle {}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("id", &self.id())
            .field("name", &self.store.name())
            .field("modifiable", &self.is_modifiable())
            .finish()
    }
}
