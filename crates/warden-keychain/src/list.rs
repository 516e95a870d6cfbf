use crate::authentication::PersistedAuthentication;
use crate::provenance::SigningRequestProvenance;
use crate::secret::{AnySecret, Attributes, SignedData};
use crate::store::{CredentialStore, ModifiableCredentialStore, StoreError, StoreHandle};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_ssh::key;

/// Every registered store, searched in registration order.
pub struct StoreList {
    stores: RwLock<Vec<StoreHandle>>,
    changes: Arc<watch::Sender<u64>>,
    forwarders: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for StoreList {
    fn drop(&mut self) {
        for forwarder in self.forwarders.get_mut().drain(..) {
            forwarder.abort();
        }
    }
}

impl Default for StoreList {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreList {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            stores: RwLock::new(Vec::new()),
            changes: Arc::new(changes),
            forwarders: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, store: Arc<dyn CredentialStore>) {
        self.register(StoreHandle::new(store));
    }

    pub fn add_modifiable<S: ModifiableCredentialStore + 'static>(&self, store: Arc<S>) {
        self.register(StoreHandle::modifiable(store));
    }

    fn register(&self, handle: StoreHandle) {
        info!(store = %handle.store().name(), modifiable = handle.is_modifiable(), "store registered");
        if let Some(mut rx) = handle.store().changes() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let changes: Weak<watch::Sender<u64>> = Arc::downgrade(&self.changes);
                    let forwarder = runtime.spawn(async move {
                        while rx.changed().await.is_ok() {
                            let Some(changes) = changes.upgrade() else {
                                break;
                            };
                            changes.send_modify(|generation| *generation += 1);
                        }
                    });
                    self.forwarders.lock().push(forwarder);
                }
                Err(_) => {
                    warn!(store = %handle.store().name(), "no runtime, store changes not forwarded")
                }
            }
        }
        self.stores.write().push(handle);
        self.notify_changed();
    }

    /// Bumps the change counter. Watchers that have not caught up see one
    /// change however many bumps happened in between.
    pub fn notify_changed(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn stores(&self) -> Vec<StoreHandle> {
        self.stores.read().clone()
    }

    pub fn modifiable_store(&self) -> Option<StoreHandle> {
        self.stores
            .read()
            .iter()
            .find(|handle| handle.is_modifiable())
            .cloned()
    }

    pub fn any_available(&self) -> bool {
        self.stores
            .read()
            .iter()
            .any(|handle| handle.store().is_available())
    }

    pub fn secrets(&self) -> Vec<AnySecret> {
        self.stores()
            .iter()
            .flat_map(|handle| {
                let id = handle.id();
                handle
                    .store()
                    .secrets()
                    .into_iter()
                    .map(move |secret| AnySecret::new(id, secret))
            })
            .collect()
    }

    /// First secret whose OpenSSH public key blob equals `key_blob`.
    pub fn secret_matching(&self, key_blob: &[u8]) -> Option<AnySecret> {
        self.secrets()
            .into_iter()
            .find(|secret| key::encode(secret) == key_blob)
    }

    fn store_for(&self, secret: &AnySecret) -> Result<StoreHandle, StoreError> {
        self.stores
            .read()
            .iter()
            .find(|handle| handle.id() == secret.store)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    pub async fn sign(
        &self,
        data: &[u8],
        secret: &AnySecret,
        provenance: &SigningRequestProvenance,
    ) -> Result<SignedData, StoreError> {
        let handle = self.store_for(secret)?;
        handle.store().sign(data, &secret.secret, provenance).await
    }

    pub async fn verify(
        &self,
        signature: &[u8],
        data: &[u8],
        secret: &AnySecret,
    ) -> Result<bool, StoreError> {
        let handle = self.store_for(secret)?;
        handle.store().verify(signature, data, &secret.secret).await
    }

    pub fn existing_authorization_context(
        &self,
        secret: &AnySecret,
    ) -> Option<PersistedAuthentication> {
        self.store_for(secret)
            .ok()?
            .store()
            .existing_authorization_context(&secret.secret)
    }

    pub async fn persist_authentication(
        &self,
        secret: &AnySecret,
        duration: Duration,
    ) -> Result<(), StoreError> {
        let handle = self.store_for(secret)?;
        handle
            .store()
            .persist_authentication(&secret.secret, duration)
            .await
    }

    pub async fn create(&self, name: &str, attributes: Attributes) -> Result<AnySecret, StoreError> {
        let handle = self
            .modifiable_store()
            .ok_or_else(|| StoreError::NotModifiable("no modifiable store".to_string()))?;
        let secret = handle.create(name, attributes).await?;
        self.notify_changed();
        Ok(AnySecret::new(handle.id(), secret))
    }

    pub async fn delete(&self, secret: &AnySecret) -> Result<(), StoreError> {
        self.store_for(secret)?.delete(&secret.secret).await?;
        self.notify_changed();
        Ok(())
    }

    pub async fn rename(&self, secret: &AnySecret, name: &str) -> Result<(), StoreError> {
        self.store_for(secret)?.rename(&secret.secret, name).await?;
        self.notify_changed();
        Ok(())
    }

    /// Asks every available store that currently lists nothing to reload.
    pub async fn reload_if_empty(&self) {
        for handle in self.stores() {
            let store = handle.store();
            if store.is_available() && store.secrets().is_empty() {
                debug!(store = %store.name(), "reloading empty store");
                store.reload_secrets().await;
            }
        }
    }
}
