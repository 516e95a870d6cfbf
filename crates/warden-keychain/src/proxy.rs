use crate::authentication::{AuthenticationCache, PersistedAuthentication};
use crate::provenance::SigningRequestProvenance;
use crate::secret::{Secret, SecretId, SignedData, StoreId};
use crate::store::{CredentialStore, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use warden_ssh::{key, signature, AgentClient};

/// Exposes the ECDSA identities of another agent (usually the system
/// `ssh-agent`) as secrets, forwarding signatures to it.
pub struct ProxyAgentStore {
    id: StoreId,
    name: String,
    socket: PathBuf,
    secrets: RwLock<Vec<Secret>>,
    confirmation: Option<AuthenticationCache>,
    changes: watch::Sender<u64>,
}

impl ProxyAgentStore {
    pub fn new(
        name: impl Into<String>,
        socket: impl Into<PathBuf>,
        confirmation: Option<AuthenticationCache>,
    ) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            id: StoreId::new(),
            name: name.into(),
            socket: socket.into(),
            secrets: RwLock::new(Vec::new()),
            confirmation,
            changes,
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn fetch_identities(&self) -> Result<Vec<Secret>, StoreError> {
        let mut client = AgentClient::connect(&self.socket)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let identities = client
            .request_identities()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut secrets = Vec::new();
        for identity in identities {
            let (key_type, public_key) = match key::decode(&identity.key_blob) {
                Ok(decoded) => decoded,
                Err(err) => {
                    debug!(comment = %identity.comment, error = %err, "skipping upstream identity");
                    continue;
                }
            };
            secrets.push(Secret {
                id: SecretId(identity.key_blob),
                name: identity.comment,
                key_type,
                public_key,
                requires_authentication: self.confirmation.is_some(),
                attribution: None,
            });
        }
        Ok(secrets)
    }
}

#[async_trait]
impl CredentialStore for ProxyAgentStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.socket.exists()
    }

    fn secrets(&self) -> Vec<Secret> {
        self.secrets.read().clone()
    }

    async fn sign(
        &self,
        data: &[u8],
        secret: &Secret,
        provenance: &SigningRequestProvenance,
    ) -> Result<SignedData, StoreError> {
        let required_authentication = match &self.confirmation {
            Some(cache) => cache.authorize(secret).await?.1,
            None => false,
        };

        let mut client = AgentClient::connect(&self.socket)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let blob = client
            .sign(&key::encode(secret), data, 0)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let (key_type, der) =
            signature::ssh_to_der(&blob).map_err(|e| StoreError::Backend(e.to_string()))?;
        if key_type != secret.key_type {
            return Err(StoreError::Backend(format!(
                "upstream signed with {key_type}, expected {}",
                secret.key_type
            )));
        }
        debug!(secret = %secret.name, requester = %provenance.describe(), "upstream signed");
        Ok(SignedData {
            data: der,
            required_authentication,
        })
    }

    async fn verify(
        &self,
        signature: &[u8],
        data: &[u8],
        secret: &Secret,
    ) -> Result<bool, StoreError> {
        signature::verify(secret.key_type, &secret.public_key, signature, data)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn existing_authorization_context(&self, secret: &Secret) -> Option<PersistedAuthentication> {
        self.confirmation.as_ref()?.existing(secret)
    }

    async fn persist_authentication(
        &self,
        secret: &Secret,
        duration: Duration,
    ) -> Result<(), StoreError> {
        match &self.confirmation {
            Some(cache) => Ok(cache.persist(secret, duration).await?),
            None => Err(StoreError::Unsupported(
                "upstream agent keys need no confirmation".to_string(),
            )),
        }
    }

    async fn reload_secrets(&self) {
        match self.fetch_identities().await {
            Ok(secrets) => {
                let changed = *self.secrets.read() != secrets;
                if changed {
                    info!(store = %self.name, count = secrets.len(), "upstream identities changed");
                    *self.secrets.write() = secrets;
                    self.changes.send_modify(|generation| *generation += 1);
                }
            }
            Err(err) => {
                warn!(store = %self.name, socket = %self.socket.display(), error = %err, "upstream agent unavailable");
            }
        }
    }

    fn changes(&self) -> Option<watch::Receiver<u64>> {
        Some(self.changes.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::DenyAll;
    use futures::{SinkExt, StreamExt};
    use p256::ecdsa::signature::Signer;
    use std::sync::Arc;
    use tokio::net::UnixListener;
    use tokio_util::codec::Framed;
    use warden_ssh::protocol::{AgentCodec, Identity, Request, Response};
    use warden_ssh::{KeyType, WireWriter};

    fn upstream_key() -> p256::ecdsa::SigningKey {
        p256::ecdsa::SigningKey::from_slice(&[0x42; 32]).unwrap()
    }

    fn upstream_blob() -> Vec<u8> {
        let point = upstream_key().verifying_key().to_encoded_point(false);
        key::encode_parts(KeyType::P256, point.as_bytes())
    }

    /// Minimal upstream agent: one P-256 key plus an ed25519 identity.
    fn spawn_upstream(path: &Path) {
        let listener = UnixListener::bind(path).unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut framed = Framed::new(stream, AgentCodec);
                    while let Some(Ok(body)) = framed.next().await {
                        let response = match Request::decode(&body).unwrap() {
                            Request::RequestIdentities => {
                                let mut ed25519 = WireWriter::new();
                                ed25519.write_string("ssh-ed25519").write_chunk(&[7; 32]);
                                Response::IdentitiesAnswer(vec![
                                    Identity {
                                        key_blob: upstream_blob(),
                                        comment: "upstream-ecdsa".to_string(),
                                    },
                                    Identity {
                                        key_blob: ed25519.into_vec(),
                                        comment: "upstream-ed25519".to_string(),
                                    },
                                ])
                            }
                            Request::SignRequest { data, .. } => {
                                let sig: p256::ecdsa::Signature = upstream_key().sign(&data);
                                Response::SignResponse {
                                    signature: signature::der_to_ssh(
                                        KeyType::P256,
                                        sig.to_der().as_bytes(),
                                    )
                                    .unwrap(),
                                }
                            }
                            Request::Unsupported(_) => Response::Failure,
                        };
                        if framed.send(response.encode()).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
    }

    #[tokio::test]
    async fn lists_only_ecdsa_identities() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        spawn_upstream(&socket);

        let store = ProxyAgentStore::new("system agent", &socket, None);
        assert!(store.is_available());
        let mut changes = store.changes().unwrap();
        store.reload_secrets().await;

        let secrets = store.secrets();
        assert_eq!(secrets.len(), 1);
        assert_eq!(secrets[0].name, "upstream-ecdsa");
        assert_eq!(key::encode(&secrets[0]), upstream_blob());
        assert!(changes.has_changed().unwrap());

        changes.borrow_and_update();
        store.reload_secrets().await;
        assert!(!changes.has_changed().unwrap());
    }

    #[tokio::test]
    async fn forwards_and_verifies_signatures() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        spawn_upstream(&socket);

        let store = ProxyAgentStore::new("system agent", &socket, None);
        store.reload_secrets().await;
        let secret = store.secrets().remove(0);

        let signed = store
            .sign(b"challenge", &secret, &SigningRequestProvenance::unknown())
            .await
            .unwrap();
        assert!(!signed.required_authentication);
        assert!(store.verify(&signed.data, b"challenge", &secret).await.unwrap());
        assert!(!store.verify(&signed.data, b"other", &secret).await.unwrap());
    }

    #[tokio::test]
    async fn confirmation_denied_blocks_signing() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        spawn_upstream(&socket);

        let cache = AuthenticationCache::new(Arc::new(DenyAll), None);
        let store = ProxyAgentStore::new("system agent", &socket, Some(cache));
        store.reload_secrets().await;
        let secret = store.secrets().remove(0);
        assert!(secret.requires_authentication);

        assert!(matches!(
            store
                .sign(b"challenge", &secret, &SigningRequestProvenance::unknown())
                .await,
            Err(StoreError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn missing_socket_keeps_previous_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProxyAgentStore::new("gone", dir.path().join("missing.sock"), None);
        assert!(!store.is_available());
        store.reload_secrets().await;
        assert!(store.secrets().is_empty());
    }
}
