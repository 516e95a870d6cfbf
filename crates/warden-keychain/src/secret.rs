use std::fmt;
use uuid::Uuid;
use warden_ssh::{KeyType, OpenSshPublicKey};

/// Backend-defined identifier, unique within its store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretId(pub Vec<u8>);

impl SecretId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Reference to a key held by a backend. Never carries private material.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Secret {
    pub id: SecretId,
    pub name: String,
    pub key_type: KeyType,
    /// SEC1 uncompressed point.
    pub public_key: Vec<u8>,
    pub requires_authentication: bool,
    pub attribution: Option<String>,
}

impl OpenSshPublicKey for Secret {
    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn public_key_bytes(&self) -> &[u8] {
        &self.public_key
    }

    fn attribution(&self) -> Option<&str> {
        self.attribution.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(pub Uuid);

impl StoreId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A secret tagged with the store that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnySecret {
    pub store: StoreId,
    pub secret: Secret,
}

impl AnySecret {
    pub fn new(store: StoreId, secret: Secret) -> Self {
        Self { store, secret }
    }

    pub fn name(&self) -> &str {
        &self.secret.name
    }
}

impl OpenSshPublicKey for AnySecret {
    fn key_type(&self) -> KeyType {
        self.secret.key_type
    }

    fn public_key_bytes(&self) -> &[u8] {
        &self.secret.public_key
    }

    fn attribution(&self) -> Option<&str> {
        self.secret.attribution.as_deref()
    }
}

/// Backend output: an ASN.1 DER ECDSA signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedData {
    pub data: Vec<u8>,
    pub required_authentication: bool,
}

/// Parameters for creating a secret in a modifiable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub key_type: KeyType,
    pub requires_authentication: bool,
    pub attribution: Option<String>,
}
