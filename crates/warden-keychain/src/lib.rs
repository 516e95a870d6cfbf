pub mod authentication;
pub mod list;
pub mod provenance;
pub mod proxy;
pub mod secret;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use authentication::{
    AuthenticationCache, AuthorizationCapability, AuthorizationError, AuthorizationToken,
    CommandAuthorizer, DenyAll, PersistedAuthentication,
};
pub use list::StoreList;
pub use provenance::{Process, SigningRequestProvenance};
pub use proxy::ProxyAgentStore;
pub use secret::{AnySecret, Attributes, Secret, SecretId, SignedData, StoreId};
pub use store::{CredentialStore, ModifiableCredentialStore, StoreError, StoreHandle};
