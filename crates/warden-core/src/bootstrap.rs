use crate::agent::Agent;
use crate::certificates::CertificateHandler;
use crate::events::EventBus;
use crate::standin::{spawn_refresh, PublicKeyStandinWriter};
use crate::witness::{AuditWitness, ProcessPolicyWitness};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use warden_config::{AppConfig, AppPaths};
use warden_keychain::{
    AuthenticationCache, AuthorizationCapability, CommandAuthorizer, CredentialStore, DenyAll,
    ProxyAgentStore, StoreList,
};

/// Everything `serve` needs, wired from configuration.
pub struct Assembly {
    pub agent: Arc<Agent>,
    pub stores: Arc<StoreList>,
    pub socket_path: PathBuf,
    pub refresh: JoinHandle<()>,
}

pub fn authorization_capability(config: &AppConfig) -> Arc<dyn AuthorizationCapability> {
    match &config.authorization.confirm_program {
        Some(program) => Arc::new(CommandAuthorizer::new(
            program.clone(),
            config.authorization.confirm_timeout(),
        )),
        None => Arc::new(DenyAll),
    }
}

/// Builds stores, witnesses and the agent. Must run inside a Tokio runtime.
pub async fn assemble(config: &AppConfig, paths: &AppPaths, events: EventBus) -> Assembly {
    let socket_path = config.agent.socket_path(paths);
    let stores = Arc::new(StoreList::new());

    if config.proxy.enabled {
        match config.proxy.upstream_socket() {
            Some(upstream) if upstream == socket_path => {
                warn!(socket = %upstream.display(), "proxy upstream is our own socket, skipping");
            }
            Some(upstream) => {
                let confirmation = config.proxy.require_confirmation.then(|| {
                    AuthenticationCache::new(
                        authorization_capability(config),
                        config.authorization.persist_for(),
                    )
                });
                let store = Arc::new(ProxyAgentStore::new(
                    config.proxy.name.clone(),
                    upstream,
                    confirmation,
                ));
                store.reload_secrets().await;
                stores.add(store);
            }
            None => warn!("proxy enabled but no upstream socket configured"),
        }
    }

    let mut agent = Agent::new(stores.clone())
        .with_events(events.clone())
        .reload_if_empty(config.agent.reload_if_empty);
    if !config.authorization.denied_processes.is_empty() {
        agent = agent.with_witness(Arc::new(ProcessPolicyWitness::new(
            config.authorization.denied_processes.clone(),
        )));
    }
    agent = agent.with_witness(Arc::new(AuditWitness::new(events.clone())));

    let key_dir = config.public_keys.directory(paths);
    let certificates = config
        .public_keys
        .load_certificates
        .then(|| Arc::new(CertificateHandler::new(&key_dir)));
    if let Some(handler) = &certificates {
        agent = agent.with_certificates(handler.clone());
    }
    let standins = config
        .public_keys
        .write_standins
        .then(|| PublicKeyStandinWriter::new(&key_dir));
    let refresh = spawn_refresh(stores.clone(), standins, certificates, events);

    info!(
        stores = stores.stores().len(),
        secrets = stores.secrets().len(),
        socket = %socket_path.display(),
        "agent assembled"
    );
    Assembly {
        agent: Arc::new(agent),
        stores,
        socket_path,
        refresh,
    }
}
