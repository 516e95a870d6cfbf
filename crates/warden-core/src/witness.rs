use crate::events::{Event, EventBus};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use warden_keychain::{AnySecret, SigningRequestProvenance};
use warden_ssh::key;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WitnessError {
    #[error("{0}")]
    Objected(String),
    #[error("witness failed: {0}")]
    Failed(String),
}

/// Observes signing. Any witness may veto a request before the backend is
/// asked; every witness is told afterwards what was signed.
#[async_trait]
pub trait SigningWitness: Send + Sync {
    async fn speak_now_or_forever_hold_your_peace(
        &self,
        secret: &AnySecret,
        provenance: &SigningRequestProvenance,
    ) -> Result<(), WitnessError>;

    async fn witness(
        &self,
        secret: &AnySecret,
        provenance: &SigningRequestProvenance,
        required_authentication: bool,
    ) -> Result<(), WitnessError>;
}

/// Never objects; logs and publishes every signature.
pub struct AuditWitness {
    events: EventBus,
}

impl AuditWitness {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }
}

#[async_trait]
impl SigningWitness for AuditWitness {
    async fn speak_now_or_forever_hold_your_peace(
        &self,
        _secret: &AnySecret,
        _provenance: &SigningRequestProvenance,
    ) -> Result<(), WitnessError> {
        Ok(())
    }

    async fn witness(
        &self,
        secret: &AnySecret,
        provenance: &SigningRequestProvenance,
        required_authentication: bool,
    ) -> Result<(), WitnessError> {
        let fingerprint = key::sha256_fingerprint(secret);
        let requester = provenance.describe();
        info!(
            secret = %secret.name(),
            %fingerprint,
            %requester,
            required_authentication,
            "signed"
        );
        self.events.send(Event::SignatureIssued {
            secret: secret.name().to_string(),
            fingerprint,
            requester,
            required_authentication,
            at: Utc::now(),
        });
        Ok(())
    }
}

/// Objects when any process in the requesting chain has a denied name.
pub struct ProcessPolicyWitness {
    denied: Vec<String>,
}

impl ProcessPolicyWitness {
    pub fn new(denied: Vec<String>) -> Self {
        Self { denied }
    }

    fn denied_in(&self, provenance: &SigningRequestProvenance) -> Option<String> {
        provenance.chain.iter().find_map(|process| {
            let executable = process
                .path
                .as_ref()
                .and_then(|path| path.file_name())
                .map(|name| name.to_string_lossy().into_owned());
            self.denied
                .iter()
                .find(|denied| {
                    **denied == process.name || executable.as_deref() == Some(denied.as_str())
                })
                .map(|_| process.to_string())
        })
    }
}

#[async_trait]
impl SigningWitness for ProcessPolicyWitness {
    async fn speak_now_or_forever_hold_your_peace(
        &self,
        secret: &AnySecret,
        provenance: &SigningRequestProvenance,
    ) -> Result<(), WitnessError> {
        match self.denied_in(provenance) {
            Some(process) => {
                warn!(secret = %secret.name(), %process, "denied process asked for a signature");
                Err(WitnessError::Objected(format!("{process} is not allowed to sign")))
            }
            None => Ok(()),
        }
    }

    async fn witness(
        &self,
        _secret: &AnySecret,
        _provenance: &SigningRequestProvenance,
        _required_authentication: bool,
    ) -> Result<(), WitnessError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use warden_keychain::{Process, Secret, SecretId, StoreId};
    use warden_ssh::KeyType;

    fn secret() -> AnySecret {
        AnySecret::new(
            StoreId::new(),
            Secret {
                id: SecretId(vec![1]),
                name: "deploy".to_string(),
                key_type: KeyType::P256,
                public_key: vec![4; 65],
                requires_authentication: false,
                attribution: None,
            },
        )
    }

    fn chain(processes: &[(u32, &str, Option<&str>)]) -> SigningRequestProvenance {
        SigningRequestProvenance {
            chain: processes
                .iter()
                .map(|(pid, name, path)| Process {
                    pid: *pid,
                    name: name.to_string(),
                    path: path.map(PathBuf::from),
                    parent_pid: None,
                })
                .collect(),
            certificate: None,
        }
    }

    #[tokio::test]
    async fn policy_objects_to_denied_ancestor() {
        let witness = ProcessPolicyWitness::new(vec!["python3".to_string()]);
        let provenance = chain(&[(40, "ssh", None), (30, "python3", None)]);
        assert!(matches!(
            witness
                .speak_now_or_forever_hold_your_peace(&secret(), &provenance)
                .await,
            Err(WitnessError::Objected(_))
        ));
    }

    #[tokio::test]
    async fn policy_matches_executable_name() {
        let witness = ProcessPolicyWitness::new(vec!["evil".to_string()]);
        let provenance = chain(&[(40, "renamed", Some("/opt/bin/evil"))]);
        assert!(witness
            .speak_now_or_forever_hold_your_peace(&secret(), &provenance)
            .await
            .is_err());
        let allowed = chain(&[(40, "ssh", Some("/usr/bin/ssh"))]);
        assert!(witness
            .speak_now_or_forever_hold_your_peace(&secret(), &allowed)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn audit_publishes_signature() {
        let events = EventBus::new(8);
        let mut rx = events.subscribe();
        let witness = AuditWitness::new(events);
        witness
            .witness(&secret(), &chain(&[(7, "git", None)]), true)
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            Event::SignatureIssued {
                secret,
                requester,
                required_authentication,
                ..
            } => {
                assert_eq!(secret, "deploy");
                assert_eq!(requester, "git (pid 7)");
                assert!(required_authentication);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
