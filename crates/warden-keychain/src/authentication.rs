use crate::secret::{Secret, SecretId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationError {
    #[error("authorization denied")]
    Denied,
    #[error("authorization timed out")]
    TimedOut,
    #[error("authorization capability failed: {0}")]
    Capability(String),
}

/// Opaque proof that the user approved use of a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthorizationToken(Uuid);

impl AuthorizationToken {
    pub fn issue() -> Self {
        Self(Uuid::new_v4())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedAuthentication {
    pub secret_id: SecretId,
    pub token: AuthorizationToken,
    pub expires_at: Instant,
}

impl PersistedAuthentication {
    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Whatever actually asks the user: a confirm dialog, a PIN pad, a token.
#[async_trait]
pub trait AuthorizationCapability: Send + Sync {
    async fn authorize(
        &self,
        secret: &Secret,
        reason: &str,
    ) -> Result<AuthorizationToken, AuthorizationError>;
}

/// Runs an askpass-style program; exit status 0 grants.
pub struct CommandAuthorizer {
    program: PathBuf,
    timeout: Duration,
}

impl CommandAuthorizer {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl AuthorizationCapability for CommandAuthorizer {
    async fn authorize(
        &self,
        secret: &Secret,
        reason: &str,
    ) -> Result<AuthorizationToken, AuthorizationError> {
        let prompt = format!("Allow use of key \"{}\" to {reason}?", secret.name);
        let mut child = Command::new(&self.program)
            .arg(&prompt)
            .env("SSH_ASKPASS_PROMPT", "confirm")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AuthorizationError::Capability(e.to_string()))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.map_err(|e| AuthorizationError::Capability(e.to_string()))?,
            Err(_) => {
                warn!(program = %self.program.display(), "confirmation timed out");
                return Err(AuthorizationError::TimedOut);
            }
        };
        if status.success() {
            info!(secret = %secret.name, "use approved");
            Ok(AuthorizationToken::issue())
        } else {
            info!(secret = %secret.name, code = ?status.code(), "use declined");
            Err(AuthorizationError::Denied)
        }
    }
}

pub struct DenyAll;

#[async_trait]
impl AuthorizationCapability for DenyAll {
    async fn authorize(
        &self,
        _secret: &Secret,
        _reason: &str,
    ) -> Result<AuthorizationToken, AuthorizationError> {
        Err(AuthorizationError::Denied)
    }
}

/// Remembers approvals per secret until their monotonic expiry.
pub struct AuthenticationCache {
    capability: Arc<dyn AuthorizationCapability>,
    persist_for: Option<Duration>,
    entries: Mutex<HashMap<SecretId, PersistedAuthentication>>,
}

impl AuthenticationCache {
    pub fn new(capability: Arc<dyn AuthorizationCapability>, persist_for: Option<Duration>) -> Self {
        Self {
            capability,
            persist_for,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn existing(&self, secret: &Secret) -> Option<PersistedAuthentication> {
        let mut entries = self.entries.lock();
        let entry = entries.get(&secret.id)?.clone();
        if entry.is_valid() {
            return Some(entry);
        }
        debug!(secret = %secret.name, "authorization expired");
        entries.remove(&secret.id);
        None
    }

    pub async fn persist(&self, secret: &Secret, duration: Duration) -> Result<(), AuthorizationError> {
        let token = self
            .capability
            .authorize(secret, &format!("keep it unlocked for {}s", duration.as_secs()))
            .await?;
        self.insert(secret, token, duration);
        Ok(())
    }

    /// Returns a token and whether the user had to be asked for it.
    pub async fn authorize(
        &self,
        secret: &Secret,
    ) -> Result<(AuthorizationToken, bool), AuthorizationError> {
        if let Some(entry) = self.existing(secret) {
            return Ok((entry.token, false));
        }
        let token = self.capability.authorize(secret, "sign a request").await?;
        if let Some(duration) = self.persist_for {
            self.insert(secret, token, duration);
        }
        Ok((token, true))
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn insert(&self, secret: &Secret, token: AuthorizationToken, duration: Duration) {
        let entry = PersistedAuthentication {
            secret_id: secret.id.clone(),
            token,
            expires_at: Instant::now() + duration,
        };
        self.entries.lock().insert(secret.id.clone(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_ssh::KeyType;

    #[derive(Default)]
    struct CountingAuthorizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthorizationCapability for CountingAuthorizer {
        async fn authorize(
            &self,
            _secret: &Secret,
            _reason: &str,
        ) -> Result<AuthorizationToken, AuthorizationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AuthorizationToken::issue())
        }
    }

    fn secret() -> Secret {
        Secret {
            id: SecretId(vec![1, 2, 3]),
            name: "work".to_string(),
            key_type: KeyType::P256,
            public_key: vec![4; 65],
            requires_authentication: true,
            attribution: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn persisted_context_expires() {
        let cache = AuthenticationCache::new(Arc::new(CountingAuthorizer::default()), None);
        let secret = secret();
        cache.persist(&secret, Duration::from_secs(60)).await.unwrap();

        assert!(cache.existing(&secret).is_some());
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.existing(&secret).is_some());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.existing(&secret).is_none());
        assert!(cache.entries.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reads_inside_window() {
        let cache = Arc::new(AuthenticationCache::new(
            Arc::new(CountingAuthorizer::default()),
            None,
        ));
        let secret = secret();
        cache.persist(&secret, Duration::from_secs(30)).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let secret = secret.clone();
            tasks.push(tokio::spawn(async move { cache.existing(&secret).is_some() }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn authorize_uses_cache_when_persisting() {
        let authorizer = Arc::new(CountingAuthorizer::default());
        let cache = AuthenticationCache::new(authorizer.clone(), Some(Duration::from_secs(10)));
        let secret = secret();

        let (first, asked) = cache.authorize(&secret).await.unwrap();
        assert!(asked);
        let (second, asked) = cache.authorize(&secret).await.unwrap();
        assert!(!asked);
        assert_eq!(first, second);
        assert_eq!(authorizer.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        let (_, asked) = cache.authorize(&secret).await.unwrap();
        assert!(asked);
        assert_eq!(authorizer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn authorize_without_persistence_always_asks() {
        let authorizer = Arc::new(CountingAuthorizer::default());
        let cache = AuthenticationCache::new(authorizer.clone(), None);
        let secret = secret();
        cache.authorize(&secret).await.unwrap();
        cache.authorize(&secret).await.unwrap();
        assert_eq!(authorizer.calls.load(Ordering::SeqCst), 2);
        assert!(cache.existing(&secret).is_none());
    }

    #[tokio::test]
    async fn deny_all_refuses() {
        let cache = AuthenticationCache::new(Arc::new(DenyAll), Some(Duration::from_secs(10)));
        assert_eq!(
            cache.authorize(&secret()).await,
            Err(AuthorizationError::Denied)
        );
        assert!(cache.existing(&secret()).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_authorizer_follows_exit_status() {
        let secret = secret();
        let granted = CommandAuthorizer::new("true", Duration::from_secs(5));
        assert!(granted.authorize(&secret, "test").await.is_ok());
        let declined = CommandAuthorizer::new("false", Duration::from_secs(5));
        assert_eq!(
            declined.authorize(&secret, "test").await,
            Err(AuthorizationError::Denied)
        );
        let missing = CommandAuthorizer::new("/nonexistent/askpass", Duration::from_secs(5));
        assert!(matches!(
            missing.authorize(&secret, "test").await,
            Err(AuthorizationError::Capability(_))
        ));
    }
}
