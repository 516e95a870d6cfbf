use crate::agent::Agent;
use crate::error::AgentError;
use crate::tracer;
use std::fs;
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

/// Accepts connections on a Unix socket, one task per connection.
pub struct AgentServer {
    agent: Arc<Agent>,
    socket_path: PathBuf,
}

impl AgentServer {
    pub fn new(agent: Arc<Agent>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            agent,
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket, replacing a stale one, readable by the owner only.
    pub fn bind(&self) -> Result<UnixListener, AgentError> {
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::remove_file(&self.socket_path) {
            Ok(()) => debug!(socket = %self.socket_path.display(), "removed stale socket"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(0o600))?;
        Ok(listener)
    }

    /// Serves until `shutdown` resolves, then removes the socket.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), AgentError> {
        let listener = self.bind()?;
        info!(socket = %self.socket_path.display(), "agent listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            error!(error = %err, "accept failed");
                            continue;
                        }
                    };
                    let agent = self.agent.clone();
                    let span = tracing::info_span!(
                        "connection",
                        id = %Uuid::new_v4(),
                        requester = tracing::field::Empty
                    );
                    tokio::spawn(
                        async move {
                            let provenance = tracer::provenance_for_stream(&stream).await;
                            tracing::Span::current()
                                .record("requester", tracing::field::display(provenance.describe()));
                            debug!("accepted");
                            match agent.serve_connection(stream, provenance).await {
                                Ok(()) => debug!("closed"),
                                Err(err) => debug!(error = %err, "connection dropped"),
                            }
                        }
                        .instrument(span),
                    );
                }
                _ = &mut shutdown => break,
            }
        }

        if let Err(err) = fs::remove_file(&self.socket_path) {
            debug!(error = %err, "unable to remove socket");
        }
        info!("agent stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use warden_keychain::testutil::SoftwareStore;
    use warden_keychain::StoreList;
    use warden_ssh::{AgentClient, KeyType};

    #[tokio::test]
    async fn serves_identities_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("run").join("agent.sock");
        // stale file from an earlier run
        fs::create_dir_all(socket.parent().unwrap()).unwrap();
        fs::write(&socket, b"stale").unwrap();

        let stores = Arc::new(StoreList::new());
        let store = Arc::new(SoftwareStore::new("soft"));
        store.generate("deploy", KeyType::P256).unwrap();
        stores.add(store);

        let server = AgentServer::new(Arc::new(Agent::new(stores)), &socket);
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = stopped.await;
        }));

        let mut client = None;
        for _ in 0..50 {
            if let Ok(connected) = AgentClient::connect(&socket).await {
                client = Some(connected);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut client = client.unwrap();
        let mode = fs::metadata(&socket).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let identities = client.request_identities().await.unwrap();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].comment, "deploy");

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn idle_connection_does_not_hold_up_the_next_one() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("agent.sock");
        let server = AgentServer::new(Arc::new(Agent::new(Arc::new(StoreList::new()))), &socket);
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async {
            let _ = stopped.await;
        }));

        let mut idle = None;
        for _ in 0..50 {
            if let Ok(connected) = AgentClient::connect(&socket).await {
                idle = Some(connected);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(idle.is_some());

        let mut busy = AgentClient::connect(&socket).await.unwrap();
        let identities = tokio::time::timeout(Duration::from_secs(5), busy.request_identities())
            .await
            .unwrap()
            .unwrap();
        assert!(identities.is_empty());

        stop.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
