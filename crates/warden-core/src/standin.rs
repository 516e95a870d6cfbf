use crate::certificates::CertificateHandler;
use crate::events::{Event, EventBus};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_keychain::{AnySecret, StoreList};
use warden_ssh::key;

/// Writes each secret's OpenSSH public key line to `<dir>/<md5hex>.pub`, so
/// `IdentityFile` in an ssh config can point at a key that lives in hardware.
pub struct PublicKeyStandinWriter {
    directory: PathBuf,
}

impl PublicKeyStandinWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, secret: &AnySecret) -> PathBuf {
        self.directory
            .join(format!("{}.pub", key::md5_file_stem(secret)))
    }

    /// Writes stand-ins for `secrets`, skipping files whose content is already
    /// current. Returns the paths that were (re)written.
    pub fn write_all(&self, secrets: &[AnySecret]) -> io::Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.directory)?;
        let mut written = Vec::new();
        for secret in secrets {
            let path = self.path_for(secret);
            let line = format!("{}\n", key::openssh_line(secret));
            if fs::read_to_string(&path).ok().as_deref() == Some(line.as_str()) {
                continue;
            }
            fs::write(&path, line)?;
            debug!(secret = %secret.name(), path = %path.display(), "public key stand-in written");
            written.push(path);
        }
        Ok(written)
    }

    /// Removes stand-ins and certificates named after keys that are no longer
    /// in `secrets`. Only `<md5hex>.pub` and `<md5hex>-cert.pub` are touched.
    pub fn remove_stale(&self, secrets: &[AnySecret]) -> io::Result<Vec<PathBuf>> {
        let live: HashSet<String> = secrets.iter().map(key::md5_file_stem).collect();
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let mut removed = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(stem) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(standin_stem)
            else {
                continue;
            };
            if live.contains(stem) {
                continue;
            }
            fs::remove_file(&path)?;
            debug!(path = %path.display(), "stale public key file removed");
            removed.push(path);
        }
        Ok(removed)
    }
}

/// The md5 stem of a file this writer (or a certificate authority) would
/// name, or `None` for anything else.
fn standin_stem(file_name: &str) -> Option<&str> {
    let stem = file_name
        .strip_suffix("-cert.pub")
        .or_else(|| file_name.strip_suffix(".pub"))?;
    (stem.len() == 32 && stem.bytes().all(|b| b.is_ascii_hexdigit())).then_some(stem)
}

/// Keeps stand-ins and certificates in step with the store list. Runs until
/// aborted.
pub fn spawn_refresh(
    stores: Arc<StoreList>,
    standins: Option<PublicKeyStandinWriter>,
    certificates: Option<Arc<CertificateHandler>>,
    events: EventBus,
) -> JoinHandle<()> {
    let mut changes = stores.subscribe();
    tokio::spawn(async move {
        loop {
            let secrets = stores.secrets();
            if let Some(writer) = &standins {
                match writer.write_all(&secrets) {
                    Ok(written) if !written.is_empty() => {
                        info!(count = written.len(), dir = %writer.directory().display(), "public key stand-ins updated")
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(dir = %writer.directory().display(), error = %err, "unable to write public key stand-ins")
                    }
                }
                match writer.remove_stale(&secrets) {
                    Ok(removed) if !removed.is_empty() => {
                        info!(count = removed.len(), dir = %writer.directory().display(), "stale public keys removed")
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(dir = %writer.directory().display(), error = %err, "unable to remove stale public keys")
                    }
                }
            }
            if let Some(handler) = &certificates {
                handler.reload(&secrets);
            }
            events.send(Event::StoresChanged {
                secrets: secrets.len(),
            });
            if changes.changed().await.is_err() {
                break;
            }
        }
    })
}
