use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use warden_keychain::AnySecret;
use warden_ssh::{key, OpenSshCertificate};

/// Certificates issued for our secrets, read from `<md5hex>-cert.pub` files
/// next to the public key stand-ins.
pub struct CertificateHandler {
    directory: PathBuf,
    /// Keyed by the certified public key blob.
    certificates: RwLock<HashMap<Vec<u8>, OpenSshCertificate>>,
}

impl CertificateHandler {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            certificates: RwLock::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for(&self, secret: &AnySecret) -> PathBuf {
        self.directory
            .join(format!("{}-cert.pub", key::md5_file_stem(secret)))
    }

    /// Rescans the directory for every secret. Returns how many certificates
    /// were loaded.
    pub fn reload(&self, secrets: &[AnySecret]) -> usize {
        let mut loaded = HashMap::new();
        for secret in secrets {
            let path = self.path_for(secret);
            if !path.exists() {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unable to read certificate");
                    continue;
                }
            };
            let certificate = match OpenSshCertificate::parse(content.trim()) {
                Ok(certificate) => certificate,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "unable to parse certificate");
                    continue;
                }
            };
            let blob = key::encode(secret);
            if certificate.public_key_blob() != blob {
                warn!(path = %path.display(), secret = %secret.name(), "certificate is for another key");
                continue;
            }
            if !certificate.is_valid_now() {
                warn!(
                    path = %path.display(),
                    valid_before = ?certificate.valid_before_time(),
                    "certificate outside its validity window"
                );
                continue;
            }
            debug!(secret = %secret.name(), key_id = %certificate.key_id, "certificate loaded");
            loaded.insert(blob, certificate);
        }
        let count = loaded.len();
        *self.certificates.write() = loaded;
        count
    }

    /// Currently valid certificate for `secret`, if any.
    pub fn certificate_for(&self, secret: &AnySecret) -> Option<OpenSshCertificate> {
        self.certificates
            .read()
            .get(&key::encode(secret))
            .filter(|certificate| certificate.is_valid_now())
            .cloned()
    }

    /// Maps a certificate blob presented in a sign request back to the public
    /// key blob it certifies.
    pub fn resolve(&self, blob: &[u8]) -> Option<(Vec<u8>, OpenSshCertificate)> {
        self.certificates
            .read()
            .iter()
            .find(|(_, certificate)| certificate.data == blob && certificate.is_valid_now())
            .map(|(public_key, certificate)| (public_key.clone(), certificate.clone()))
    }
}
