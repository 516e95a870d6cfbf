use crate::paths::AppPaths;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("toml encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub authorization: AuthorizationConfig,
    pub proxy: ProxyConfig,
    pub public_keys: PublicKeysConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AppConfigLayer {
    pub agent: Option<AgentConfigLayer>,
    pub authorization: Option<AuthorizationConfigLayer>,
    pub proxy: Option<ProxyConfigLayer>,
    pub public_keys: Option<PublicKeysConfigLayer>,
    pub logging: Option<LoggingConfigLayer>,
}

impl AppConfigLayer {
    pub fn apply_to(self, cfg: &mut AppConfig) {
        if let Some(layer) = self.agent {
            cfg.agent.apply(layer);
        }
        if let Some(layer) = self.authorization {
            cfg.authorization.apply(layer);
        }
        if let Some(layer) = self.proxy {
            cfg.proxy.apply(layer);
        }
        if let Some(layer) = self.public_keys {
            cfg.public_keys.apply(layer);
        }
        if let Some(layer) = self.logging {
            cfg.logging.apply(layer);
        }
    }

    /// Layer carrying only a socket path, as given on the command line.
    pub fn with_socket(socket: PathBuf) -> Self {
        Self {
            agent: Some(AgentConfigLayer {
                socket: Some(socket),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    pub socket: Option<PathBuf>,
    pub reload_if_empty: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            socket: None,
            reload_if_empty: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AgentConfigLayer {
    pub socket: Option<PathBuf>,
    pub reload_if_empty: Option<bool>,
}

impl AgentConfig {
    fn apply(&mut self, layer: AgentConfigLayer) {
        if layer.socket.is_some() {
            self.socket = layer.socket;
        }
        if let Some(v) = layer.reload_if_empty {
            self.reload_if_empty = v;
        }
    }

    pub fn socket_path(&self, paths: &AppPaths) -> PathBuf {
        self.socket
            .clone()
            .unwrap_or_else(|| paths.socket_path.clone())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    pub confirm_program: Option<PathBuf>,
    pub confirm_timeout_secs: u64,
    /// 0 disables remembering approvals.
    pub persist_secs: u64,
    pub denied_processes: Vec<String>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            confirm_program: Some(PathBuf::from("ssh-askpass")),
            confirm_timeout_secs: 60,
            persist_secs: 0,
            denied_processes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AuthorizationConfigLayer {
    pub confirm_program: Option<PathBuf>,
    pub confirm_timeout_secs: Option<u64>,
    pub persist_secs: Option<u64>,
    pub denied_processes: Option<Vec<String>>,
}

impl AuthorizationConfig {
    fn apply(&mut self, layer: AuthorizationConfigLayer) {
        if layer.confirm_program.is_some() {
            self.confirm_program = layer.confirm_program;
        }
        if let Some(v) = layer.confirm_timeout_secs {
            self.confirm_timeout_secs = v;
        }
        if let Some(v) = layer.persist_secs {
            self.persist_secs = v;
        }
        if let Some(v) = layer.denied_processes {
            self.denied_processes = v;
        }
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn persist_for(&self) -> Option<Duration> {
        (self.persist_secs > 0).then(|| Duration::from_secs(self.persist_secs))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub name: String,
    /// Falls back to `SSH_AUTH_SOCK` when unset.
    pub upstream_socket: Option<PathBuf>,
    pub require_confirmation: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "ssh-agent".to_string(),
            upstream_socket: None,
            require_confirmation: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ProxyConfigLayer {
    pub enabled: Option<bool>,
    pub name: Option<String>,
    pub upstream_socket: Option<PathBuf>,
    pub require_confirmation: Option<bool>,
}

impl ProxyConfig {
    fn apply(&mut self, layer: ProxyConfigLayer) {
        if let Some(v) = layer.enabled {
            self.enabled = v;
        }
        if let Some(v) = layer.name {
            self.name = v;
        }
        if layer.upstream_socket.is_some() {
            self.upstream_socket = layer.upstream_socket;
        }
        if let Some(v) = layer.require_confirmation {
            self.require_confirmation = v;
        }
    }

    pub fn upstream_socket(&self) -> Option<PathBuf> {
        self.upstream_socket
            .clone()
            .or_else(|| std::env::var_os("SSH_AUTH_SOCK").map(PathBuf::from))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicKeysConfig {
    pub directory: Option<PathBuf>,
    pub write_standins: bool,
    pub load_certificates: bool,
}

impl Default for PublicKeysConfig {
    fn default() -> Self {
        Self {
            directory: None,
            write_standins: true,
            load_certificates: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct PublicKeysConfigLayer {
    pub directory: Option<PathBuf>,
    pub write_standins: Option<bool>,
    pub load_certificates: Option<bool>,
}

impl PublicKeysConfig {
    fn apply(&mut self, layer: PublicKeysConfigLayer) {
        if layer.directory.is_some() {
            self.directory = layer.directory;
        }
        if let Some(v) = layer.write_standins {
            self.write_standins = v;
        }
        if let Some(v) = layer.load_certificates {
            self.load_certificates = v;
        }
    }

    pub fn directory(&self, paths: &AppPaths) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| paths.public_keys_dir.clone())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            stdout: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct LoggingConfigLayer {
    pub level: Option<String>,
    pub json: Option<bool>,
    pub stdout: Option<bool>,
}

impl LoggingConfig {
    fn apply(&mut self, layer: LoggingConfigLayer) {
        if let Some(v) = layer.level {
            self.level = v;
        }
        if let Some(v) = layer.json {
            self.json = v;
        }
        if let Some(v) = layer.stdout {
            self.stdout = v;
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConfigManager {
    pub paths: AppPaths,
}

impl ConfigManager {
    pub fn new(paths: AppPaths) -> Self {
        Self { paths }
    }

    pub fn load(&self, cwd: Option<&Path>, overrides: Option<AppConfigLayer>) -> Result<AppConfig> {
        let mut cfg = AppConfig::default();

        if self.paths.config_file.exists() {
            let layer = Self::load_layer(&self.paths.config_file)?;
            layer.apply_to(&mut cfg);
        }

        if let Some(dir) = cwd {
            let project_path = AppPaths::project_config_path(dir);
            if project_path.exists() {
                let layer = Self::load_layer(&project_path)?;
                debug!(path = %project_path.display(), "applying project config");
                layer.apply_to(&mut cfg);
            }
        }

        if let Some(layer) = overrides {
            layer.apply_to(&mut cfg);
        }

        Ok(cfg)
    }

    pub fn load_layer(path: &Path) -> Result<AppConfigLayer, ConfigError> {
        let content = fs::read_to_string(path)?;
        let layer: AppConfigLayer = toml::from_str(&content)?;
        Ok(layer)
    }

    pub fn save_default(&self) -> Result<()> {
        self.save_config(&AppConfig::default())
    }

    pub fn save_config(&self, cfg: &AppConfig) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(cfg).map_err(ConfigError::from)?;
        fs::write(&self.paths.config_file, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(root: &Path) -> ConfigManager {
        ConfigManager::new(AppPaths::with_dirs(
            root.join("config"),
            root.join("data"),
            root.join("run"),
        ))
    }

    #[test]
    fn apply_layer_overrides() {
        let mut cfg = AppConfig::default();
        let layer = AppConfigLayer {
            logging: Some(LoggingConfigLayer {
                level: Some("debug".to_string()),
                json: Some(true),
                stdout: Some(false),
            }),
            authorization: Some(AuthorizationConfigLayer {
                persist_secs: Some(300),
                denied_processes: Some(vec!["curl".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        layer.apply_to(&mut cfg);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
        assert!(!cfg.logging.stdout);
        assert_eq!(
            cfg.authorization.persist_for(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(cfg.authorization.denied_processes, vec!["curl"]);
        assert_eq!(cfg.authorization.confirm_timeout_secs, 60);
    }

    #[test]
    fn zero_persist_disables_cache() {
        assert_eq!(AuthorizationConfig::default().persist_for(), None);
    }

    #[test]
    fn layers_apply_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.save_default().unwrap();

        let project = dir.path().join("project");
        fs::create_dir_all(&project).unwrap();
        fs::write(
            AppPaths::project_config_path(&project),
            "[proxy]\nenabled = true\nname = \"gpg-agent\"\n\n[logging]\nlevel = \"trace\"\n",
        )
        .unwrap();

        let cfg = manager
            .load(
                Some(&project),
                Some(AppConfigLayer::with_socket(PathBuf::from("/tmp/cli.sock"))),
            )
            .unwrap();
        assert!(cfg.proxy.enabled);
        assert_eq!(cfg.proxy.name, "gpg-agent");
        assert_eq!(cfg.logging.level, "trace");
        assert_eq!(
            cfg.agent.socket_path(&manager.paths),
            PathBuf::from("/tmp/cli.sock")
        );
    }

    #[test]
    fn defaults_resolve_against_paths() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let cfg = manager.load(None, None).unwrap();
        assert_eq!(
            cfg.agent.socket_path(&manager.paths),
            dir.path().join("run").join("agent.sock")
        );
        assert_eq!(
            cfg.public_keys.directory(&manager.paths),
            dir.path().join("data").join("public-keys")
        );
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[agent\nsocket = 1").unwrap();
        assert!(matches!(
            ConfigManager::load_layer(&path),
            Err(ConfigError::Toml(_))
        ));
    }
}
