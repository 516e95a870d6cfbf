use anyhow::Result;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_file: PathBuf,
    pub socket_path: PathBuf,
    pub public_keys_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self> {
        let proj = ProjectDirs::from("org", "warden", "warden")
            .ok_or_else(|| anyhow::anyhow!("project dirs unavailable"))?;
        let config_dir = proj.config_dir().to_path_buf();
        let data_dir = proj.data_dir().to_path_buf();
        let runtime_dir = proj
            .runtime_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_dir.clone());
        Ok(Self::with_dirs(config_dir, data_dir, runtime_dir))
    }

    /// Lays out every path under explicit directories.
    pub fn with_dirs(config_dir: PathBuf, data_dir: PathBuf, runtime_dir: PathBuf) -> Self {
        Self {
            log_dir: data_dir.join("logs"),
            config_file: config_dir.join("config.toml"),
            socket_path: runtime_dir.join("agent.sock"),
            public_keys_dir: data_dir.join("public-keys"),
            config_dir,
            data_dir,
        }
    }

    pub fn project_config_path(base: impl AsRef<Path>) -> PathBuf {
        base.as_ref().join(".warden.toml")
    }
}
