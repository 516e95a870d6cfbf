pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AgentConfig, AppConfig, AppConfigLayer, AuthorizationConfig, ConfigError, ConfigManager,
    LoggingConfig, ProxyConfig, PublicKeysConfig,
};
