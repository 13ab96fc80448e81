//! Ambient runtime for the dashboard server: layered configuration and
//! logging initialisation.

pub mod config;
pub mod home_dir;
pub mod logging;

pub use config::{
    default_logging_config, AppConfig, AppConfigProvider, CliArgs, IngressConfig, LogSection,
    LoggingConfig, ServerConfig,
};
pub use home_dir::{resolve_home_dir, HomeDirError};
