use anyhow::{Context, Result};
use modkit::{InMemorySettingsStore, LoaderConfig, ModuleSettings, RegistryConfig, RouterConfig};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::home_dir::resolve_home_dir;

const DEFAULT_SUBDIR: &str = ".vulndash";

/// Main application configuration: strongly-typed global sections plus a
/// flexible per-module configuration bag.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Logging configuration (optional, uses defaults if None).
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    /// Directory of module manifests scanned by the loader.
    #[serde(default)]
    pub modules_dir: Option<String>,
    /// Per-module configuration bag: module id → arbitrary JSON/YAML value.
    #[serde(default)]
    pub modules: HashMap<String, serde_json::Value>,
    /// Per-module enable switch and display order.
    #[serde(default)]
    pub module_settings: BTreeMap<String, ModuleSettings>,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Normalized to an absolute path on load.
    #[serde(default)]
    pub home_dir: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // empty => $HOME/.vulndash
            home_dir: String::new(),
            host: "127.0.0.1".to_string(),
            port: 8087,
        }
    }
}

/// HTTP surface settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngressConfig {
    pub cors_enabled: bool,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub body_limit_bytes: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            cors_enabled: false,
            request_timeout: Duration::from_secs(30),
            body_limit_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Subsystem name → logging settings. Key `default` is the catch-all for
/// targets that match no explicit subsystem.
pub type LoggingConfig = HashMap<String, LogSection>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSection {
    /// "trace" | "debug" | "info" | "warn" | "error" | "off"
    pub console_level: String,
    /// Log file, relative to `server.home_dir`; empty disables file output.
    #[serde(default)]
    pub file: String,
    #[serde(default = "default_file_level")]
    pub file_level: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

fn default_file_level() -> String {
    "debug".to_string()
}

pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        LogSection {
            console_level: "info".to_string(),
            file: "logs/vulndash.log".to_string(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: Some(default_logging_config()),
            modules_dir: None,
            modules: HashMap::new(),
            module_settings: BTreeMap::new(),
            registry: RegistryConfig::default(),
            router: RouterConfig::default(),
            loader: LoaderConfig::default(),
            ingress: IngressConfig::default(),
        }
    }
}

impl AppConfig {
    /// defaults → YAML file → `APP__SECTION__KEY` environment variables.
    /// `server.home_dir` is normalized and created; a relative `modules_dir`
    /// is resolved against the config file's directory.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        let config_path = config_path.as_ref();
        anyhow::ensure!(
            config_path.is_file(),
            "config file not found: {}",
            config_path.display()
        );
        // Optional sections stay None unless YAML/ENV provide them.
        let base = AppConfig {
            logging: None,
            ..AppConfig::default()
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path))
            // APP__SERVER__PORT=8087 maps to server.port
            .merge(Env::prefixed("APP__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .with_context(|| format!("failed to load config from {}", config_path.display()))?;

        normalize_home_dir_inplace(&mut config.server)
            .context("failed to resolve server.home_dir")?;

        if let Some(dir) = config.modules_dir.as_mut() {
            let p = PathBuf::from(dir.as_str());
            if p.is_relative() {
                if let Some(parent) = config_path.parent() {
                    *dir = parent.join(p).to_string_lossy().to_string();
                }
            }
        }

        Ok(config)
    }

    /// Load from `config_path`, or start from defaults when none is given.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut c = Self::default();
                normalize_home_dir_inplace(&mut c.server)
                    .context("failed to resolve server.home_dir (defaults)")?;
                Ok(c)
            }
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("failed to serialize config to YAML")
    }

    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }

        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            match args.verbose {
                0 => {}
                1 => default_section.console_level = "debug".to_string(),
                _ => default_section.console_level = "trace".to_string(),
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn home_dir(&self) -> &Path {
        Path::new(&self.server.home_dir)
    }

    pub fn modules_dir(&self) -> Option<PathBuf> {
        self.modules_dir
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
    }

    /// The in-process settings store built from `module_settings`.
    pub fn settings_store(&self) -> InMemorySettingsStore {
        InMemorySettingsStore::new(self.module_settings.iter().map(|(id, s)| ModuleSettings {
            module_id: id.clone(),
            ..s.clone()
        }))
    }
}

/// Command line arguments passed down from the binary.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub port: Option<u16>,
    pub print_config: bool,
    pub verbose: u8,
}

/// Serves the `modules` bag to modkit.
#[derive(Debug, Clone, Default)]
pub struct AppConfigProvider {
    modules: HashMap<String, serde_json::Value>,
}

impl AppConfigProvider {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            modules: config.modules.clone(),
        }
    }
}

impl modkit::ConfigProvider for AppConfigProvider {
    fn get_module_config(&self, module_id: &str) -> Option<&serde_json::Value> {
        self.modules.get(module_id)
    }
}

fn normalize_home_dir_inplace(server: &mut ServerConfig) -> Result<()> {
    let resolved = resolve_home_dir(Some(server.home_dir.as_str()), DEFAULT_SUBDIR, true)?;
    server.home_dir = resolved.to_string_lossy().to_string();
    Ok(())
}
