use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment prefix for overrides, e.g. `APIKIT__SERVER__BIND_ADDR=0.0.0.0:9000`.
pub const ENV_PREFIX: &str = "APIKIT__";

/// Main application configuration with strongly-typed sections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// HTTP host configuration.
    pub server: ServerConfig,
    /// API description and documentation pages.
    #[serde(default)]
    pub docs: DocsConfig,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Base directory for relative log file paths. Empty means the working directory.
    #[serde(default)]
    pub home_dir: String,
    pub bind_addr: String,
    #[serde(default)]
    pub cors_enabled: bool,
    /// Maximum buffered request body size.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

/// Settings for the synthesized API description and the pages serving it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DocsConfig {
    /// Serve `/openapi.json` and `/api.html`.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Logging configuration - maps subsystem names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit subsystems.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/api.log", empty disables the file sink
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

fn default_body_limit() -> usize {
    16 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_title() -> String {
    "API".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            home_dir: String::new(),
            bind_addr: "127.0.0.1:8087".to_string(),
            cors_enabled: false,
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            title: default_title(),
            version: default_version(),
            description: None,
        }
    }
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: String::new(),
            file_level: "debug".to_string(),
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
            docs: DocsConfig::default(),
            logging: Some(default_logging_config()),
        }
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::providers::{Format, Yaml};

        if !config_path.as_ref().is_file() {
            anyhow::bail!("Config file not found: {}", config_path.as_ref().display());
        }

        let figment = Self::base_figment()
            .merge(Yaml::file(config_path.as_ref()))
            .merge(figment::providers::Env::prefixed(ENV_PREFIX).split("__"));

        figment
            .extract()
            .with_context(|| {
                format!("Failed to load config from {}", config_path.as_ref().display())
            })
    }

    /// Load configuration from file, or defaults plus environment when no file is given.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut config: AppConfig = Self::base_figment()
                    .merge(figment::providers::Env::prefixed(ENV_PREFIX).split("__"))
                    .extract()
                    .context("Failed to extract config from environment")?;
                config.logging.get_or_insert_with(default_logging_config);
                Ok(config)
            }
        }
    }

    // Optional sections stay None unless YAML/ENV provide them.
    fn base_figment() -> figment::Figment {
        use figment::{providers::Serialized, Figment};

        let base = AppConfig {
            server: ServerConfig::default(),
            docs: DocsConfig::default(),
            logging: None,
        };
        Figment::new().merge(Serialized::defaults(base))
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Base directory used to resolve relative log file paths.
    pub fn home_dir(&self) -> PathBuf {
        if self.server.home_dir.trim().is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.server.home_dir)
        }
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.bind_addr = match self.server.bind_addr.rsplit_once(':') {
                Some((host, _)) => format!("{host}:{port}"),
                None => format!("{}:{port}", self.server.bind_addr),
            };
        }

        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            default_section.console_level = match args.verbose {
                0 => default_section.console_level.clone(),
                1 => "debug".to_string(),
                _ => "trace".to_string(),
            };
        }
    }
}

/// Command line arguments that affect configuration.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub port: Option<u16>,
    pub print_config: bool,
    pub verbose: u8,
}
