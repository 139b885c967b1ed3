//! Process bootstrap shared by apikit binaries: layered configuration and logging.

pub mod config;
pub mod logging;

pub use config::{
    default_logging_config, AppConfig, CliArgs, DocsConfig, LoggingConfig, Section, ServerConfig,
};
