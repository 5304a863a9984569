//! CLI runner for common setup.
//!
//! Loads the configuration file and initializes logging once, so each
//! command handler starts from the same state.

use crate::error::CliError;
use imagepipe::config::ConfigFile;
use imagepipe::logging::{default_log_dir, default_log_file, init_logging, LoggingGuard};
use std::path::Path;
use tracing::info;

/// Runner that owns the logging guard and loaded configuration.
pub struct CliRunner {
    logging_guard: LoggingGuard,
    config: ConfigFile,
}

impl CliRunner {
    /// Load the configuration (default path unless `config_path` is given)
    /// and initialize logging.
    pub fn new(config_path: Option<&Path>, verbose: bool) -> Result<Self, CliError> {
        let config = match config_path {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load()?,
        };

        let level = if verbose { "debug" } else { "info" };
        let logging_guard = init_logging(default_log_dir(), default_log_file(), level)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("imagepipe v{}", imagepipe::VERSION);
        info!(log_file = %self.logging_guard.path().display(), "imagepipe CLI: {} command", command);
    }
}
