//! CLI error handling with user-friendly messages.

use imagepipe::cache::CacheError;
use imagepipe::config::ConfigFileError;
use imagepipe::PipelineError;
use std::fmt;
use std::path::PathBuf;
use std::process;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file could not be read or is invalid
    Config(ConfigFileError),
    /// Invalid command line argument
    InvalidArgument(String),
    /// Failed to set up a component of the pipeline
    Setup(String),
    /// Disk cache could not be opened
    DiskCache(CacheError),
    /// One or more loads failed
    Fetch { failed: usize, total: usize },
    /// Failed to write an output file
    FileWrite { path: PathBuf, error: String },
}

impl CliError {
    /// Exit the process with an error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Config(_) = self {
            eprintln!();
            eprintln!(
                "Check {} or pass a different file with --config",
                imagepipe::config::config_file_path().display()
            );
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            CliError::Setup(msg) => write!(f, "Failed to create pipeline: {}", msg),
            CliError::DiskCache(e) => write!(f, "Failed to open disk cache: {}", e),
            CliError::Fetch { failed, total } => write!(f, "{} of {} images failed to load", failed, total),
            CliError::FileWrite { path, error } => {
                write!(f, "Failed to write file '{}': {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::DiskCache(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<CacheError> for CliError {
    fn from(e: CacheError) -> Self {
        CliError::DiskCache(e)
    }
}

/// Formats a pipeline failure for a single URL.
pub fn describe_failure(url: &str, error: &PipelineError) -> String {
    format!("{}: {}", url, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_message() {
        let err = CliError::Fetch { failed: 2, total: 5 };
        assert_eq!(err.to_string(), "2 of 5 images failed to load");
    }

    #[test]
    fn test_describe_failure() {
        let text = describe_failure("https://example.com/a.png", &PipelineError::Cancelled);
        assert!(text.starts_with("https://example.com/a.png: "));
    }
}
