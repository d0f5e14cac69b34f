use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrisapError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Interpreter error: {0}")]
    Interpreter(String),

    #[error("Failed to install {package}: {reason}")]
    Install { package: String, reason: String },

    #[error("Installing {package} timed out after {secs}s")]
    InstallTimeout { package: String, secs: u64 },

    #[error("Unsupported on {platform}: {operation}")]
    Unsupported {
        platform: &'static str,
        operation: String,
    },

    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, CrisapError>;
