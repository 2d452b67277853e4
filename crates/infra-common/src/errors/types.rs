use thiserror::Error;

/// A type alias for handling `Result`s with the infrastructure [`enum@Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared infrastructure
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reading a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML that does not match the expected shape
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Logging could not be installed (usually a global subscriber already exists)
    #[error("Logging setup error: {0}")]
    Logging(String),

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),

    /// Error carrying extra context
    #[error("{0}")]
    Custom(String),
}
