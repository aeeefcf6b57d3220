//! Error types for the CycleGAN trainer

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library
///
/// Nothing in the crate retries on any of these. They surface to the
/// caller of [`crate::training::Trainer::run`], which abandons the run.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid hyperparameter combination, detected before training starts
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Non-finite loss or gradient encountered during a training step
    #[error("Non-finite {term} ({value}) at epoch {epoch}, batch {batch}")]
    NumericalFailure {
        term: &'static str,
        value: f64,
        epoch: usize,
        batch: usize,
    },

    /// Requested device is not present
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Data source produced no items
    #[error("Data source exhausted: {0}")]
    DataSourceExhausted(String),

    /// libtorch error
    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Whether the error was raised before any training happened
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::ResourceUnavailable(_) | Error::DataSourceExhausted(_)
        )
    }
}
