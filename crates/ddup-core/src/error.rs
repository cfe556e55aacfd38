//! Error types for ddup.

use thiserror::Error;

/// Result type alias for ddup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for ddup
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// A provider could not be constructed from its configuration (fatal at startup)
    #[error("provider init error ({provider}): {message}")]
    ProviderInit {
        /// Provider instance name
        provider: String,
        /// What was missing or invalid
        message: String,
    },

    /// A provider API call failed (recoverable; retried on the next tick)
    #[error("provider error ({provider}): {message}")]
    Provider {
        /// Provider instance name
        provider: String,
        /// Error message, bubbled up verbatim
        message: String,
    },

    /// A provider API response did not match its documented schema
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization errors (config file)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled by shutdown
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a provider init error
    pub fn provider_init(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderInit {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a provider API error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an invalid-response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }
}
