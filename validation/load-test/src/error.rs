//! Error types for the books load-test harness.
//!
//! Only configuration-time failures surface as errors. Per-request
//! expectation failures are recorded as metrics and never reach here.

use thiserror::Error;

/// Result type alias using HarnessError.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Primary error type for harness setup and fixture handling.
#[derive(Debug, Error)]
pub enum HarnessError {
    // === Fixture Errors ===
    #[error("Fixture set is empty")]
    EmptyFixtureSet,

    #[error("Invalid page count for '{title}': {value}")]
    InvalidPageCount { title: String, value: String },

    #[error("Failed to read fixture file '{path}': {message}")]
    FixtureRead { path: String, message: String },

    #[error("Malformed fixture file '{path}': {message}")]
    FixtureParse { path: String, message: String },

    // === Configuration Errors ===
    #[error("Invalid base URL '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid threshold '{expression}' for metric '{metric}': {message}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        message: String,
    },

    #[error("Invalid scenario file: {0}")]
    ScenarioFile(String),

    // === Infrastructure Errors ===
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl HarnessError {
    /// Whether this error stops a run before any iteration executes.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, HarnessError::Io(_))
    }
}

// Conversion from common error types
impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        HarnessError::InvalidConfig(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for HarnessError {
    fn from(err: serde_yaml::Error) -> Self {
        HarnessError::ScenarioFile(err.to_string())
    }
}

impl From<reqwest::Error> for HarnessError {
    fn from(err: reqwest::Error) -> Self {
        HarnessError::HttpClient(err.to_string())
    }
}
