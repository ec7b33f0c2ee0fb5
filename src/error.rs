//! Custom error types for the Obico Guardian bridge.
//!
//! Every failure inside the coordinator is classified into one of these types
//! so the detection trigger can decide whether it is evidence about the
//! inference endpoint's reachability. None of them escape the trigger.

use std::fmt;

/// Main error type for Obico Guardian operations.
#[derive(Debug)]
pub enum GuardianError {
    /// Configuration and setup errors.
    ConfigError(ConfigError),

    /// Network and connectivity errors.
    NetworkError(NetworkError),

    /// Errors returned by, or decoding the answer of, the inference service.
    InferenceError(InferenceError),

    /// Errors resolving config entries and coordinators.
    RegistryError(RegistryError),
}

/// Errors related to configuration and entry setup.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    MissingEnvVar { var_name: String },

    /// Invalid configuration values provided.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// An entry with the same unique id already exists.
    AlreadyConfigured { unique_id: String },
}

/// Errors related to network connectivity and communication.
#[derive(Debug)]
pub enum NetworkError {
    /// Generic network request failed.
    RequestFailed { url: String, reason: String },

    /// Network timeout occurred.
    Timeout { url: String, timeout_seconds: u64 },

    /// Remote answered with something other than 200 OK.
    UnexpectedStatus { url: String, status: u16 },
}

/// Errors specific to the remote inference call.
#[derive(Debug)]
pub enum InferenceError {
    /// The inference endpoint rejected the request.
    ApiError { status: u16, body: String },

    /// The response body was not the expected JSON document.
    MalformedResponse { reason: String },

    /// The annotated image could not be decoded.
    InvalidImage { reason: String },
}

/// Errors related to the entry registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// No coordinator is loaded for the entry.
    UnknownEntry { entry_id: String },

    /// The entry is already set up.
    AlreadyLoaded { entry_id: String },
}

impl GuardianError {
    /// Whether this failure is plausibly temporary (timeouts, refused
    /// connections, non-success answers) rather than a broken contract with
    /// the inference service.
    pub fn is_transient(&self) -> bool {
        match self {
            GuardianError::NetworkError(_) => true,
            GuardianError::InferenceError(InferenceError::ApiError { .. }) => true,
            GuardianError::InferenceError(_) => false,
            GuardianError::ConfigError(_) | GuardianError::RegistryError(_) => false,
        }
    }
}

impl NetworkError {
    /// Classify a reqwest failure for the given URL.
    pub fn from_reqwest(url: &str, timeout_seconds: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NetworkError::Timeout {
                url: url.to_string(),
                timeout_seconds,
            }
        } else {
            NetworkError::RequestFailed {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

impl fmt::Display for GuardianError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardianError::ConfigError(e) => write!(f, "Configuration error: {}", e),
            GuardianError::NetworkError(e) => write!(f, "Network error: {}", e),
            GuardianError::InferenceError(e) => write!(f, "Inference error: {}", e),
            GuardianError::RegistryError(e) => write!(f, "Registry error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingEnvVar { var_name } => {
                write!(f, "Required environment variable '{}' is not set", var_name)
            }
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for field '{}': {}",
                    value, field, reason
                )
            }
            ConfigError::AlreadyConfigured { unique_id } => {
                write!(f, "An entry for '{}' is already configured", unique_id)
            }
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::RequestFailed { url, reason } => {
                write!(f, "Network request to '{}' failed: {}", url, reason)
            }
            NetworkError::Timeout {
                url,
                timeout_seconds,
            } => {
                write!(
                    f,
                    "Request to '{}' timed out after {} seconds",
                    url, timeout_seconds
                )
            }
            NetworkError::UnexpectedStatus { url, status } => {
                write!(f, "Request to '{}' returned HTTP {}", url, status)
            }
        }
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::ApiError { status, body } => {
                write!(f, "Obico API failed {}: {}", status, body)
            }
            InferenceError::MalformedResponse { reason } => {
                write!(f, "Malformed detection response: {}", reason)
            }
            InferenceError::InvalidImage { reason } => {
                write!(f, "Annotated image could not be decoded: {}", reason)
            }
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::UnknownEntry { entry_id } => {
                write!(f, "No coordinator loaded for entry '{}'", entry_id)
            }
            RegistryError::AlreadyLoaded { entry_id } => {
                write!(f, "Entry '{}' is already set up", entry_id)
            }
        }
    }
}

// Implement std::error::Error trait
impl std::error::Error for GuardianError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GuardianError::ConfigError(e) => Some(e),
            GuardianError::NetworkError(e) => Some(e),
            GuardianError::InferenceError(e) => Some(e),
            GuardianError::RegistryError(e) => Some(e),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for NetworkError {}
impl std::error::Error for InferenceError {}
impl std::error::Error for RegistryError {}

// Conversion traits for easy error propagation
impl From<ConfigError> for GuardianError {
    fn from(err: ConfigError) -> Self {
        GuardianError::ConfigError(err)
    }
}

impl From<NetworkError> for GuardianError {
    fn from(err: NetworkError) -> Self {
        GuardianError::NetworkError(err)
    }
}

impl From<InferenceError> for GuardianError {
    fn from(err: InferenceError) -> Self {
        GuardianError::InferenceError(err)
    }
}

impl From<RegistryError> for GuardianError {
    fn from(err: RegistryError) -> Self {
        GuardianError::RegistryError(err)
    }
}
