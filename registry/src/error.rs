//! Registry error taxonomy: typed/structured at every boundary,
//! never free-form strings.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Short machine tag matching the wire taxonomy: `not_found`,
    /// `validation_error`, `service_unavailable`, `timeout`, `internal`.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Timeout(_) => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}
