use thiserror::Error;

#[derive(Error, Debug)]
pub enum OperatorError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("API server unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid resource: {0}")]
    Invalid(String),

    #[error("Reconciliation cancelled")]
    Cancelled,

    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, OperatorError>;

/// Bounded failure classification used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Unavailable,
    Validation,
    Cancelled,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Conflict => "conflict",
            ErrorCategory::Unavailable => "unavailable",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OperatorError {
    /// Whether a later invocation can be expected to succeed without a spec change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OperatorError::Conflict(_)
                | OperatorError::Unavailable(_)
                | OperatorError::Cancelled
                | OperatorError::Kube(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::NotFound(_))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OperatorError::NotFound(_) => ErrorCategory::NotFound,
            OperatorError::Conflict(_) => ErrorCategory::Conflict,
            OperatorError::Unavailable(_) => ErrorCategory::Unavailable,
            OperatorError::Invalid(_) => ErrorCategory::Validation,
            OperatorError::Cancelled => ErrorCategory::Cancelled,
            OperatorError::Kube(_) | OperatorError::Serialization(_) | OperatorError::Config(_) => {
                ErrorCategory::Internal
            }
        }
    }
}

impl From<kube::Error> for OperatorError {
    /// Sorts a client error into the operator taxonomy by HTTP status.
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => OperatorError::NotFound(resp.message),
                409 => OperatorError::Conflict(resp.message),
                400 | 422 => OperatorError::Invalid(resp.message),
                429 | 500..=599 => OperatorError::Unavailable(resp.message),
                _ => OperatorError::Kube(kube::Error::Api(resp)),
            },
            kube::Error::HyperError(e) => OperatorError::Unavailable(e.to_string()),
            kube::Error::Service(e) => OperatorError::Unavailable(e.to_string()),
            other => OperatorError::Kube(other),
        }
    }
}
