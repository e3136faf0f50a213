use thiserror::Error;

/// Errors shared by the stores, the gateway and the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Malformed frame, body, or identifier.
    #[error("{0}")]
    BadInput(String),

    /// Well-formed request that references something unusable.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Unexpected store error or marshalling failure.
    #[error("{0}")]
    Internal(String),
}

impl ChatError {
    /// Stable tag used in error frames and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadInput(_) => "bad_input",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Internal(_) => "internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadInput(m)
            | Self::BadRequest(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Unauthorized(m)
            | Self::Internal(m) => m,
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("error marshalling response: {}", err))
    }
}
