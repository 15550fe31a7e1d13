use std::fmt;

use crate::error::SupervisorError;
use crate::store::StoreError;

/// Failure to locate one key. Errors are per key; the rest of the batch is
/// unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    ResourceNotFound,
    InvalidArgument(String),
    Internal {
        message: String,
        cause: Option<String>,
    },
}

impl LocateError {
    pub fn internal(message: impl Into<String>) -> Self {
        LocateError::Internal {
            message: message.into(),
            cause: None,
        }
    }

    pub fn internal_caused_by(message: impl Into<String>, cause: impl fmt::Display) -> Self {
        LocateError::Internal {
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }

    /// Stable error code reported alongside failed keys.
    pub fn code(&self) -> &'static str {
        match self {
            LocateError::ResourceNotFound => "ResourceNotFoundError",
            LocateError::InvalidArgument(_) => "InvalidArgumentError",
            LocateError::Internal { .. } => "InternalError",
        }
    }
}

impl From<StoreError> for LocateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => LocateError::ResourceNotFound,
            other => LocateError::internal_caused_by("error locating object", other),
        }
    }
}

impl fmt::Display for LocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocateError::ResourceNotFound => f.write_str("no such object"),
            LocateError::InvalidArgument(message) => f.write_str(message),
            LocateError::Internal {
                message,
                cause: Some(cause),
            } => write!(f, "{message}: {cause}"),
            LocateError::Internal {
                message,
                cause: None,
            } => f.write_str(message),
        }
    }
}

impl std::error::Error for LocateError {}

impl From<LocateError> for SupervisorError {
    fn from(err: LocateError) -> Self {
        match err {
            LocateError::ResourceNotFound => SupervisorError::ResourceNotFound(err.to_string()),
            LocateError::InvalidArgument(message) => SupervisorError::InvalidArgument(message),
            LocateError::Internal { .. } => SupervisorError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_classified() {
        let missing = LocateError::from(StoreError::NotFound("/a/stor/x".into()));
        assert_eq!(missing, LocateError::ResourceNotFound);
        assert_eq!(missing.code(), "ResourceNotFoundError");
        assert_eq!(missing.to_string(), "no such object");

        let down = LocateError::from(StoreError::Unavailable("no shards".into()));
        assert_eq!(down.code(), "InternalError");
        assert_eq!(
            down.to_string(),
            "error locating object: store unavailable: no shards"
        );
    }
}
