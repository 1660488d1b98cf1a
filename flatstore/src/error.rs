use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlatStoreError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Key not found: {id}")]
    KeyNotFound { id: String },

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Cannot convert '{value}' from {from} to {to}")]
    Conversion {
        value: String,
        from: String,
        to: String,
    },

    #[error("Validation error on field '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("Collection is locked: {path}")]
    Locked { path: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification handed to callers that map failures onto their
/// own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    KeyNotFound,
    Argument,
    Conversion,
    Validation,
    Locked,
    Cancelled,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::KeyNotFound => "key_not_found",
            ErrorKind::Argument => "argument",
            ErrorKind::Conversion => "conversion",
            ErrorKind::Validation => "validation",
            ErrorKind::Locked => "locked",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Io => "io",
        }
    }
}

impl FlatStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlatStoreError::CollectionNotFound(_) | FlatStoreError::NotFound { .. } => {
                ErrorKind::NotFound
            }
            FlatStoreError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            FlatStoreError::Argument(_) | FlatStoreError::Config(_) => ErrorKind::Argument,
            FlatStoreError::Conversion { .. } => ErrorKind::Conversion,
            FlatStoreError::Validation { .. } => ErrorKind::Validation,
            FlatStoreError::Locked { .. } => ErrorKind::Locked,
            FlatStoreError::Cancelled => ErrorKind::Cancelled,
            FlatStoreError::Io(_) | FlatStoreError::Csv(_) | FlatStoreError::Json(_) => {
                ErrorKind::Io
            }
        }
    }

    /// Only lock contention is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlatStoreError::Locked { .. })
    }

    pub(crate) fn argument(message: impl Into<String>) -> Self {
        FlatStoreError::Argument(message.into())
    }
}

pub type Result<T> = std::result::Result<T, FlatStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            FlatStoreError::CollectionNotFound("users".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            FlatStoreError::Config("bad delimiter".into()).kind(),
            ErrorKind::Argument
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(FlatStoreError::from(io).kind(), ErrorKind::Io);
    }

    #[test]
    fn test_only_locked_is_retryable() {
        assert!(FlatStoreError::Locked { path: "a.csv.lock".into() }.is_retryable());
        assert!(!FlatStoreError::Cancelled.is_retryable());
        assert!(!FlatStoreError::KeyNotFound { id: "x".into() }.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = FlatStoreError::NotFound {
            collection: "users".into(),
            id: "42".into(),
        };
        assert_eq!(err.to_string(), "Record not found: users/42");
    }
}
