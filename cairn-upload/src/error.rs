use cairn_core::AccessError;
use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Coarse classification of an [`UploadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Configuration,
    Backend,
    NotFound,
    Access,
}

/// Errors that can occur while driving an upload
#[derive(Error, Debug)]
pub enum UploadError {
    /// Size/received invariant violated, or a chunk was rejected.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// No current assetstore, unknown assetstore type, or bad settings.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage backend error: {source}")]
    Backend {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Upload not found: {upload_id}")]
    NotFound { upload_id: String },

    #[error("Access denied: {source}")]
    Access {
        #[from]
        source: AccessError,
    },
}

impl UploadError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            source: Box::new(error),
        }
    }

    /// Create a backend error from a plain message
    pub fn backend_msg<S: Into<String>>(message: S) -> Self {
        let message: String = message.into();
        Self::Backend {
            source: message.into(),
        }
    }

    /// Create an upload not found error
    pub fn not_found<S: Into<String>>(upload_id: S) -> Self {
        Self::NotFound {
            upload_id: upload_id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Backend { .. } => ErrorKind::Backend,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Access { .. } => ErrorKind::Access,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    pub fn is_configuration(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    pub fn is_backend(&self) -> bool {
        self.kind() == ErrorKind::Backend
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        Self::backend(err)
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        Self::backend(err)
    }
}
