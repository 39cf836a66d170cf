//! Error types shared across the crate.
//!
//! Only the workbook reader and the upload pre-check produce user-facing data
//! errors. Series building and analysis never fail; an empty result is a valid
//! outcome there.

/// Raised by the workbook reader when the bytes are not a readable spreadsheet
/// of the declared format (corrupt, truncated, encrypted, or another format).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("could not read spreadsheet: {0}")]
pub struct UnreadableFileError(pub String);

/// Rejections issued before the workbook reader is invoked.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PrecheckError {
    /// The declared MIME type (and extension) is not a supported spreadsheet.
    #[error("unsupported file type: {0}")]
    InvalidFileType(String),

    /// The upload exceeds the configured size cap.
    #[error("file is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },
}

/// Failures of the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,

    /// A uniqueness rule was violated (duplicate username or email).
    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
}

/// Errors surfaced by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Precheck(#[from] PrecheckError),

    /// A request body over the transport limit, rejected before it is read.
    #[error("{0}")]
    PayloadTooLarge(String),

    #[error(transparent)]
    Store(StoreError),

    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Store(other),
        }
    }
}

#[cfg(feature = "web")]
impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Precheck(PrecheckError::InvalidFileType(_)) => StatusCode::BAD_REQUEST,
            AppError::Precheck(PrecheckError::FileTooLarge { .. })
            | AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Store(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("request failed: {}", self);
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
    }
}
