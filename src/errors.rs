use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaceIdError {
    #[error("No face found in the image")]
    NoFaceDetected,

    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    #[error("embedding dimension mismatch: expected {expected} values, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),

    #[error("face extraction timed out after {millis} ms")]
    ExtractionTimeout { millis: u64 },

    #[error("failed to initialize face model: {0}")]
    ModelInitialization(String),

    #[error("face model is not loaded")]
    ModelNotReady,

    #[error("face model inference failed: {0}")]
    Inference(String),

    #[error("invalid username: {0}")]
    InvalidUsername(String),

    #[error("missing form field '{0}'")]
    MissingField(&'static str),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("identity store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("stored record for '{username}' is corrupt: {message}")]
    CorruptRecord { username: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl FaceIdError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FaceIdError::NoFaceDetected => StatusCode::OK,
            FaceIdError::ImageDecode(_) => StatusCode::OK,
            FaceIdError::DimensionMismatch { .. } => StatusCode::OK,
            FaceIdError::InvalidEmbedding(_) => StatusCode::OK,
            FaceIdError::ExtractionTimeout { .. } => StatusCode::OK,
            FaceIdError::InvalidUsername(_) => StatusCode::BAD_REQUEST,
            FaceIdError::MissingField(_) => StatusCode::BAD_REQUEST,
            FaceIdError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            FaceIdError::ModelInitialization(_) => StatusCode::SERVICE_UNAVAILABLE,
            FaceIdError::ModelNotReady => StatusCode::SERVICE_UNAVAILABLE,
            FaceIdError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FaceIdError::CorruptRecord { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            FaceIdError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FaceIdError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text safe to hand back to a caller. Store and internal failures are
    /// collapsed so driver or SQL details only ever reach the logs.
    pub fn public_message(&self) -> String {
        match self {
            FaceIdError::StoreUnavailable(_) => "Identity store unavailable".to_string(),
            FaceIdError::CorruptRecord { .. } => "Stored identity record is unreadable".to_string(),
            FaceIdError::Inference(_) => "Face model inference failed".to_string(),
            FaceIdError::Internal(_) => "Internal error".to_string(),
            FaceIdError::ImageDecode(_) => "Could not decode image".to_string(),
            FaceIdError::ModelInitialization(_) => "Face model unavailable".to_string(),
            other => other.to_string(),
        }
    }

    /// Failures that belong to the submitted image rather than to the service.
    pub fn is_extraction_failure(&self) -> bool {
        matches!(
            self,
            FaceIdError::NoFaceDetected
                | FaceIdError::ImageDecode(_)
                | FaceIdError::ExtractionTimeout { .. }
                | FaceIdError::InvalidEmbedding(_)
        )
    }
}

impl From<rusqlite::Error> for FaceIdError {
    fn from(err: rusqlite::Error) -> Self {
        FaceIdError::StoreUnavailable(err.to_string())
    }
}

impl From<r2d2::Error> for FaceIdError {
    fn from(err: r2d2::Error) -> Self {
        FaceIdError::StoreUnavailable(err.to_string())
    }
}

pub type FaceIdResult<T> = Result<T, FaceIdError>;
