use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cloister::{Error as CloisterError, ErrorKind};

use super::types::{ErrorCode, ErrorResponse, HttpError};

#[derive(Debug)]
pub struct HttpApiError {
    pub code: ErrorCode,
    pub kind: Option<ErrorKind>,
    pub message: String,
}

impl HttpApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            kind: None,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        let status = match self.code {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::ScriptError | ErrorCode::ResourceExhausted => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ErrorCode::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            error: HttpError {
                code: self.code,
                kind: self.kind.map(ErrorKind::as_str),
                message: self.message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<CloisterError> for HttpApiError {
    fn from(err: CloisterError) -> Self {
        let kind = err.kind();
        let code = match kind {
            ErrorKind::SandboxEvaluation
            | ErrorKind::EntryPointInvocation
            | ErrorKind::DelegateFailure
            | ErrorKind::Marshal => ErrorCode::ScriptError,
            ErrorKind::ResourceExhausted => ErrorCode::ResourceExhausted,
            ErrorKind::Timeout => ErrorCode::Timeout,
            ErrorKind::Binding | ErrorKind::Runtime => ErrorCode::Internal,
        };
        Self {
            code,
            kind: Some(kind),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for HttpApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for HttpApiError {}
