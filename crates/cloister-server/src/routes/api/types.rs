use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub script: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    /// Overrides the server default; `0` is rejected.
    pub timeout_ms: Option<u64>,
    /// Bytes; may not exceed the server ceiling.
    pub max_memory: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub result: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: HttpError,
}

#[derive(Debug, Serialize)]
pub struct HttpError {
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    ScriptError,
    ResourceExhausted,
    Timeout,
    Internal,
}
