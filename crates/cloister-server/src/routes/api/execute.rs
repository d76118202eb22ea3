use std::time::Duration;

use axum::{Json, extract::State};
use cloister::{SandboxOptions, Value};

use super::{
    error::HttpApiError,
    types::{ExecuteRequest, ExecuteResponse},
};
use crate::routes::AppState;

fn convert_args(args: &[serde_json::Value]) -> Result<Vec<Value>, HttpApiError> {
    args.iter()
        .enumerate()
        .map(|(i, arg)| {
            Value::from_json_value(arg).map_err(|e| {
                HttpApiError::invalid_request(format!("Failed to convert argument {i}: {e}"))
            })
        })
        .collect()
}

fn overrides(state: &AppState, req: &ExecuteRequest) -> Result<SandboxOptions, HttpApiError> {
    let mut options = SandboxOptions::default();
    match req.timeout_ms {
        Some(0) => return Err(HttpApiError::invalid_request("timeout_ms must be positive")),
        Some(ms) => options = options.with_timeout(Duration::from_millis(ms)),
        None => {}
    }
    if let Some(bytes) = req.max_memory {
        if bytes > state.max_memory {
            return Err(HttpApiError::invalid_request(format!(
                "max_memory {bytes} exceeds the server limit of {}",
                state.max_memory
            )));
        }
        options = options.with_memory_limit(bytes);
    }
    Ok(options)
}

#[tracing::instrument(skip_all, fields(script_len = req.script.len()))]
pub async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, HttpApiError> {
    let args = convert_args(&req.args)?;
    let options = overrides(&state, &req)?;

    let out = state.invoker.run_with(&req.script, args, &options).await?;
    let result = out
        .to_json_value()
        .map_err(|e| HttpApiError::internal(format!("Failed to convert Value to JSON: {e}")))?;
    Ok(Json(ExecuteResponse { result }))
}
