use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use cloister::{Value, args};

use super::AppState;

const DEMO_SCRIPT: &str = r#"
(async function untrusted(url) {
  const response = await fetchDelegate(url);
  log("str => ", response.data);
  return response.data;
})
"#;

/// Fetch the demo URL from inside a sandbox and echo what the script returned.
pub async fn run_demo(State(state): State<AppState>) -> impl IntoResponse {
    match run(&state).await {
        Ok(plain_result) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": "Script executed successfully",
                "plainResult": plain_result,
            })),
        ),
        Err(err) => {
            tracing::error!(error = %err, "demo script failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
        }
    }
}

async fn run(state: &AppState) -> anyhow::Result<serde_json::Value> {
    let out: Value = state
        .invoker
        .run(DEMO_SCRIPT, args![&*state.demo_url]?)
        .await?;
    let plain_result = out.to_json_value()?;
    tracing::info!(%plain_result, "plainResult");
    Ok(plain_result)
}
