mod error;
mod execute;
pub mod types;

use axum::{Router, routing::post};

use super::AppState;

pub fn router(state: &AppState) -> Router {
    Router::new()
        .route("/execute", post(execute::execute))
        .with_state(state.clone())
}
