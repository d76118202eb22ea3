mod api;
mod demo;
mod state;

use std::future::ready;

use axum::{
    http::{HeaderValue, StatusCode},
    response::Response,
    routing::get,
};
use http::header::CONTENT_TYPE;
use metrics_exporter_prometheus::PrometheusHandle;
pub use state::AppState;

pub fn router(state: &AppState, prometheus: PrometheusHandle) -> axum::Router {
    axum::Router::new()
        .route("/", get(demo::run_demo))
        .route("/debug/healthz", get(|| ready(StatusCode::NO_CONTENT)))
        .route(
            "/debug/metrics",
            get(move || {
                let mut resp = Response::new(prometheus.render());
                resp.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                ready(resp)
            }),
        )
        .with_state(state.clone())
        .nest("/v1", api::router(state))
}
