//! axum router for the local read endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics::counter;
use serde::Serialize;
use tracing::warn;

use crate::{ApiError, ApiResult, InventoryApi};

const INTERNAL_ERROR_BODY: &str = r#"{"status_code":500,"error":"internal server error"}"#;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self, "api: request failed");
        counter!("api_errors_total", 1u64);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "application/json")],
            INTERNAL_ERROR_BODY,
        )
            .into_response()
    }
}

/// Encode before answering so a serialization failure still becomes a clean 500.
fn json<T: Serialize + ?Sized>(value: &T) -> ApiResult<Response> {
    let body = serde_json::to_vec(value)?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

type Api = Arc<dyn InventoryApi>;

async fn inventory(State(api): State<Api>) -> ApiResult<Response> {
    counter!("api_requests_total", 1u64, "endpoint" => "inventory");
    json(api.inventory().await?.as_ref())
}

async fn metadata(State(api): State<Api>) -> ApiResult<Response> {
    counter!("api_requests_total", 1u64, "endpoint" => "metadata");
    match api.metadata().await? {
        Some(meta) => json(meta.as_ref()),
        None => json(&serde_json::json!({})),
    }
}

async fn healthz(State(api): State<Api>) -> ApiResult<Response> {
    json(&api.health().await?)
}

pub fn router(api: Arc<dyn InventoryApi>) -> Router {
    Router::new()
        .route("/", get(inventory))
        .route("/api/v1/inventory", get(inventory))
        .route("/api/v1/metadata", get(metadata))
        .route("/healthz", get(healthz))
        .with_state(api)
}
