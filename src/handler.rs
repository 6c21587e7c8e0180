use std::sync::Arc;

use axum::{extract::State, response::Response};
use axum::response::IntoResponse;
use tracing::info;

use crate::api::{ApiResult, StatusResponse};
use crate::db::Database;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
}

pub async fn healthcheck(State(state): State<AppState>) -> Response {
    info!("got healthcheck request");

    let result = match state.db.ping().await {
        Ok(()) => ApiResult::Ok(StatusResponse {
            status: "ok".to_string(),
        }),
        Err(e) => {
            tracing::error!("database ping failed: {}", crate::unpack_error(&*e));
            ApiResult::ServerError("Database connection failed".to_string())
        }
    };

    result.into_response()
}
