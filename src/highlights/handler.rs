//! HTTP handlers for the highlight Sync API

use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{Method, StatusCode},
};

use super::HighlightStore;
use crate::api::{ApiResult, CreateHighlightRequest, DeleteParams, DeletedResponse, ListParams};
use crate::error::HighlightError;
use crate::handler::AppState;
use crate::model::{Highlight, NewHighlight};

const SERVER_ERROR: &str = "Internal server error";

pub async fn create_highlight(
    State(state): State<AppState>,
    payload: Result<Json<CreateHighlightRequest>, JsonRejection>,
) -> ApiResult<Highlight> {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            tracing::info!("rejected highlight body: {}", rejection.body_text());
            return ApiResult::Validation("Invalid JSON body".to_string());
        }
    };

    let input = match NewHighlight::new(
        payload.user_id.as_deref(),
        payload.url.as_deref(),
        payload.text.as_deref(),
        payload.color.as_deref(),
    ) {
        Ok(input) => input,
        Err(HighlightError::Validation(msg)) => return ApiResult::Validation(msg),
        Err(e) => return ApiResult::Validation(e.to_string()),
    };

    let store = HighlightStore::new(state.db.connection());
    match store.create(input).await {
        Ok(highlight) => {
            tracing::info!(id = %highlight.id, url = %highlight.url, "created highlight");
            ApiResult::Created(highlight)
        }
        Err(e) => {
            tracing::error!("Failed to create highlight: {:#}", e);
            ApiResult::ServerError(SERVER_ERROR.to_string())
        }
    }
}

pub async fn list_highlights(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> ApiResult<Vec<Highlight>> {
    let Ok(Query(params)) = params else {
        return ApiResult::Validation("Missing required fields".to_string());
    };

    let (Some(user_id), Some(url)) = (non_blank(params.user_id), non_blank(params.url)) else {
        tracing::info!("list request missing userId or url");
        return ApiResult::Validation("Missing required fields".to_string());
    };

    let store = HighlightStore::new(state.db.connection());
    match store.list(&user_id, &url).await {
        Ok(highlights) => {
            tracing::info!(count = highlights.len(), url = %url, "listed highlights");
            ApiResult::Ok(highlights)
        }
        Err(e) => {
            tracing::error!("Failed to list highlights: {:#}", e);
            ApiResult::ServerError(SERVER_ERROR.to_string())
        }
    }
}

pub async fn delete_highlight(
    State(state): State<AppState>,
    params: Result<Query<DeleteParams>, QueryRejection>,
) -> ApiResult<DeletedResponse> {
    let id = params.ok().and_then(|Query(p)| non_blank(p.id));
    let Some(id) = id else {
        return ApiResult::Validation("Missing highlight ID".to_string());
    };
    delete_by_id(&state, id).await
}

pub async fn delete_highlight_by_path(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DeletedResponse> {
    match non_blank(Some(id)) {
        Some(id) => delete_by_id(&state, id).await,
        None => ApiResult::Validation("Missing highlight ID".to_string()),
    }
}

async fn delete_by_id(state: &AppState, id: String) -> ApiResult<DeletedResponse> {
    let store = HighlightStore::new(state.db.connection());
    match store.delete(&id).await {
        Ok(true) => {
            tracing::info!(id = %id, "deleted highlight");
            ApiResult::Ok(DeletedResponse::new(id))
        }
        Ok(false) => ApiResult::NotFound("Highlight not found".to_string()),
        Err(e) => {
            tracing::error!("Failed to delete highlight {}: {:#}", id, e);
            ApiResult::ServerError(SERVER_ERROR.to_string())
        }
    }
}

/// Plain OPTIONS requests; browser preflights are answered by the CORS layer.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub async fn method_not_allowed(method: Method) -> ApiResult<()> {
    tracing::info!(%method, "method not allowed");
    ApiResult::MethodNotAllowed(method)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
