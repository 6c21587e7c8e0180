use axum::{
    Json,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

pub const ALLOWED_METHODS: &str = "GET, POST, DELETE, OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type, Authorization";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHighlightRequest {
    pub user_id: Option<String>,
    pub url: Option<String>,
    pub text: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub user_id: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletedResponse {
    pub message: String,
    pub id: String,
}

impl DeletedResponse {
    pub fn new(id: String) -> Self {
        DeletedResponse {
            message: "Deleted".to_string(),
            id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Outcome of one Sync API operation; the single place that decides status codes.
#[derive(Debug)]
pub enum ApiResult<T> {
    Ok(T),
    Created(T),
    Validation(String),
    NotFound(String),
    MethodNotAllowed(Method),
    ServerError(String),
}

fn error_body(status: StatusCode, msg: String) -> Response {
    (status, Json(ErrorResponse { error: msg })).into_response()
}

impl<T: Serialize> IntoResponse for ApiResult<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResult::Ok(body) => (StatusCode::OK, Json(body)).into_response(),
            ApiResult::Created(body) => (StatusCode::CREATED, Json(body)).into_response(),
            ApiResult::Validation(msg) => error_body(StatusCode::BAD_REQUEST, msg),
            ApiResult::NotFound(msg) => error_body(StatusCode::NOT_FOUND, msg),
            ApiResult::MethodNotAllowed(method) => {
                let mut response = error_body(
                    StatusCode::METHOD_NOT_ALLOWED,
                    format!("Method {} not allowed", method),
                );
                response
                    .headers_mut()
                    .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
                response
            }
            ApiResult::ServerError(msg) => error_body(StatusCode::INTERNAL_SERVER_ERROR, msg),
        }
    }
}
