use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::get,
};
use std::error::Error;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::{ALLOWED_HEADERS, ALLOWED_METHODS};
use crate::handler::{AppState, healthcheck};

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod handler;
pub mod highlights;
pub mod model;
pub mod page;
pub mod popup;
pub mod remote;

pub fn unpack_error(err: &(dyn Error)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}

/// The full Sync API: health check, highlight routes and cross-origin headers on
/// every response, preflight included.
pub fn build_router(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    let origin = HeaderValue::from_str(cors_origin)
        .map_err(|e| anyhow::anyhow!("invalid cors origin {cors_origin:?}: {e}"))?;
    let allow_origin = if cors_origin == "*" {
        AllowOrigin::any()
    } else {
        AllowOrigin::exact(origin.clone())
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let headers = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            origin,
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        ))
        .layer(cors);

    let app = Router::new()
        .route("/", get(healthcheck))
        .merge(highlights::routes())
        .layer(headers)
        .with_state(state);

    Ok(app)
}
