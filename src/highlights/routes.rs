use axum::{
    Router,
    routing::{delete, get},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/highlights",
            get(handler::list_highlights)
                .post(handler::create_highlight)
                .delete(handler::delete_highlight)
                .options(handler::preflight)
                .fallback(handler::method_not_allowed),
        )
        .route(
            "/highlights/:id",
            delete(handler::delete_highlight_by_path)
                .options(handler::preflight)
                .fallback(handler::method_not_allowed),
        )
}
