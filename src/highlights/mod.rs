//! Highlight Record Store and Sync API
//!
//! Persists highlight documents in libsql and exposes them over HTTP to the browser
//! extension. Every query is scoped by a `(user_id, url)` pair; there is no update
//! operation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use highlighter::highlights;
//!
//! let app = Router::new()
//!     .merge(highlights::routes())
//!     .with_state(app_state);
//!
//! let store = highlights::HighlightStore::new(db.connection());
//! let newest_first = store.list(user_id, url).await?;
//! ```

mod handler;
mod routes;
mod store;

pub use routes::routes;
pub use store::HighlightStore;

pub fn migrations() -> &'static [(&'static str, &'static str)] {
    &[(
        "highlights_001_schema.sql",
        include_str!("migrations/001_schema.sql"),
    )]
}
