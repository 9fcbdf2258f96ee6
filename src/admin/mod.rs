//! JSON control endpoints mirroring the push-channel operations.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};

use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router() -> Router<AppState> {
    Router::new()
        .route("/_viewer/status", get(get_status))
        .route("/_viewer/routes", get(get_routes).put(put_routes))
        .route("/_viewer/breakpoints", get(get_breakpoints).put(put_breakpoints))
        .route("/_viewer/ingest", post(post_ingest))
}
