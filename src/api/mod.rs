//! HTTP surface.

use axum::{routing::get, Router};

use crate::state::AppState;

pub mod queue;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/queue/", get(queue::get_queue).put(queue::put_queue))
        .with_state(state)
}
