use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::db::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue state conflict: state has been modified by another client, fetch the latest state and retry")]
    Conflict,

    #[error("authentication required")]
    Unauthenticated,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Store(#[from] StoreError),
}

impl QueueError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            QueueError::Conflict => (StatusCode::CONFLICT, "Conflict"),
            QueueError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthenticated"),
            QueueError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BadRequest"),
            QueueError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "StoreError"),
        }
    }
}

impl IntoResponse for QueueError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status();
        if status.is_server_error() {
            log::error!("[queue] request failed: {self}");
        }
        let body = Json(json!({ "error": kind, "detail": self.to_string() }));
        (status, body).into_response()
    }
}
