use axum::{
    extract::State,
    http::{
        header::{ETAG, IF_MATCH, IF_NONE_MATCH},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthedDid,
    error::QueueError,
    queue::{
        model::{format_etag, parse_etag, parse_etag_list},
        HydratedSnapshot, QueueState, Revision,
    },
    service::ReadOutcome,
    state::AppState,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueUpdate {
    pub state: QueueState,
}

fn etag_header(revision: Revision) -> [(axum::http::HeaderName, HeaderValue); 1] {
    // digits and quotes only, always a valid header value
    let value = HeaderValue::from_str(&format_etag(revision))
        .unwrap_or_else(|_| HeaderValue::from_static("\"0\""));
    [(ETAG, value)]
}

fn snapshot_response(snapshot: HydratedSnapshot) -> Response {
    (etag_header(snapshot.revision), Json(snapshot)).into_response()
}

/// `If-None-Match` only enables a shortcut, so anything unreadable is ignored.
fn if_none_match(headers: &HeaderMap) -> Vec<Revision> {
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(parse_etag_list)
        .collect()
}

fn if_match(headers: &HeaderMap) -> Result<Option<Revision>, QueueError> {
    let Some(value) = headers.get(IF_MATCH) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(parse_etag)
        .map(Some)
        .ok_or_else(|| QueueError::BadRequest(format!("invalid If-Match header: {value:?}")))
}

pub async fn get_queue(
    State(state): State<AppState>,
    AuthedDid(did): AuthedDid,
    headers: HeaderMap,
) -> Result<Response, QueueError> {
    match state.queue.get_queue(&did, &if_none_match(&headers)).await? {
        ReadOutcome::NotModified(revision) => {
            Ok((StatusCode::NOT_MODIFIED, etag_header(revision)).into_response())
        }
        ReadOutcome::Snapshot(snapshot) => Ok(snapshot_response(snapshot)),
    }
}

pub async fn put_queue(
    State(state): State<AppState>,
    AuthedDid(did): AuthedDid,
    headers: HeaderMap,
    Json(body): Json<QueueUpdate>,
) -> Result<Response, QueueError> {
    let expected = if_match(&headers)?;
    let snapshot = state.queue.update_queue(&did, body.state, expected).await?;
    log::debug!("[queue] {did} wrote revision {}", snapshot.revision);
    Ok(snapshot_response(snapshot))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, header::CONTENT_TYPE, Method, Request},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{
        api::router,
        auth::JwtAuthenticator,
        catalog::{MemoryCatalog, MemoryPreferences},
        db::local::{init_memory_db, SqliteQueueStore},
        queue::Track,
        service::QueueService,
        state::AppState,
        sync::{cache::QueueCache, notifier::ChangeBus},
    };

    const SECRET: &str = "api-test-secret";

    async fn app() -> Router {
        let pool = init_memory_db().await.unwrap();
        let store = Arc::new(SqliteQueueStore::new(pool, ChangeBus::default()));
        let catalog = Arc::new(MemoryCatalog::with_tracks(["A", "B", "C"].map(|id| Track {
            id: 1,
            file_id: id.to_string(),
            title: format!("Song {id}"),
            artist: "Artist".to_string(),
            album: None,
            duration: None,
            image_url: None,
        })));
        let service = QueueService::new(
            store,
            catalog,
            Arc::new(MemoryPreferences::new()),
            Arc::new(QueueCache::default()),
        );
        router(AppState::new(
            Arc::new(service),
            Arc::new(JwtAuthenticator::new(SECRET)),
        ))
    }

    fn bearer(did: &str) -> String {
        let token = JwtAuthenticator::new(SECRET).issue(did, 3600).unwrap();
        format!("Bearer {token}")
    }

    fn get(did: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(Method::GET)
            .uri("/queue/")
            .header(AUTHORIZATION, bearer(did))
    }

    fn put(did: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(Method::PUT)
            .uri("/queue/")
            .header(AUTHORIZATION, bearer(did))
            .header(CONTENT_TYPE, "application/json")
    }

    fn put_body(ids: &[&str]) -> Body {
        Body::from(json!({ "state": { "track_ids": ids, "current_index": 0 } }).to_string())
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn etag(response: &Response) -> &str {
        response.headers()[ETAG].to_str().unwrap()
    }

    #[tokio::test]
    async fn missing_or_invalid_token_is_401() {
        let app = app().await;
        let res = app
            .clone()
            .oneshot(Request::builder().uri("/queue/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app
            .oneshot(
                Request::builder()
                    .uri("/queue/")
                    .header(AUTHORIZATION, "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(res).await["error"], "Unauthenticated");
    }

    #[tokio::test]
    async fn empty_queue_reads_as_revision_zero() {
        let app = app().await;
        let res = app.clone().oneshot(get("did:a").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(etag(&res), "\"0\"");
        let body = json_body(res).await;
        assert_eq!(body["revision"], 0);
        assert_eq!(body["state"]["track_ids"], json!([]));
        assert_eq!(body["state"]["auto_advance"], true);
        assert_eq!(body["tracks"], json!([]));

        let res = app
            .oneshot(get("did:a").header(IF_NONE_MATCH, "\"0\"").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn put_then_get_with_etags() {
        let app = app().await;
        let res = app
            .clone()
            .oneshot(
                put("did:a")
                    .header(IF_MATCH, "\"0\"")
                    .body(put_body(&["A", "B", "A"]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(etag(&res), "\"1\"");
        let body = json_body(res).await;
        assert_eq!(body["revision"], 1);
        assert_eq!(body["tracks"].as_array().unwrap().len(), 3);
        assert_eq!(body["state"]["current_track_id"], "A");

        let res = app
            .clone()
            .oneshot(get("did:a").header(IF_NONE_MATCH, "W/\"1\"").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(etag(&res), "\"1\"");

        // other users are isolated
        let res = app.oneshot(get("did:b").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(json_body(res).await["revision"], 0);
    }

    #[tokio::test]
    async fn stale_if_match_is_409() {
        let app = app().await;
        for expected in ["\"0\"", "\"1\""] {
            let res = app
                .clone()
                .oneshot(
                    put("did:a")
                        .header(IF_MATCH, expected)
                        .body(put_body(&["A"]))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        }

        let res = app
            .clone()
            .oneshot(
                put("did:a")
                    .header(IF_MATCH, "\"1\"")
                    .body(put_body(&["C"]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(res).await["error"], "Conflict");

        let res = app.oneshot(get("did:a").body(Body::empty()).unwrap()).await.unwrap();
        let body = json_body(res).await;
        assert_eq!(body["revision"], 2);
        assert_eq!(body["state"]["track_ids"], json!(["A"]));
    }

    #[tokio::test]
    async fn missing_if_match_writes_unconditionally() {
        let app = app().await;
        for n in 1..=2i64 {
            let res = app
                .clone()
                .oneshot(put("did:a").body(put_body(&["B"])).unwrap())
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert_eq!(json_body(res).await["revision"], n);
        }
    }

    #[tokio::test]
    async fn malformed_if_match_is_400() {
        let app = app().await;
        let res = app
            .oneshot(
                put("did:a")
                    .header(IF_MATCH, "\"abc\"")
                    .body(put_body(&["A"]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_if_none_match_is_ignored() {
        let app = app().await;
        let res = app
            .oneshot(get("did:a").header(IF_NONE_MATCH, "garbage").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn negative_current_index_is_repaired() {
        let app = app().await;
        let body = json!({
            "state": { "track_ids": ["A", "B", "C"], "current_index": -1, "current_track_id": "B" }
        });
        let res = app
            .clone()
            .oneshot(put("did:a").body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["state"]["current_index"], 1);
        assert_eq!(body["state"]["current_track_id"], "B");

        let body = json!({ "state": { "track_ids": ["A", "B"], "current_index": -1 } });
        let res = app
            .oneshot(put("did:a").body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json_body(res).await["state"]["current_index"], 0);
    }
}
