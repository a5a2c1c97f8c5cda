//! How a controller talks to the queue service.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    header::{IF_MATCH, IF_NONE_MATCH},
    StatusCode,
};
use serde_json::json;

use crate::{
    error::QueueError,
    queue::{model::format_etag, HydratedSnapshot, QueueState, Revision},
    service::{QueueService, ReadOutcome},
};

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    NotModified,
    Snapshot(HydratedSnapshot),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Applied(HydratedSnapshot),
    /// The server holds a newer revision than the one sent.
    Conflict,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not authenticated")]
    Unauthenticated,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("service error: {0}")]
    Service(String),
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// `GET` the queue. `if_none_match` lets the server answer `NotModified`.
    async fn fetch(&self, if_none_match: Option<Revision>) -> Result<FetchOutcome, TransportError>;

    /// `PUT` the queue, conditional on `if_match` when present.
    async fn push(
        &self,
        state: &QueueState,
        if_match: Option<Revision>,
    ) -> Result<PushOutcome, TransportError>;
}

// ── HTTP ─────────────────────────────────────────────────────────────────────

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            url: format!("{}/queue/", base_url.trim_end_matches('/')),
            token: token.into(),
        })
    }
}

#[async_trait]
impl QueueTransport for HttpTransport {
    async fn fetch(&self, if_none_match: Option<Revision>) -> Result<FetchOutcome, TransportError> {
        let mut req = self.client.get(&self.url).bearer_auth(&self.token);
        if let Some(rev) = if_none_match {
            req = req.header(IF_NONE_MATCH, format_etag(rev));
        }
        let resp = req.send().await?;

        match resp.status() {
            StatusCode::NOT_MODIFIED => Ok(FetchOutcome::NotModified),
            StatusCode::UNAUTHORIZED => Err(TransportError::Unauthenticated),
            s if s.is_success() => Ok(FetchOutcome::Snapshot(resp.json().await?)),
            s => Err(TransportError::Status(s.as_u16())),
        }
    }

    async fn push(
        &self,
        state: &QueueState,
        if_match: Option<Revision>,
    ) -> Result<PushOutcome, TransportError> {
        let mut req = self
            .client
            .put(&self.url)
            .bearer_auth(&self.token)
            .json(&json!({ "state": state }));
        if let Some(rev) = if_match {
            req = req.header(IF_MATCH, format_etag(rev));
        }
        let resp = req.send().await?;

        match resp.status() {
            StatusCode::CONFLICT => Ok(PushOutcome::Conflict),
            StatusCode::UNAUTHORIZED => Err(TransportError::Unauthenticated),
            s if s.is_success() => Ok(PushOutcome::Applied(resp.json().await?)),
            s => Err(TransportError::Status(s.as_u16())),
        }
    }
}

// ── In-process ───────────────────────────────────────────────────────────────

/// Calls a [`QueueService`] directly as an already-authenticated `did`.
pub struct ServiceTransport {
    service: Arc<QueueService>,
    did: String,
}

impl ServiceTransport {
    pub fn new(service: Arc<QueueService>, did: impl Into<String>) -> Self {
        Self {
            service,
            did: did.into(),
        }
    }
}

#[async_trait]
impl QueueTransport for ServiceTransport {
    async fn fetch(&self, if_none_match: Option<Revision>) -> Result<FetchOutcome, TransportError> {
        let known: Vec<Revision> = if_none_match.into_iter().collect();
        match self.service.get_queue(&self.did, &known).await {
            Ok(ReadOutcome::NotModified(_)) => Ok(FetchOutcome::NotModified),
            Ok(ReadOutcome::Snapshot(snapshot)) => Ok(FetchOutcome::Snapshot(snapshot)),
            Err(e) => Err(TransportError::Service(e.to_string())),
        }
    }

    async fn push(
        &self,
        state: &QueueState,
        if_match: Option<Revision>,
    ) -> Result<PushOutcome, TransportError> {
        match self.service.update_queue(&self.did, state.clone(), if_match).await {
            Ok(snapshot) => Ok(PushOutcome::Applied(snapshot)),
            Err(QueueError::Conflict) => Ok(PushOutcome::Conflict),
            Err(QueueError::Unauthenticated) => Err(TransportError::Unauthenticated),
            Err(e) => Err(TransportError::Service(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_transport_targets_queue_route() {
        let transport = HttpTransport::new("http://localhost:8080/", "t").unwrap();
        assert_eq!(transport.url, "http://localhost:8080/queue/");

        let transport = HttpTransport::new("http://localhost:8080", "t").unwrap();
        assert_eq!(transport.url, "http://localhost:8080/queue/");
    }
}
