use std::sync::Arc;

use crate::{auth::Authenticator, service::QueueService};

/// Shared across all request handlers. Built once in [`crate::serve`].
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<QueueService>,
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(queue: Arc<QueueService>, auth: Arc<dyn Authenticator>) -> Self {
        Self { queue, auth }
    }
}
