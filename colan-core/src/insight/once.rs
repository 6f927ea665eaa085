//! At-most-once completion delivery.
//!
//! A terminal job update can arrive twice: once from the collaborator's
//! push notification and once from the fast-completion probe that polls
//! shortly after submission. Handlers are wrapped so only the first
//! delivery runs; later deliveries are dropped.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ports::compute::{JobCompletionHandler, JobUpdate, SharedCompletionHandler};

pub struct OnceHook {
    inner: SharedCompletionHandler,
    fired: Mutex<bool>,
}

impl std::fmt::Debug for OnceHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnceHook").finish_non_exhaustive()
    }
}

impl OnceHook {
    pub fn wrap(inner: SharedCompletionHandler) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fired: Mutex::new(false),
        })
    }
}

#[async_trait]
impl JobCompletionHandler for OnceHook {
    async fn on_update(&self, update: JobUpdate) {
        {
            let mut fired = self.fired.lock().await;
            if *fired {
                debug!(job_id = %update.job_id, "duplicate completion delivery dropped");
                return;
            }
            *fired = true;
        }
        self.inner.on_update(update).await;
    }
}
