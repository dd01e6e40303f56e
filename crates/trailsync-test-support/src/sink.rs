//! Test sinks — mock `MessageSink` implementations for tests.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;

use trailsync_core::envelope::ServerEnvelope;
use trailsync_core::sink::{MessageSink, SinkError};

/// A sink that records every delivered envelope for later inspection.
#[derive(Debug, Default)]
pub struct CollectingSink {
    delivered: Arc<Mutex<Vec<ServerEnvelope>>>,
    notify: Arc<Notify>,
}

impl CollectingSink {
    /// Creates a sink and returns it with a handle to the recorded frames.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to everything delivered so far.
    #[must_use]
    pub fn delivered(&self) -> Arc<Mutex<Vec<ServerEnvelope>>> {
        Arc::clone(&self.delivered)
    }

    /// Notifier fired after each delivery, for tests that wait on output.
    #[must_use]
    pub fn notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }
}

#[async_trait]
impl MessageSink for CollectingSink {
    async fn deliver(&mut self, envelope: ServerEnvelope) -> Result<(), SinkError> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// A sink whose first delivery never completes, simulating a client that
/// stopped reading. Queued frames back up behind it until sends time out.
#[derive(Debug, Default)]
pub struct StalledSink;

#[async_trait]
impl MessageSink for StalledSink {
    async fn deliver(&mut self, _envelope: ServerEnvelope) -> Result<(), SinkError> {
        std::future::pending().await
    }
}
