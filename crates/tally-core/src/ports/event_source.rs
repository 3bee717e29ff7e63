//! TaskEventSource port - chain event subscriptions.
//!
//! A subscription pushes decoded logs into a channel owned by the caller and
//! reports transport failures on a separate error stream. After a failure the
//! caller drops the handle (`unsubscribe`) and subscribes again with a clone of
//! the same sender, so events keep arriving on the receiver it already polls.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::domain::{SubscriptionError, TaskCreated, TaskResponded};

#[async_trait]
pub trait TaskEventSource: Send + Sync {
    /// Subscribe to `NewTaskCreated` logs.
    async fn subscribe_new_tasks(
        &self,
        sink: mpsc::Sender<TaskCreated>,
    ) -> Result<Subscription, SubscriptionError>;

    /// Subscribe to `TaskResponded` logs.
    async fn subscribe_task_responses(
        &self,
        sink: mpsc::Sender<TaskResponded>,
    ) -> Result<Subscription, SubscriptionError>;
}

/// Consumer side of a live subscription.
///
/// Dropping it has the same effect as `unsubscribe`.
#[derive(Debug)]
pub struct Subscription {
    errors: mpsc::Receiver<SubscriptionError>,
    cancel: watch::Sender<bool>,
}

/// Producer side, held by the event source implementation.
#[derive(Debug, Clone)]
pub struct SubscriptionFeed {
    errors: mpsc::Sender<SubscriptionError>,
    cancelled: watch::Receiver<bool>,
}

impl Subscription {
    /// Create a connected (consumer, producer) pair.
    pub fn pair() -> (Subscription, SubscriptionFeed) {
        let (err_tx, err_rx) = mpsc::channel(1);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            Subscription {
                errors: err_rx,
                cancel: cancel_tx,
            },
            SubscriptionFeed {
                errors: err_tx,
                cancelled: cancel_rx,
            },
        )
    }

    /// Wait for the next transport error.
    ///
    /// A producer that goes away without reporting is treated as a closed
    /// subscription, which the caller handles like any other failure.
    pub async fn err(&mut self) -> SubscriptionError {
        self.errors.recv().await.unwrap_or(SubscriptionError::Closed)
    }

    /// Stop the producer. Idempotent.
    pub fn unsubscribe(self) {
        // receivers may already be gone
        let _ = self.cancel.send(true);
    }
}

impl SubscriptionFeed {
    /// Report a transport failure. The subscription is dead afterwards.
    pub async fn fail(&self, err: SubscriptionError) {
        let _ = self.errors.send(err).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow() || self.errors.is_closed()
    }

    /// Resolve once the consumer unsubscribed or dropped its handle.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.cancelled.borrow() {
                return;
            }
            if self.cancelled.changed().await.is_err() {
                return;
            }
        }
    }
}
