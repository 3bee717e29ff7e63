//! InMemoryEventSource - scriptable stand-in for the chain log subscription.
//!
//! # 実装詳細
//! - each stream keeps its live subscribers and a backlog
//! - `publish_*` fans an event out to every live subscriber
//! - with no live subscriber the event goes to the backlog and is handed to
//!   the next subscriber, like a node replaying logs from the last delivered
//!   block
//! - `inject_failure` kills the live subscriptions of one stream;
//!   `fail_next_subscribe` makes the next subscribe calls error out

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::{SubscriptionError, TaskCreated, TaskResponded};
use crate::ports::{Subscription, SubscriptionFeed, TaskEventSource};

/// Which log subscription to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStream {
    NewTasks,
    TaskResponses,
}

struct Producer<T> {
    sink: mpsc::Sender<T>,
    feed: SubscriptionFeed,
}

struct StreamState<T> {
    live: Vec<Producer<T>>,
    backlog: VecDeque<T>,
}

impl<T> Default for StreamState<T> {
    fn default() -> Self {
        Self {
            live: Vec::new(),
            backlog: VecDeque::new(),
        }
    }
}

impl<T: Clone> StreamState<T> {
    fn prune(&mut self) {
        self.live
            .retain(|p| !p.feed.is_cancelled() && !p.sink.is_closed());
    }

    /// Live sinks, or `None` after parking the event in the backlog.
    fn route(&mut self, event: &T) -> Option<Vec<mpsc::Sender<T>>> {
        self.prune();
        if self.live.is_empty() {
            self.backlog.push_back(event.clone());
            return None;
        }
        Some(self.live.iter().map(|p| p.sink.clone()).collect())
    }

    fn attach(&mut self, sink: mpsc::Sender<T>, feed: SubscriptionFeed) {
        while let Some(event) = self.backlog.pop_front() {
            if let Err(err) = sink.try_send(event) {
                // 入りきらない分は次回に回す
                let event = match err {
                    mpsc::error::TrySendError::Full(event) => event,
                    mpsc::error::TrySendError::Closed(event) => event,
                };
                self.backlog.push_front(event);
                break;
            }
        }
        self.live.push(Producer { sink, feed });
    }

    fn detach_all(&mut self) -> Vec<SubscriptionFeed> {
        self.live.drain(..).map(|p| p.feed).collect()
    }

    fn live_count(&mut self) -> usize {
        self.prune();
        self.live.len()
    }
}

#[derive(Default)]
pub struct InMemoryEventSource {
    new_tasks: Mutex<StreamState<TaskCreated>>,
    task_responses: Mutex<StreamState<TaskResponded>>,
    refuse_subscribes: AtomicU32,
    subscribe_calls: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish_task_created(&self, event: TaskCreated) {
        let sinks = lock(&self.new_tasks).route(&event);
        fan_out(sinks, event).await;
    }

    pub async fn publish_task_responded(&self, event: TaskResponded) {
        let sinks = lock(&self.task_responses).route(&event);
        fan_out(sinks, event).await;
    }

    /// Report a transport error on every live subscription of `stream`.
    pub async fn inject_failure(&self, stream: EventStream, err: SubscriptionError) {
        let feeds = match stream {
            EventStream::NewTasks => lock(&self.new_tasks).detach_all(),
            EventStream::TaskResponses => lock(&self.task_responses).detach_all(),
        };
        for feed in feeds {
            feed.fail(err.clone()).await;
        }
    }

    /// Refuse the next `n` subscribe calls, on either stream.
    pub fn fail_next_subscribe(&self, n: u32) {
        self.refuse_subscribes.store(n, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self, stream: EventStream) -> usize {
        match stream {
            EventStream::NewTasks => lock(&self.new_tasks).live_count(),
            EventStream::TaskResponses => lock(&self.task_responses).live_count(),
        }
    }

    /// Total subscribe calls, refused ones included.
    pub fn subscribe_calls(&self) -> u32 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn admit(&self) -> Result<(), SubscriptionError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(SubscriptionError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

async fn fan_out<T: Clone>(sinks: Option<Vec<mpsc::Sender<T>>>, event: T) {
    for sink in sinks.into_iter().flatten() {
        // a closed sink belongs to a dead subscription; pruned on next publish
        let _ = sink.send(event.clone()).await;
    }
}

#[async_trait]
impl TaskEventSource for InMemoryEventSource {
    async fn subscribe_new_tasks(
        &self,
        sink: mpsc::Sender<TaskCreated>,
    ) -> Result<Subscription, SubscriptionError> {
        self.admit()?;
        let (subscription, feed) = Subscription::pair();
        lock(&self.new_tasks).attach(sink, feed);
        Ok(subscription)
    }

    async fn subscribe_task_responses(
        &self,
        sink: mpsc::Sender<TaskResponded>,
    ) -> Result<Subscription, SubscriptionError> {
        self.admit()?;
        let (subscription, feed) = Subscription::pair();
        lock(&self.task_responses).attach(sink, feed);
        Ok(subscription)
    }
}
