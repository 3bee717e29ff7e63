//! TaskRegistry - authoritative in-memory record of tasks and responses.
//!
//! Design:
//! - Two independent locks: `tasks` and `responses`. A writer on one never
//!   blocks readers of the other.
//! - Critical sections are map insert/lookup only; nothing awaits while a
//!   guard is held except the lock acquisition itself.
//! - Every lookup may miss (task pruned, or a stale result racing
//!   finalization). Callers treat `None` as "skip", never as a bug.
//! - No eviction on its own: `remove_task`, `prune_created_before` and
//!   `prune_registered_before` are the retention hooks. The embedder decides
//!   when to call them; tasks left unresolved (expired under `Skip`, failed
//!   submission) stay until then.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{BlockNumber, RegistryError, ResponseDigest, Task, TaskIndex, TaskResponse};
use crate::ports::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct TaskEntry {
    task: Task,
    registered_at: DateTime<Utc>,
}

pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskIndex, TaskEntry>>,
    /// task index -> digest -> response
    responses: RwLock<HashMap<TaskIndex, HashMap<ResponseDigest, TaskResponse>>>,
    clock: Arc<dyn Clock>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            responses: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Insert a task. An existing entry is never overwritten.
    pub async fn register_task(&self, task: Task) -> Result<(), RegistryError> {
        let now = self.clock.now();
        let mut tasks = self.tasks.write().await;
        match tasks.entry(task.index) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateTask(task.index)),
            Entry::Vacant(slot) => {
                slot.insert(TaskEntry {
                    task,
                    registered_at: now,
                });
                Ok(())
            }
        }
    }

    pub async fn get_task(&self, index: TaskIndex) -> Option<Task> {
        let tasks = self.tasks.read().await;
        tasks.get(&index).map(|entry| entry.task.clone())
    }

    pub async fn contains_task(&self, index: TaskIndex) -> bool {
        self.tasks.read().await.contains_key(&index)
    }

    pub async fn registered_at(&self, index: TaskIndex) -> Option<DateTime<Utc>> {
        let tasks = self.tasks.read().await;
        tasks.get(&index).map(|entry| entry.registered_at)
    }

    /// Record a response under `(index, digest)`.
    ///
    /// The digest is a content hash, so a second response under the same key
    /// carries the same content; the first one is kept. Returns whether this
    /// call inserted.
    pub async fn record_response(
        &self,
        index: TaskIndex,
        digest: ResponseDigest,
        response: TaskResponse,
    ) -> bool {
        let mut responses = self.responses.write().await;
        match responses.entry(index).or_default().entry(digest) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(response);
                true
            }
        }
    }

    pub async fn get_response(
        &self,
        index: TaskIndex,
        digest: &ResponseDigest,
    ) -> Option<TaskResponse> {
        let responses = self.responses.read().await;
        responses
            .get(&index)
            .and_then(|by_digest| by_digest.get(digest))
            .cloned()
    }

    /// Drop a task and every response recorded for it.
    pub async fn remove_task(&self, index: TaskIndex) -> Option<Task> {
        let removed = self.tasks.write().await.remove(&index);
        self.responses.write().await.remove(&index);
        removed.map(|entry| entry.task)
    }

    /// Remove every task created before `block`. Returns the pruned indices,
    /// sorted.
    pub async fn prune_created_before(&self, block: BlockNumber) -> Vec<TaskIndex> {
        let pruned = self
            .prune_where(|entry| entry.task.created_at_block < block)
            .await;
        if !pruned.is_empty() {
            tracing::debug!(count = pruned.len(), before = %block, "pruned stale tasks");
        }
        pruned
    }

    /// Remove every task registered before `cutoff`, by this registry's clock.
    ///
    /// For callers that do not follow block height.
    pub async fn prune_registered_before(&self, cutoff: DateTime<Utc>) -> Vec<TaskIndex> {
        let pruned = self.prune_where(|entry| entry.registered_at < cutoff).await;
        if !pruned.is_empty() {
            tracing::debug!(count = pruned.len(), before = %cutoff, "pruned expired tasks");
        }
        pruned
    }

    /// Remove every task registered more than `age` ago.
    pub async fn prune_older_than(&self, age: Duration) -> Vec<TaskIndex> {
        let Some(cutoff) = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| self.clock.now().checked_sub_signed(age))
        else {
            // 範囲外の age では何も古くない
            return Vec::new();
        };
        self.prune_registered_before(cutoff).await
    }

    async fn prune_where<F>(&self, stale: F) -> Vec<TaskIndex>
    where
        F: Fn(&TaskEntry) -> bool,
    {
        let mut pruned: Vec<TaskIndex> = {
            let mut tasks = self.tasks.write().await;
            let doomed: Vec<TaskIndex> = tasks
                .values()
                .filter(|entry| stale(entry))
                .map(|entry| entry.task.index)
                .collect();
            for index in &doomed {
                tasks.remove(index);
            }
            doomed
        };

        if !pruned.is_empty() {
            let mut responses = self.responses.write().await;
            for index in &pruned {
                responses.remove(index);
            }
        }
        pruned.sort();
        pruned
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn response_count(&self, index: TaskIndex) -> usize {
        let responses = self.responses.read().await;
        responses.get(&index).map_or(0, HashMap::len)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QuorumNum, TaskPayload, ThresholdPercentage};
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn task(index: u32, block: u32, payload: serde_json::Value) -> Task {
        Task::uniform_thresholds(
            TaskIndex::new(index),
            TaskPayload::new(payload),
            vec![QuorumNum(0)],
            ThresholdPercentage(66),
            BlockNumber::new(block),
        )
    }

    fn response(index: u32, value: i64) -> (ResponseDigest, TaskResponse) {
        let resp = TaskResponse::new(TaskIndex::new(index), serde_json::json!({ "value": value }));
        (resp.digest(), resp)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_keep_one_entry_per_index() {
        let registry = Arc::new(TaskRegistry::new());

        let mut joins = Vec::new();
        for i in 0..64u32 {
            let registry = Arc::clone(&registry);
            joins.push(tokio::spawn(async move {
                registry
                    .register_task(task(i, 100 + i, serde_json::json!({ "n": i })))
                    .await
            }));
        }
        for join in joins {
            join.await.unwrap().unwrap();
        }

        assert_eq!(registry.task_count().await, 64);
        for i in 0..64u32 {
            let stored = registry.get_task(TaskIndex::new(i)).await.unwrap();
            assert_eq!(stored.payload.as_json(), &serde_json::json!({ "n": i }));
        }
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_original_payload() {
        let registry = TaskRegistry::new();
        registry
            .register_task(task(7, 10, serde_json::json!("original")))
            .await
            .unwrap();

        let err = registry
            .register_task(task(7, 11, serde_json::json!("impostor")))
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTask(TaskIndex::new(7)));

        let stored = registry.get_task(TaskIndex::new(7)).await.unwrap();
        assert_eq!(stored.payload.as_json(), &serde_json::json!("original"));
        assert_eq!(stored.created_at_block, BlockNumber::new(10));
    }

    #[tokio::test]
    async fn lookups_on_missing_keys_return_none() {
        let registry = TaskRegistry::new();
        let (digest, _) = response(1, 1);
        assert!(registry.get_task(TaskIndex::new(1)).await.is_none());
        assert!(registry.get_response(TaskIndex::new(1), &digest).await.is_none());
        assert_eq!(registry.response_count(TaskIndex::new(1)).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writers_on_different_digests_both_land() {
        let registry = Arc::new(TaskRegistry::new());
        let (d1, r1) = response(3, 10);
        let (d2, r2) = response(3, 11);
        assert_ne!(d1, d2);

        let a = {
            let registry = Arc::clone(&registry);
            let r1 = r1.clone();
            tokio::spawn(async move { registry.record_response(TaskIndex::new(3), d1, r1).await })
        };
        let b = {
            let registry = Arc::clone(&registry);
            let r2 = r2.clone();
            tokio::spawn(async move { registry.record_response(TaskIndex::new(3), d2, r2).await })
        };
        assert!(a.await.unwrap());
        assert!(b.await.unwrap());

        assert_eq!(registry.get_response(TaskIndex::new(3), &d1).await, Some(r1));
        assert_eq!(registry.get_response(TaskIndex::new(3), &d2).await, Some(r2));
        assert_eq!(registry.response_count(TaskIndex::new(3)).await, 2);
    }

    #[tokio::test]
    async fn repeated_response_is_not_reinserted() {
        let registry = TaskRegistry::new();
        let (digest, resp) = response(2, 5);
        assert!(registry.record_response(TaskIndex::new(2), digest, resp.clone()).await);
        assert!(!registry.record_response(TaskIndex::new(2), digest, resp).await);
        assert_eq!(registry.response_count(TaskIndex::new(2)).await, 1);
    }

    #[tokio::test]
    async fn registration_is_timestamped_by_clock() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let registry = TaskRegistry::with_clock(Arc::new(FixedClock::new(t0)));
        registry
            .register_task(task(1, 1, serde_json::json!(null)))
            .await
            .unwrap();
        assert_eq!(registry.registered_at(TaskIndex::new(1)).await, Some(t0));
    }

    #[tokio::test]
    async fn prune_removes_old_tasks_and_their_responses() {
        let registry = TaskRegistry::new();
        for (i, block) in [(1, 100), (2, 150), (3, 200)] {
            registry
                .register_task(task(i, block, serde_json::json!(i)))
                .await
                .unwrap();
            let (digest, resp) = response(i, i as i64);
            registry.record_response(TaskIndex::new(i), digest, resp).await;
        }

        let pruned = registry.prune_created_before(BlockNumber::new(200)).await;
        assert_eq!(pruned, vec![TaskIndex::new(1), TaskIndex::new(2)]);
        assert_eq!(registry.task_count().await, 1);
        assert_eq!(registry.response_count(TaskIndex::new(1)).await, 0);
        assert_eq!(registry.response_count(TaskIndex::new(3)).await, 1);
    }

    #[tokio::test]
    async fn prune_by_registration_time_uses_the_clock() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(t0);
        let registry = TaskRegistry::with_clock(Arc::new(clock.clone()));
        registry
            .register_task(task(1, 1, serde_json::json!(1)))
            .await
            .unwrap();
        clock.set(t0 + chrono::Duration::minutes(30));
        registry
            .register_task(task(2, 2, serde_json::json!(2)))
            .await
            .unwrap();

        let pruned = registry
            .prune_registered_before(t0 + chrono::Duration::minutes(10))
            .await;
        assert_eq!(pruned, vec![TaskIndex::new(1)]);
        assert!(registry.contains_task(TaskIndex::new(2)).await);

        // 2 はちょうど 20 分前に登録された
        clock.set(t0 + chrono::Duration::minutes(50));
        assert!(registry.prune_older_than(Duration::from_secs(21 * 60)).await.is_empty());
        assert_eq!(
            registry.prune_older_than(Duration::from_secs(19 * 60)).await,
            vec![TaskIndex::new(2)]
        );
        assert!(registry.prune_older_than(Duration::MAX).await.is_empty());
    }

    #[tokio::test]
    async fn remove_task_drops_responses() {
        let registry = TaskRegistry::new();
        registry
            .register_task(task(4, 1, serde_json::json!(4)))
            .await
            .unwrap();
        let (digest, resp) = response(4, 4);
        registry.record_response(TaskIndex::new(4), digest, resp).await;

        assert!(registry.remove_task(TaskIndex::new(4)).await.is_some());
        assert!(!registry.contains_task(TaskIndex::new(4)).await);
        assert!(registry.get_response(TaskIndex::new(4), &digest).await.is_none());
    }
}
