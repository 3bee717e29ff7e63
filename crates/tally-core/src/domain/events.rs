//! Chain events consumed by the aggregator.

use serde::{Deserialize, Serialize};

use super::ids::TaskIndex;
use super::response::ResponseDigest;
use super::task::Task;

/// `NewTaskCreated` log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_index: TaskIndex,
    pub task: Task,
}

impl TaskCreated {
    pub fn new(task: Task) -> Self {
        Self {
            task_index: task.index,
            task,
        }
    }
}

/// `TaskResponded` log, emitted once a response was accepted on chain.
///
/// Informational only: the aggregator logs and counts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponded {
    pub task_index: TaskIndex,
    pub digest: ResponseDigest,
}
