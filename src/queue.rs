use std::collections::VecDeque;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Payload of one queued verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyTask {
    pub lead_id: i64,
    pub workspace_id: i64,
    pub job_id: Uuid,
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("malformed task payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// FIFO-ish task queue with at-least-once delivery. Producers enqueue right
/// after creating the job row; one background worker at a time consumes.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: &VerifyTask) -> Result<(), QueueError>;
    /// Blocks for a bounded time; `None` means "nothing arrived, poll again".
    async fn dequeue(&self) -> Result<Option<VerifyTask>, QueueError>;
}

const QUEUE_KEY: &str = "verify:tasks";
const POP_TIMEOUT_SECS: f64 = 5.0;

/// Redis list queue shared by all workers.
#[derive(Clone)]
pub struct RedisTaskQueue {
    conn: redis::aio::ConnectionManager,
}

impl RedisTaskQueue {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task: &VerifyTask) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(task)?;
        let _: () = conn.lpush(QUEUE_KEY, payload).await?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<VerifyTask>, QueueError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn.brpop(QUEUE_KEY, POP_TIMEOUT_SECS).await?;
        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

/// Single-process queue for tests and local development.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    tasks: tokio::sync::Mutex<VecDeque<VerifyTask>>,
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: &VerifyTask) -> Result<(), QueueError> {
        self.tasks.lock().await.push_back(task.clone());
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<VerifyTask>, QueueError> {
        Ok(self.tasks.lock().await.pop_front())
    }
}
