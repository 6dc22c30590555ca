//! Deadline queue for swap re-attempts

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Exponential backoff with a cap
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exp)
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Swaps waiting for a retry, ordered by deadline
pub struct RetryScheduler {
    queue: Mutex<BinaryHeap<Reverse<(Instant, Uuid)>>>,
}

impl RetryScheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
        }
    }

    pub async fn schedule(&self, swap_id: Uuid, delay: Duration) {
        self.queue
            .lock()
            .await
            .push(Reverse((Instant::now() + delay, swap_id)));
    }

    /// Pop every swap whose deadline has passed
    pub async fn due(&self) -> Vec<Uuid> {
        let now = Instant::now();
        let mut queue = self.queue.lock().await;
        let mut due = Vec::new();

        while let Some(Reverse((deadline, _))) = queue.peek() {
            if *deadline > now {
                break;
            }
            if let Some(Reverse((_, swap_id))) = queue.pop() {
                if !due.contains(&swap_id) {
                    due.push(swap_id);
                }
            }
        }

        due
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new()
    }
}
