//! Priority job queue feeding the healer and reaper.
//!
//! The health scanner and the distribution path are producers; the
//! healer and reaper are the two consumers. Jobs carry their own retry
//! state so a consumer can requeue with backoff instead of losing the
//! work item on a transient failure.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

/// What the job asks a consumer to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// A chunk has fewer healthy holders than its target; bring it back
    /// up to target by assigning and distributing to new devices.
    HealChunk {
        chunk_id: Uuid,
        current_replicas: i32,
        target_replicas: i32,
    },
    /// A chunk has more healthy holders than target + safety margin;
    /// instruct the least reliable holders to delete their copy.
    TrimExcess { chunk_id: Uuid },
    /// A file (and its chunks) should be removed from every device that
    /// holds a copy. `user_initiated` distinguishes an explicit delete
    /// request (priority 1) from a cleanup triggered by some other
    /// process, e.g. a failed upload (priority 2).
    DeleteFile {
        file_id: Uuid,
        reason: String,
        user_initiated: bool,
    },
}

impl JobKind {
    /// Priority 1 is most urgent (processed first): a chunk at zero
    /// replicas outranks everything else in the queue. A chunk below
    /// half its target is still urgent but not critical; anything else
    /// short of target trails behind both.
    pub fn priority(&self) -> u8 {
        match self {
            JobKind::HealChunk { current_replicas, .. } if *current_replicas <= 0 => 1,
            JobKind::HealChunk { current_replicas, target_replicas } if *current_replicas < *target_replicas / 2 => 2,
            JobKind::HealChunk { .. } => 3,
            JobKind::DeleteFile { user_initiated: true, .. } => 1,
            JobKind::DeleteFile { user_initiated: false, .. } => 2,
            JobKind::TrimExcess { .. } => 3,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        5
    }

    /// Base delay before the first retry; doubles per attempt after
    /// that, capped at ten minutes.
    fn backoff_base(&self) -> Duration {
        match self {
            JobKind::HealChunk { current_replicas, .. } if *current_replicas <= 0 => {
                Duration::from_secs(2)
            }
            JobKind::HealChunk { .. } => Duration::from_secs(5),
            JobKind::DeleteFile { .. } => Duration::from_secs(5),
            JobKind::TrimExcess { .. } => Duration::from_secs(5),
        }
    }
}

/// One unit of work plus its retry bookkeeping.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub attempt: u32,
    ready_at: Instant,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            attempt: 0,
            ready_at: Instant::now(),
        }
    }

    fn priority(&self) -> u8 {
        self.kind.priority()
    }

    /// Backoff delay for the *next* attempt, doubling from the kind's
    /// base delay, capped at 10 minutes.
    fn next_backoff(&self) -> Duration {
        let base = self.kind.backoff_base();
        let factor = 1u32 << self.attempt.min(8);
        (base * factor).min(Duration::from_secs(600))
    }

    /// True once `max_attempts` has been exhausted — the caller should
    /// give up and surface the failure instead of requeueing.
    pub fn exhausted(&self) -> bool {
        self.attempt >= self.kind.max_attempts()
    }
}

/// Heap entries order by priority first (lower number first), then by
/// `ready_at` (earlier first) so jobs delayed by backoff don't starve
/// jobs that just arrived at the same priority.
struct HeapEntry(Job);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority() == other.0.priority() && self.0.ready_at == other.0.ready_at
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse priority so 1 sorts highest,
        // and reverse ready_at so the earlier deadline sorts highest.
        other
            .0
            .priority()
            .cmp(&self.0.priority())
            .then_with(|| other.0.ready_at.cmp(&self.0.ready_at))
    }
}

/// In-process priority queue for coordinator background jobs. Not
/// durable — jobs lost on process restart are recreated by the next
/// health scan, so this is an acceptable simplification for a
/// single-coordinator deployment.
pub struct InMemoryJobQueue {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    notify: Notify,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, job: Job) {
        self.heap.lock().await.push(HeapEntry(job));
        self.notify.notify_one();
    }

    pub async fn push_kind(&self, kind: JobKind) {
        self.push(Job::new(kind)).await;
    }

    /// Increment the attempt counter and reinsert with the kind's
    /// backoff delay applied to `ready_at`.
    pub async fn requeue(&self, mut job: Job) {
        let delay = job.next_backoff();
        job.attempt += 1;
        job.ready_at = Instant::now() + delay;
        self.heap.lock().await.push(HeapEntry(job));
        self.notify.notify_one();
    }

    /// Block until the highest-priority ready job is available, waiting
    /// out any backoff delay on the head of the heap.
    pub async fn pop(&self) -> Job {
        loop {
            let wait = {
                let mut heap = self.heap.lock().await;
                match heap.peek() {
                    Some(top) if top.0.ready_at <= Instant::now() => {
                        return heap.pop().unwrap().0;
                    }
                    Some(top) => Some(top.0.ready_at),
                    None => None,
                }
            };
            match wait {
                Some(ready_at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(ready_at) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heal_chunk_at_zero_replicas_is_priority_one() {
        let kind = JobKind::HealChunk {
            chunk_id: Uuid::new_v4(),
            current_replicas: 0,
            target_replicas: 3,
        };
        assert_eq!(kind.priority(), 1);
    }

    #[test]
    fn test_heal_chunk_below_half_target_is_priority_two() {
        let kind = JobKind::HealChunk {
            chunk_id: Uuid::new_v4(),
            current_replicas: 1,
            target_replicas: 3,
        };
        assert_eq!(kind.priority(), 2);
    }

    #[test]
    fn test_heal_chunk_near_target_is_priority_three() {
        let kind = JobKind::HealChunk {
            chunk_id: Uuid::new_v4(),
            current_replicas: 2,
            target_replicas: 3,
        };
        assert_eq!(kind.priority(), 3);
    }

    #[test]
    fn test_trim_excess_is_lowest_priority() {
        let kind = JobKind::TrimExcess { chunk_id: Uuid::new_v4() };
        assert_eq!(kind.priority(), 3);
    }

    #[test]
    fn test_job_exhausted_after_five_attempts() {
        let mut job = Job::new(JobKind::TrimExcess { chunk_id: Uuid::new_v4() });
        job.attempt = 5;
        assert!(job.exhausted());
        job.attempt = 4;
        assert!(!job.exhausted());
    }

    #[tokio::test]
    async fn test_pop_returns_highest_priority_first() {
        let queue = InMemoryJobQueue::new();
        queue
            .push_kind(JobKind::TrimExcess { chunk_id: Uuid::new_v4() })
            .await;
        queue
            .push_kind(JobKind::HealChunk {
                chunk_id: Uuid::new_v4(),
                current_replicas: 0,
                target_replicas: 3,
            })
            .await;

        let first = queue.pop().await;
        assert!(matches!(first.kind, JobKind::HealChunk { .. }));
        let second = queue.pop().await;
        assert!(matches!(second.kind, JobKind::TrimExcess { .. }));
    }

    #[tokio::test]
    async fn test_requeue_delays_before_redelivery() {
        let queue = InMemoryJobQueue::new();
        let job = Job::new(JobKind::HealChunk {
            chunk_id: Uuid::new_v4(),
            current_replicas: 1,
            target_replicas: 3,
        });
        queue.requeue(job).await;

        let popped = tokio::time::timeout(Duration::from_millis(50), queue.pop()).await;
        assert!(popped.is_err(), "job should not be ready before its backoff elapses");
    }
}
