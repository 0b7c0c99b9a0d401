//! Compile tasks and cancellation.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tessera_core::SectionPos;

use crate::sorter::TransparencySortState;

/// Cooperative cancellation flag shared between the mailbox and a worker.
///
/// Workers check it at fixed points; nothing is interrupted mid-step.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Priority class of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Likely visible soon.
    High,
    /// Background work.
    Low,
}

/// Identifier of a scheduled task.
pub type TaskId = u64;

/// What a task does.
#[derive(Debug, Clone)]
pub(crate) enum TaskKind {
    /// Full section compile.
    Compile,
    /// Translucent index rebuild for a new camera position.
    Resort {
        sort_state: Arc<TransparencySortState>,
        camera: [f32; 3],
    },
}

impl TaskKind {
    pub(crate) const fn is_compile(&self) -> bool {
        matches!(self, Self::Compile)
    }
}

/// A task waiting in a priority queue.
#[derive(Debug)]
pub(crate) struct QueuedTask {
    pub id: TaskId,
    pub section: SectionPos,
    pub kind: TaskKind,
    /// Distance to the viewer; smaller runs first.
    pub distance: f64,
    /// Submission order, breaks distance ties.
    pub seq: u64,
    pub cancel: CancelToken,
}

// BinaryHeap is a max-heap: the nearest, oldest task must compare greatest.
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedTask {}

/// How a started task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    /// Uploaded, or found nothing to upload.
    Completed,
    /// Cancelled, superseded, or its target went away.
    Cancelled,
    /// The upload failed on the device.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn task(id: TaskId, distance: f64, seq: u64) -> QueuedTask {
        QueuedTask {
            id,
            section: SectionPos::default(),
            kind: TaskKind::Compile,
            distance,
            seq,
            cancel: CancelToken::new(),
        }
    }

    #[test]
    fn test_nearest_then_oldest_first() {
        let mut heap = BinaryHeap::new();
        heap.push(task(1, 50.0, 0));
        heap.push(task(2, 10.0, 1));
        heap.push(task(3, 10.0, 2));
        heap.push(task(4, 99.0, 3));

        let order: Vec<_> = std::iter::from_fn(|| heap.pop().map(|t| t.id)).collect();
        assert_eq!(order, vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let worker = token.clone();
        assert!(!worker.is_cancelled());
        token.cancel();
        assert!(worker.is_cancelled());
    }
}
