//! Two priority queues with a fairness quota.

use std::collections::BinaryHeap;

use super::task::{Priority, QueuedTask};

/// High and low priority queues, polled under a deficit quota.
///
/// Up to `quota` high-priority tasks are taken in a row; then one
/// low-priority task runs and the quota resets. An endless stream of
/// high-priority work therefore cannot starve the low queue.
#[derive(Debug)]
pub(crate) struct TaskQueues {
    high: BinaryHeap<QueuedTask>,
    low: BinaryHeap<QueuedTask>,
    quota: u32,
    quota_reset: u32,
    next_seq: u64,
}

impl TaskQueues {
    pub fn new(quota: u32) -> Self {
        Self {
            high: BinaryHeap::new(),
            low: BinaryHeap::new(),
            quota,
            quota_reset: quota,
            next_seq: 0,
        }
    }

    /// Next submission number.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn push(&mut self, task: QueuedTask, priority: Priority) {
        match priority {
            Priority::High => self.high.push(task),
            Priority::Low => self.low.push(task),
        }
    }

    /// Takes the next live task. Cancelled tasks are dropped on the way.
    pub fn poll(&mut self) -> Option<(QueuedTask, Priority)> {
        if self.quota == 0 {
            if let Some(task) = pop_live(&mut self.low) {
                self.quota = self.quota_reset;
                return Some((task, Priority::Low));
            }
        }
        if let Some(task) = pop_live(&mut self.high) {
            self.quota = self.quota.saturating_sub(1);
            return Some((task, Priority::High));
        }
        self.quota = self.quota_reset;
        pop_live(&mut self.low).map(|task| (task, Priority::Low))
    }

    /// Live tasks waiting in one queue.
    pub fn pending(&self, priority: Priority) -> usize {
        let heap = match priority {
            Priority::High => &self.high,
            Priority::Low => &self.low,
        };
        heap.iter().filter(|t| !t.cancel.is_cancelled()).count()
    }

    /// Cancels every waiting task; returns how many were live.
    pub fn cancel_all(&mut self) -> usize {
        let live = self.pending(Priority::High) + self.pending(Priority::Low);
        for task in self.high.drain().chain(self.low.drain()) {
            task.cancel.cancel();
        }
        live
    }
}

fn pop_live(heap: &mut BinaryHeap<QueuedTask>) -> Option<QueuedTask> {
    while let Some(task) = heap.pop() {
        if !task.cancel.is_cancelled() {
            return Some(task);
        }
    }
    None
}
