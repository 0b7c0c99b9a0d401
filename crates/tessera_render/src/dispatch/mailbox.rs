//! The dispatcher's single-threaded actor.
//!
//! Every queue mutation, every arena pool lease and every completion is
//! handled here, one message at a time. Nothing in this file is shared.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tessera_core::{ArenaPool, SectionPos};

use super::queue::TaskQueues;
use super::task::{CancelToken, Priority, QueuedTask, TaskId, TaskKind, TaskOutcome};
use super::worker::WorkerContext;
use super::DispatcherStats;
use crate::compiler::SectionArenas;
use crate::gpu::GpuBackend;
use crate::world::WorldQuery;

/// Requests handled by the mailbox thread.
pub(crate) enum Message {
    Schedule {
        section: SectionPos,
        kind: TaskKind,
        priority: Priority,
        distance: f64,
    },
    Cancel(SectionPos),
    SetCamera([f32; 3]),
    Finished {
        id: TaskId,
        arenas: SectionArenas,
        outcome: TaskOutcome,
    },
    /// Cancel queued work, let running work finish, then stop.
    Shutdown,
    /// Stop now; the dispatcher handle is gone.
    Abandon,
}

impl Message {
    pub(crate) fn finished(id: TaskId, arenas: SectionArenas, outcome: TaskOutcome) -> Self {
        Self::Finished {
            id,
            arenas,
            outcome,
        }
    }
}

struct RunningTask {
    section: SectionPos,
    cancel: CancelToken,
}

/// Latest compile and re-sort of one section, queued or running.
#[derive(Default)]
struct SectionSlots {
    compile: Option<(TaskId, CancelToken)>,
    resort: Option<(TaskId, CancelToken)>,
}

pub(crate) struct Mailbox<W, B: GpuBackend> {
    inbox: Receiver<Message>,
    workers: WorkerContext<W, B>,
    queues: TaskQueues,
    pool: ArenaPool<SectionArenas>,
    running: HashMap<TaskId, RunningTask>,
    sections: HashMap<SectionPos, SectionSlots>,
    camera: [f32; 3],
    next_id: TaskId,
    closing: bool,
    completed: u64,
    cancelled: u64,
    failed: u64,
    published: Arc<Mutex<DispatcherStats>>,
}

impl<W: WorldQuery, B: GpuBackend> Mailbox<W, B> {
    pub fn new(
        inbox: Receiver<Message>,
        workers: WorkerContext<W, B>,
        queues: TaskQueues,
        pool: ArenaPool<SectionArenas>,
        published: Arc<Mutex<DispatcherStats>>,
    ) -> Self {
        Self {
            inbox,
            workers,
            queues,
            pool,
            running: HashMap::new(),
            sections: HashMap::new(),
            camera: [0.0; 3],
            next_id: 1,
            closing: false,
            completed: 0,
            cancelled: 0,
            failed: 0,
            published,
        }
    }

    /// Message loop. Returns once shut down and every task came back.
    pub fn run(mut self) {
        tracing::debug!(pool = self.pool.capacity(), "dispatcher mailbox started");
        while let Ok(message) = self.inbox.recv() {
            if matches!(message, Message::Abandon) {
                self.abandon();
                break;
            }
            self.handle(message);
            self.start_ready();
            self.publish();
            if self.closing && self.running.is_empty() {
                break;
            }
        }
        self.publish();
        tracing::debug!(
            completed = self.completed,
            cancelled = self.cancelled,
            failed = self.failed,
            "dispatcher mailbox stopped"
        );
    }

    fn handle(&mut self, message: Message) {
        match message {
            Message::Schedule {
                section,
                kind,
                priority,
                distance,
            } => self.schedule(section, kind, priority, distance),
            Message::Cancel(section) => {
                if let Some(slots) = self.sections.remove(&section) {
                    tracing::debug!(?section, "section tasks cancelled");
                    for slot in [slots.compile, slots.resort].into_iter().flatten() {
                        self.cancel_slot(slot);
                    }
                }
            }
            Message::SetCamera(camera) => self.camera = camera,
            Message::Finished {
                id,
                arenas,
                outcome,
            } => self.finished(id, arenas, outcome),
            Message::Shutdown => {
                self.closing = true;
                let dropped = self.queues.cancel_all();
                self.cancelled += dropped as u64;
                self.sections.clear();
                tracing::info!(dropped, running = self.running.len(), "dispatcher shutting down");
            }
            Message::Abandon => self.abandon(),
        }
    }

    fn schedule(&mut self, section: SectionPos, kind: TaskKind, priority: Priority, distance: f64) {
        if self.closing {
            tracing::debug!(?section, "schedule after shutdown ignored");
            return;
        }
        let id = self.next_id;
        self.next_id += 1;
        let cancel = CancelToken::new();

        // A compile supersedes everything for the section; a re-sort only
        // supersedes the previous re-sort.
        let slots = self.sections.entry(section).or_default();
        let mut superseded = Vec::with_capacity(2);
        if kind.is_compile() {
            superseded.extend(slots.compile.replace((id, cancel.clone())));
            superseded.extend(slots.resort.take());
        } else {
            superseded.extend(slots.resort.replace((id, cancel.clone())));
        }
        if !superseded.is_empty() {
            tracing::debug!(?section, count = superseded.len(), "superseded earlier tasks");
        }
        for slot in superseded {
            self.cancel_slot(slot);
        }

        let seq = self.queues.next_seq();
        self.queues.push(
            QueuedTask {
                id,
                section,
                kind,
                distance,
                seq,
                cancel,
            },
            priority,
        );
        tracing::trace!(?section, id, ?priority, "task queued");
    }

    fn cancel_slot(&mut self, (id, cancel): (TaskId, CancelToken)) {
        cancel.cancel();
        // Queued tasks end here; running ones report back through Finished.
        if !self.running.contains_key(&id) {
            self.cancelled += 1;
        }
    }

    fn finished(&mut self, id: TaskId, mut arenas: SectionArenas, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed => {
                self.completed += 1;
                arenas.clear_all();
            }
            TaskOutcome::Cancelled => {
                self.cancelled += 1;
                arenas.discard_all();
            }
            TaskOutcome::Failed => {
                self.failed += 1;
                arenas.discard_all();
            }
        }
        self.pool.release(arenas);

        let Some(task) = self.running.remove(&id) else {
            tracing::warn!(id, "completion for unknown task");
            return;
        };
        if let Some(slots) = self.sections.get_mut(&task.section) {
            if slots.compile.as_ref().is_some_and(|(slot, _)| *slot == id) {
                slots.compile = None;
            }
            if slots.resort.as_ref().is_some_and(|(slot, _)| *slot == id) {
                slots.resort = None;
            }
            if slots.compile.is_none() && slots.resort.is_none() {
                self.sections.remove(&task.section);
            }
        }
    }

    /// Starts queued tasks while arena packs are free.
    fn start_ready(&mut self) {
        loop {
            let Some(arenas) = self.pool.acquire() else {
                break;
            };
            let Some((task, priority)) = self.queues.poll() else {
                self.pool.release(arenas);
                break;
            };
            tracing::trace!(section = ?task.section, id = task.id, ?priority, "task started");
            self.running.insert(
                task.id,
                RunningTask {
                    section: task.section,
                    cancel: task.cancel.clone(),
                },
            );
            self.workers.spawn(task, arenas, self.camera);
        }
    }

    fn abandon(&mut self) {
        self.closing = true;
        self.queues.cancel_all();
        for task in self.running.values() {
            task.cancel.cancel();
        }
    }

    fn publish(&self) {
        let mut stats = self.published.lock();
        stats.pending_high = self.queues.pending(Priority::High);
        stats.pending_low = self.queues.pending(Priority::Low);
        stats.free_arenas = self.pool.free_count();
        stats.running = self.running.len();
        stats.completed = self.completed;
        stats.cancelled = self.cancelled;
        stats.failed = self.failed;
    }
}
