//! # Section Dispatcher
//!
//! Schedules section compiles and translucent re-sorts onto a worker pool
//! and hands finished geometry to the render thread.
//!
//! ## Architecture
//!
//! ```text
//!  render thread                mailbox thread              workers
//!  ─────────────                ──────────────              ───────
//!  schedule_compile ──────────▶ priority queues
//!  schedule_resort  ──────────▶   (quota 2:1)
//!  try_cancel       ──────────▶ arena pool ───── lease ───▶ compile / sort
//!                                    ▲                           │
//!                                    └──── Finished ◀──┐         │
//!  drain_uploads ◀──────────── upload queue ◀──────────┼─────────┘
//!     (runs closures, GPU writes)   ──────────────────┘
//! ```
//!
//! ## Rules
//!
//! - Queues, the arena pool and task bookkeeping live on the mailbox thread
//! - GPU objects are touched only inside [`Dispatcher::drain_uploads`]
//! - At most `arena_pool_size` tasks run at once
//! - A task that panics fails alone; its arena pack returns to the pool
//! - Nothing here blocks the render thread

mod mailbox;
mod queue;
mod task;
mod upload;
mod worker;

pub use task::{CancelToken, Priority, TaskId};

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use tessera_core::{ArenaPool, SectionPos};

use self::mailbox::{Mailbox, Message};
use self::queue::TaskQueues;
use self::task::TaskKind;
use self::upload::UploadQueue;
use self::worker::WorkerContext;
use crate::compiler::SectionArenas;
use crate::config::PipelineConfig;
use crate::error::{GpuError, MeshError, MeshResult};
use crate::gpu::{GpuBackend, RenderTarget};
use crate::sorter::TransparencySortState;
use crate::world::WorldQuery;

/// How long shutdown sleeps between upload drains.
const SHUTDOWN_POLL: Duration = Duration::from_millis(1);

/// Snapshot of dispatcher activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Live high-priority tasks waiting.
    pub pending_high: usize,
    /// Live low-priority tasks waiting.
    pub pending_low: usize,
    /// Upload closures waiting for the render thread.
    pub pending_uploads: usize,
    /// Arena packs ready to lend.
    pub free_arenas: usize,
    /// Tasks holding an arena pack.
    pub running: usize,
    /// Tasks that finished their upload.
    pub completed: u64,
    /// Tasks cancelled, superseded, or discarded at upload.
    pub cancelled: u64,
    /// Tasks whose upload failed on the device.
    pub failed: u64,
}

impl DispatcherStats {
    /// Tasks not yet started.
    #[inline]
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.pending_high + self.pending_low
    }

    /// Returns true when nothing is queued, running or waiting for upload.
    #[inline]
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.pending() == 0 && self.running == 0 && self.pending_uploads == 0
    }
}

/// Handle to the compile pipeline. Owned by the render thread.
///
/// # Example
///
/// ```rust,ignore
/// let world = Arc::new(GridWorld::new());
/// let mut target = RenderTarget::new(HeadlessBackend::new());
/// let dispatcher = Dispatcher::new(Arc::clone(&world), PipelineConfig::default())?;
///
/// target.load_section(pos);
/// dispatcher.schedule_compile(pos, 0.0, true)?;
/// loop {
///     dispatcher.drain_uploads(&mut target)?;
///     // ... draw ...
/// }
/// ```
pub struct Dispatcher<W: WorldQuery, B: GpuBackend> {
    mailbox: Sender<Message>,
    mailbox_thread: Option<JoinHandle<()>>,
    uploads: UploadQueue<B>,
    stats: Arc<Mutex<DispatcherStats>>,
    runtime: Option<tokio::runtime::Runtime>,
    closed: bool,
    _world: PhantomData<fn() -> W>,
}

impl<W: WorldQuery, B: GpuBackend> Dispatcher<W, B> {
    /// Starts the worker pool and the mailbox thread.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration or when a thread cannot start.
    pub fn new(world: Arc<W>, config: PipelineConfig) -> MeshResult<Self> {
        config.validate()?;

        // Tasks run on the blocking pool; the async side only schedules them.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads)
            .thread_name("tessera-worker")
            .build()
            .map_err(MeshError::WorkerPool)?;

        let (mailbox_tx, mailbox_rx) = unbounded();
        let (upload_tx, uploads) = UploadQueue::new();
        let arena_config = config.arena;
        let pool = ArenaPool::new(config.arena_pool_size, || SectionArenas::new(arena_config));

        let stats = Arc::new(Mutex::new(DispatcherStats {
            free_arenas: config.arena_pool_size,
            ..DispatcherStats::default()
        }));
        let workers = WorkerContext {
            world,
            runtime: runtime.handle().clone(),
            mailbox: mailbox_tx.clone(),
            uploads: upload_tx,
        };
        let mailbox = Mailbox::new(
            mailbox_rx,
            workers,
            TaskQueues::new(config.high_priority_quota),
            pool,
            Arc::clone(&stats),
        );
        let mailbox_thread = std::thread::Builder::new()
            .name("tessera-mailbox".into())
            .spawn(move || mailbox.run())
            .map_err(MeshError::MailboxSpawn)?;

        tracing::info!(
            workers = config.worker_threads,
            arena_packs = config.arena_pool_size,
            quota = config.high_priority_quota,
            "dispatcher started"
        );

        Ok(Self {
            mailbox: mailbox_tx,
            mailbox_thread: Some(mailbox_thread),
            uploads,
            stats,
            runtime: Some(runtime),
            closed: false,
            _world: PhantomData,
        })
    }

    /// Queues a compile of `section`.
    ///
    /// Smaller `priority_key` runs first within a priority class. Any
    /// compile or re-sort already scheduled for the section is superseded.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Closed`] after shutdown.
    pub fn schedule_compile(
        &self,
        section: SectionPos,
        priority_key: f64,
        high_priority: bool,
    ) -> MeshResult<()> {
        let priority = if high_priority {
            Priority::High
        } else {
            Priority::Low
        };
        self.send(Message::Schedule {
            section,
            kind: TaskKind::Compile,
            priority,
            distance: priority_key,
        })
    }

    /// Queues a re-sort of a section's translucent quads for `camera`.
    ///
    /// Supersedes an earlier re-sort of the same section, never a compile.
    /// Runs at high priority, ordered by distance to the camera.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Closed`] after shutdown.
    pub fn schedule_resort(
        &self,
        section: SectionPos,
        sort_state: Arc<TransparencySortState>,
        camera: [f32; 3],
    ) -> MeshResult<()> {
        self.send(Message::Schedule {
            section,
            kind: TaskKind::Resort { sort_state, camera },
            priority: Priority::High,
            distance: section.distance_squared_to(camera),
        })
    }

    /// Sets the camera used to sort translucent quads of later compiles.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Closed`] after shutdown.
    pub fn set_camera(&self, camera: [f32; 3]) -> MeshResult<()> {
        self.send(Message::SetCamera(camera))
    }

    /// Cancels queued and running work for `section`.
    ///
    /// Queued tasks never start. Running tasks stop at their next check and
    /// their results are never uploaded.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Closed`] after shutdown.
    pub fn try_cancel(&self, section: SectionPos) -> MeshResult<()> {
        self.send(Message::Cancel(section))
    }

    /// Latest activity snapshot. Never blocks on the mailbox.
    #[must_use]
    pub fn poll_stats(&self) -> DispatcherStats {
        let mut stats = *self.stats.lock();
        stats.pending_uploads = self.uploads.len();
        stats
    }

    /// Runs every queued upload on the render thread.
    ///
    /// Returns the number of uploads run.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::WrongThread`] off the render thread, or the first
    /// GPU allocation failure. A failure does not stop the drain.
    pub fn drain_uploads(&self, target: &mut RenderTarget<B>) -> MeshResult<usize> {
        if !target.is_render_thread() {
            return Err(MeshError::WrongThread);
        }
        let (ran, error) = self.uploads.drain(target);
        match error {
            Some(err) => Err(err.into()),
            None => Ok(ran),
        }
    }

    /// Stops the pipeline.
    ///
    /// Queued tasks are cancelled; running tasks finish and their uploads
    /// are applied here. Returns once every arena pack is back in the pool.
    /// Calling it twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::WrongThread`] off the render thread, or the first
    /// GPU failure seen while draining. The pipeline is stopped either way.
    pub fn shutdown(&mut self, target: &mut RenderTarget<B>) -> MeshResult<()> {
        if !target.is_render_thread() {
            return Err(MeshError::WrongThread);
        }
        self.closed = true;
        let Some(thread) = self.mailbox_thread.take() else {
            return Ok(());
        };
        let _ = self.mailbox.send(Message::Shutdown);

        let mut first_error: Option<GpuError> = None;
        while !thread.is_finished() {
            if let (_, Some(err)) = self.uploads.drain(target) {
                first_error.get_or_insert(err);
            }
            std::thread::sleep(SHUTDOWN_POLL);
        }
        if thread.join().is_err() {
            tracing::error!("dispatcher mailbox panicked");
        }
        if let (_, Some(err)) = self.uploads.drain(target) {
            first_error.get_or_insert(err);
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        tracing::info!("dispatcher stopped");

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Returns true after [`Self::shutdown`].
    #[inline]
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn send(&self, message: Message) -> MeshResult<()> {
        if self.closed {
            return Err(MeshError::Closed);
        }
        self.mailbox.send(message).map_err(|_| MeshError::Closed)
    }
}

impl<W: WorldQuery, B: GpuBackend> Drop for Dispatcher<W, B> {
    fn drop(&mut self) {
        if let Some(thread) = self.mailbox_thread.take() {
            tracing::warn!("dispatcher dropped without shutdown, abandoning tasks");
            let _ = self.mailbox.send(Message::Abandon);
            let _ = thread.join();
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
