//! Task bodies run on the worker runtime.
//!
//! Compiles and re-sorts are CPU-bound and never yield, so they run on the
//! runtime's blocking pool. A panicking task still returns its arena pack.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tessera_core::{ResultHandle, SectionPos};

use super::mailbox::Message;
use super::task::{CancelToken, QueuedTask, TaskId, TaskKind, TaskOutcome};
use super::upload::{UploadJob, UploadSender};
use crate::compiler::{MeshCompiler, SectionArenas};
use crate::gpu::{GpuBackend, RenderTarget};
use crate::material::Material;
use crate::sorter::TransparencySortState;
use crate::world::WorldQuery;

thread_local! {
    /// One compiler per worker thread, so the sorter's scratch is reused.
    static COMPILER: RefCell<MeshCompiler> = RefCell::new(MeshCompiler::new());
}

/// What a worker needs besides its task.
pub(crate) struct WorkerContext<W, B: GpuBackend> {
    pub world: Arc<W>,
    pub runtime: tokio::runtime::Handle,
    pub mailbox: Sender<Message>,
    pub uploads: UploadSender<B>,
}

impl<W, B: GpuBackend> Clone for WorkerContext<W, B> {
    fn clone(&self) -> Self {
        Self {
            world: Arc::clone(&self.world),
            runtime: self.runtime.clone(),
            mailbox: self.mailbox.clone(),
            uploads: self.uploads.clone(),
        }
    }
}

impl<W: WorldQuery, B: GpuBackend> WorkerContext<W, B> {
    /// Starts `task` on the runtime with a leased arena pack.
    pub fn spawn(&self, task: QueuedTask, arenas: SectionArenas, camera: [f32; 3]) {
        let ctx = self.clone();
        drop(self.runtime.spawn_blocking(move || ctx.run(task, arenas, camera)));
    }

    fn run(self, task: QueuedTask, arenas: SectionArenas, camera: [f32; 3]) {
        let QueuedTask {
            id,
            section,
            kind,
            cancel,
            ..
        } = task;
        if cancel.is_cancelled() {
            self.finish(id, arenas, TaskOutcome::Cancelled);
            return;
        }
        match kind {
            TaskKind::Compile => self.compile(id, section, cancel, arenas, camera),
            TaskKind::Resort { sort_state, camera } => {
                self.resort(id, section, cancel, arenas, sort_state, camera);
            }
        }
    }

    fn compile(
        self,
        id: TaskId,
        section: SectionPos,
        cancel: CancelToken,
        mut arenas: SectionArenas,
        camera: [f32; 3],
    ) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            COMPILER.with(|compiler| {
                compiler
                    .borrow_mut()
                    .compile(self.world.as_ref(), section, &mut arenas, camera, &cancel)
            })
        }));
        let compiled = match result {
            Ok(Ok(compiled)) => compiled,
            Err(payload) => {
                self.panicked(id, section, arenas, payload.as_ref());
                return;
            }
            Ok(Err(interrupt)) => {
                tracing::debug!(?section, ?interrupt, "compile interrupted");
                self.finish(id, arenas, TaskOutcome::Cancelled);
                return;
            }
        };
        if cancel.is_cancelled() {
            compiled.release(&mut arenas);
            self.finish(id, arenas, TaskOutcome::Cancelled);
            return;
        }

        let mailbox = self.mailbox.clone();
        let job: UploadJob<B> = Box::new(move |target: &mut RenderTarget<B>| {
            let mut arenas = arenas;
            if cancel.is_cancelled() {
                compiled.release(&mut arenas);
                let _ = mailbox.send(Message::finished(id, arenas, TaskOutcome::Cancelled));
                return Ok(());
            }
            let result = target.install_compiled(compiled, &mut arenas);
            let outcome = match result {
                Ok(true) => TaskOutcome::Completed,
                Ok(false) => TaskOutcome::Cancelled,
                Err(_) => TaskOutcome::Failed,
            };
            let _ = mailbox.send(Message::finished(id, arenas, outcome));
            result.map(|_| ())
        });
        if self.uploads.send(job).is_err() {
            tracing::debug!(?section, "upload queue closed, dropping compile");
        }
    }

    fn resort(
        self,
        id: TaskId,
        section: SectionPos,
        cancel: CancelToken,
        mut arenas: SectionArenas,
        sort_state: Arc<TransparencySortState>,
        camera: [f32; 3],
    ) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            COMPILER.with(|compiler| {
                sort_state.resort(
                    compiler.borrow_mut().sorter_mut(),
                    camera,
                    arenas.get_mut(Material::Translucent),
                )
            })
        }));
        let handle = match result {
            Ok(handle) => handle,
            Err(payload) => {
                self.panicked(id, section, arenas, payload.as_ref());
                return;
            }
        };
        let Some(handle) = handle else {
            self.finish(id, arenas, TaskOutcome::Completed);
            return;
        };
        if cancel.is_cancelled() {
            release_sorted(&mut arenas, handle);
            self.finish(id, arenas, TaskOutcome::Cancelled);
            return;
        }

        let mailbox = self.mailbox.clone();
        let job: UploadJob<B> = Box::new(move |target: &mut RenderTarget<B>| {
            let mut arenas = arenas;
            if cancel.is_cancelled() {
                release_sorted(&mut arenas, handle);
                let _ = mailbox.send(Message::finished(id, arenas, TaskOutcome::Cancelled));
                return Ok(());
            }
            let result = target.install_resorted(
                section,
                &sort_state,
                handle,
                arenas.get_mut(Material::Translucent),
            );
            let outcome = match result {
                Ok(true) => TaskOutcome::Completed,
                Ok(false) => TaskOutcome::Cancelled,
                Err(_) => TaskOutcome::Failed,
            };
            let _ = mailbox.send(Message::finished(id, arenas, outcome));
            result.map(|_| ())
        });
        if self.uploads.send(job).is_err() {
            tracing::debug!(?section, "upload queue closed, dropping re-sort");
        }
    }

    fn finish(&self, id: TaskId, arenas: SectionArenas, outcome: TaskOutcome) {
        let _ = self.mailbox.send(Message::finished(id, arenas, outcome));
    }

    fn panicked(
        &self,
        id: TaskId,
        section: SectionPos,
        mut arenas: SectionArenas,
        payload: &(dyn Any + Send),
    ) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        tracing::error!(?section, id, message, "section task panicked");
        arenas.discard_all();
        self.finish(id, arenas, TaskOutcome::Failed);
    }
}

fn release_sorted(arenas: &mut SectionArenas, handle: ResultHandle) {
    if let Err(err) = arenas.get_mut(Material::Translucent).release(handle) {
        tracing::warn!(%err, "releasing cancelled re-sort");
    }
}
