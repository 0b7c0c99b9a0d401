//! Render-thread upload queue.
//!
//! Workers never touch the GPU. They push a closure here and the render
//! thread runs it during [`super::Dispatcher::drain_uploads`].

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::error::GpuError;
use crate::gpu::{GpuBackend, RenderTarget};

/// One pending GPU upload.
pub(crate) type UploadJob<B> = Box<dyn FnOnce(&mut RenderTarget<B>) -> Result<(), GpuError> + Send>;

/// Producer side, cloned into workers.
pub(crate) type UploadSender<B> = Sender<UploadJob<B>>;

/// Consumer side, owned by the dispatcher handle.
pub(crate) struct UploadQueue<B: GpuBackend> {
    rx: Receiver<UploadJob<B>>,
}

impl<B: GpuBackend> UploadQueue<B> {
    /// Creates a connected queue.
    pub fn new() -> (UploadSender<B>, Self) {
        let (tx, rx) = unbounded();
        (tx, Self { rx })
    }

    /// Jobs waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Runs every job currently queued, in FIFO order.
    ///
    /// A failing job does not stop the drain; each job hands its arenas
    /// back on its own. The first error is returned with the count.
    pub fn drain(&self, target: &mut RenderTarget<B>) -> (usize, Option<GpuError>) {
        let mut ran = 0;
        let mut first_error = None;
        while let Ok(job) = self.rx.try_recv() {
            ran += 1;
            if let Err(err) = job(target) {
                tracing::error!(%err, "section upload failed");
                first_error.get_or_insert(err);
            }
        }
        (ran, first_error)
    }
}
