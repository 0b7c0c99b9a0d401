//! CPU-side GPU backend.
//!
//! Keeps buffers as byte vectors so the pipeline can run, and be inspected,
//! without a device.

use std::collections::HashMap;

use super::{BufferKind, GpuBackend};
use crate::error::GpuError;
use crate::vertex::IndexType;

/// Handle to a headless buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

/// Counters of a headless backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Buffers created.
    pub buffers_created: u64,
    /// Buffers destroyed.
    pub buffers_destroyed: u64,
    /// Bytes written into buffers.
    pub bytes_written: u64,
    /// Array objects currently alive.
    pub array_objects_live: u64,
}

struct HeadlessBuffer {
    kind: BufferKind,
    data: Vec<u8>,
}

/// GPU backend storing buffers in host memory.
pub struct HeadlessBackend {
    buffers: HashMap<BufferId, HeadlessBuffer>,
    next_id: u32,
    max_buffer_size: u64,
    stats: HeadlessStats,
}

impl HeadlessBackend {
    /// Creates a backend without a buffer size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_buffer_size(u64::MAX)
    }

    /// Creates a backend that rejects buffers above `max` bytes, like a
    /// device limit.
    #[must_use]
    pub fn with_max_buffer_size(max: u64) -> Self {
        Self {
            buffers: HashMap::new(),
            next_id: 1,
            max_buffer_size: max,
            stats: HeadlessStats::default(),
        }
    }

    /// Counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> HeadlessStats {
        self.stats
    }

    /// Number of buffers alive.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Contents of a live buffer.
    #[must_use]
    pub fn contents(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(&id).map(|b| b.data.as_slice())
    }

    /// Usage of a live buffer.
    #[must_use]
    pub fn kind(&self, id: BufferId) -> Option<BufferKind> {
        self.buffers.get(&id).map(|b| b.kind)
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for HeadlessBackend {
    type Buffer = BufferId;
    type ArrayObject = IndexType;

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        size: u64,
        label: &str,
    ) -> Result<BufferId, GpuError> {
        if size > self.max_buffer_size {
            return Err(GpuError::BufferTooLarge {
                requested: size,
                max: self.max_buffer_size,
            });
        }
        let len = usize::try_from(size).map_err(|_| GpuError::OutOfMemory { requested: size })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| GpuError::OutOfMemory { requested: size })?;
        data.resize(len, 0);

        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(id, HeadlessBuffer { kind, data });
        self.stats.buffers_created += 1;
        tracing::trace!(label, size, "headless buffer created");
        Ok(id)
    }

    fn write_buffer(&mut self, buffer: &BufferId, offset: u64, data: &[u8]) {
        let Some(target) = self.buffers.get_mut(buffer) else {
            tracing::error!(?buffer, "write to destroyed buffer");
            return;
        };
        let Ok(start) = usize::try_from(offset) else {
            return;
        };
        let end = start + data.len();
        debug_assert!(end <= target.data.len(), "write past end of buffer");
        if end <= target.data.len() {
            target.data[start..end].copy_from_slice(data);
            self.stats.bytes_written += data.len() as u64;
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_some() {
            self.stats.buffers_destroyed += 1;
        }
    }

    fn create_array_object(&mut self, index_type: IndexType) -> IndexType {
        self.stats.array_objects_live += 1;
        index_type
    }

    fn destroy_array_object(&mut self, _object: IndexType) {
        self.stats.array_objects_live -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_write_destroy() {
        let mut backend = HeadlessBackend::new();
        let id = backend.create_buffer(BufferKind::Index, 8, "test").unwrap();
        backend.write_buffer(&id, 4, &[1, 2, 3, 4]);

        assert_eq!(backend.contents(id), Some(&[0, 0, 0, 0, 1, 2, 3, 4][..]));
        assert_eq!(backend.kind(id), Some(BufferKind::Index));
        assert_eq!(backend.stats().bytes_written, 4);

        backend.destroy_buffer(id);
        assert!(backend.contents(id).is_none());
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_limit_enforced() {
        let mut backend = HeadlessBackend::with_max_buffer_size(16);
        assert!(backend.create_buffer(BufferKind::Vertex, 16, "ok").is_ok());
        assert_eq!(
            backend.create_buffer(BufferKind::Vertex, 17, "big"),
            Err(GpuError::BufferTooLarge {
                requested: 17,
                max: 16
            })
        );
    }
}
