//! # GPU Buffer Objects
//!
//! Device-resident vertex and index buffers for one section layer, plus the
//! backend seam they are created through.
//!
//! ## Rules
//!
//! - Every call here happens on the render thread
//! - Buffers grow on upload and are reused across recompiles
//! - Allocation failures propagate; the frame renderer treats them as fatal

mod headless;
mod target;
mod wgpu_backend;

pub use headless::{BufferId, HeadlessBackend, HeadlessStats};
pub use target::{GpuSection, RenderTarget, UploadStats};
pub use wgpu_backend::{WgpuArrayObject, WgpuBackend};

use std::thread::{self, ThreadId};

use crate::error::GpuError;
use crate::material::Material;
use crate::vertex::IndexType;

/// Buffer usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Vertex data.
    Vertex,
    /// Index data.
    Index,
}

/// A graphics device that can hold section geometry.
///
/// Not `Send` on purpose: a backend lives on the render thread.
pub trait GpuBackend: 'static {
    /// Device buffer handle.
    type Buffer;
    /// Vertex array state binding a vertex layout and index format.
    type ArrayObject;

    /// Creates a buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Fails when the device cannot hold the buffer.
    fn create_buffer(&mut self, kind: BufferKind, size: u64, label: &str)
        -> Result<Self::Buffer, GpuError>;

    /// Copies `data` into `buffer` at `offset`.
    fn write_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]);

    /// Frees a buffer.
    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    /// Creates array state for the section vertex format and `index_type`.
    fn create_array_object(&mut self, index_type: IndexType) -> Self::ArrayObject;

    /// Frees array state.
    fn destroy_array_object(&mut self, object: Self::ArrayObject);
}

/// A device buffer and its size.
struct SizedBuffer<B: GpuBackend> {
    buffer: B::Buffer,
    capacity: u64,
}

/// Vertex buffer, index buffer and array object of one section layer.
pub struct GpuBufferObject<B: GpuBackend> {
    owner: ThreadId,
    material: Material,
    vertices: Option<SizedBuffer<B>>,
    indices: Option<SizedBuffer<B>>,
    array: Option<(B::ArrayObject, IndexType)>,
    vertex_count: u32,
    index_count: u32,
}

impl<B: GpuBackend> GpuBufferObject<B> {
    /// Creates an empty buffer object owned by the calling thread.
    #[must_use]
    pub fn new(material: Material) -> Self {
        Self {
            owner: thread::current().id(),
            material,
            vertices: None,
            indices: None,
            array: None,
            vertex_count: 0,
            index_count: 0,
        }
    }

    /// Material drawn from this object.
    #[inline]
    #[must_use]
    pub const fn material(&self) -> Material {
        self.material
    }

    /// Number of vertices uploaded.
    #[inline]
    #[must_use]
    pub const fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Number of indices uploaded.
    #[inline]
    #[must_use]
    pub const fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Index element type, once indices were uploaded.
    #[must_use]
    pub fn index_type(&self) -> Option<IndexType> {
        self.array.as_ref().map(|(_, t)| *t)
    }

    /// Vertex buffer, once uploaded.
    #[must_use]
    pub fn vertex_buffer(&self) -> Option<&B::Buffer> {
        self.vertices.as_ref().map(|b| &b.buffer)
    }

    /// Index buffer, once uploaded.
    #[must_use]
    pub fn index_buffer(&self) -> Option<&B::Buffer> {
        self.indices.as_ref().map(|b| &b.buffer)
    }

    /// Array object, once indices were uploaded.
    #[must_use]
    pub fn array_object(&self) -> Option<&B::ArrayObject> {
        self.array.as_ref().map(|(a, _)| a)
    }

    /// Uploads vertex bytes, growing the buffer if needed.
    ///
    /// # Errors
    ///
    /// Fails when a larger buffer cannot be created.
    pub fn upload_vertices(
        &mut self,
        backend: &mut B,
        bytes: &[u8],
        vertex_count: u32,
    ) -> Result<(), GpuError> {
        self.check_thread();
        let label = self.material.label();
        upload(backend, &mut self.vertices, BufferKind::Vertex, bytes, label)?;
        self.vertex_count = vertex_count;
        Ok(())
    }

    /// Uploads index bytes, growing the buffer and swapping the array
    /// object if the element type changed.
    ///
    /// # Errors
    ///
    /// Fails when a larger buffer cannot be created.
    pub fn upload_indices(
        &mut self,
        backend: &mut B,
        bytes: &[u8],
        index_count: u32,
        index_type: IndexType,
    ) -> Result<(), GpuError> {
        self.check_thread();
        let label = self.material.label();
        upload(backend, &mut self.indices, BufferKind::Index, bytes, label)?;
        self.index_count = index_count;

        if self.index_type() != Some(index_type) {
            if let Some((old, _)) = self.array.take() {
                backend.destroy_array_object(old);
            }
            self.array = Some((backend.create_array_object(index_type), index_type));
        }
        Ok(())
    }

    /// Frees every device object.
    pub fn release(self, backend: &mut B) {
        self.check_thread();
        for sized in [self.vertices, self.indices].into_iter().flatten() {
            backend.destroy_buffer(sized.buffer);
        }
        if let Some((array, _)) = self.array {
            backend.destroy_array_object(array);
        }
    }

    fn check_thread(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "GPU buffer object used off the render thread"
        );
    }
}

impl<B: GpuBackend> std::fmt::Debug for GpuBufferObject<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBufferObject")
            .field("material", &self.material)
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count)
            .field("vertex_capacity", &self.vertices.as_ref().map(|b| b.capacity))
            .field("index_capacity", &self.indices.as_ref().map(|b| b.capacity))
            .finish()
    }
}

/// Writes `bytes` into `slot`, replacing the buffer when it is too small.
fn upload<B: GpuBackend>(
    backend: &mut B,
    slot: &mut Option<SizedBuffer<B>>,
    kind: BufferKind,
    bytes: &[u8],
    label: &str,
) -> Result<(), GpuError> {
    let needed = (bytes.len() as u64)
        .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
        .max(wgpu::COPY_BUFFER_ALIGNMENT);
    if slot.as_ref().map_or(true, |b| b.capacity < needed) {
        if let Some(old) = slot.take() {
            backend.destroy_buffer(old.buffer);
        }
        let buffer = backend.create_buffer(kind, needed, label)?;
        *slot = Some(SizedBuffer {
            buffer,
            capacity: needed,
        });
    }
    if let Some(sized) = slot.as_ref() {
        backend.write_buffer(&sized.buffer, 0, bytes);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_reused_until_too_small() {
        let mut backend = HeadlessBackend::new();
        let mut object = GpuBufferObject::<HeadlessBackend>::new(Material::Solid);

        object.upload_vertices(&mut backend, &[1; 64], 2).unwrap();
        object.upload_vertices(&mut backend, &[2; 32], 1).unwrap();
        assert_eq!(backend.stats().buffers_created, 1);

        object.upload_vertices(&mut backend, &[3; 128], 4).unwrap();
        assert_eq!(backend.stats().buffers_created, 2);
        assert_eq!(backend.stats().buffers_destroyed, 1);
        assert_eq!(object.vertex_count(), 4);

        let id = *object.vertex_buffer().unwrap();
        assert_eq!(&backend.contents(id).unwrap()[..128], &[3; 128]);
    }

    #[test]
    fn test_array_object_follows_index_type() {
        let mut backend = HeadlessBackend::new();
        let mut object = GpuBufferObject::<HeadlessBackend>::new(Material::Translucent);

        object.upload_indices(&mut backend, &[0; 12], 6, IndexType::U16).unwrap();
        assert_eq!(object.index_type(), Some(IndexType::U16));
        object.upload_indices(&mut backend, &[0; 12], 6, IndexType::U16).unwrap();
        assert_eq!(backend.stats().array_objects_live, 1);

        object.upload_indices(&mut backend, &[0; 24], 6, IndexType::U32).unwrap();
        assert_eq!(object.index_type(), Some(IndexType::U32));
        assert_eq!(backend.stats().array_objects_live, 1);

        object.release(&mut backend);
        assert_eq!(backend.stats().array_objects_live, 0);
        assert_eq!(backend.live_buffers(), 0);
    }

    #[test]
    fn test_create_failure_propagates() {
        let mut backend = HeadlessBackend::with_max_buffer_size(64);
        let mut object = GpuBufferObject::<HeadlessBackend>::new(Material::Solid);

        let err = object.upload_vertices(&mut backend, &[0; 65], 1).unwrap_err();
        assert!(matches!(err, GpuError::BufferTooLarge { max: 64, .. }));
        assert!(object.vertex_buffer().is_none());
    }

    #[test]
    fn test_odd_sizes_are_aligned() {
        let mut backend = HeadlessBackend::new();
        let mut object = GpuBufferObject::<HeadlessBackend>::new(Material::Solid);
        object.upload_indices(&mut backend, &[7; 6], 3, IndexType::U16).unwrap();

        let id = *object.index_buffer().unwrap();
        assert_eq!(backend.contents(id).unwrap().len(), 8);
    }
}
