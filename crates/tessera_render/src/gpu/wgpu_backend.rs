//! WGPU device backend.

use std::sync::Arc;

use super::{BufferKind, GpuBackend};
use crate::error::GpuError;
use crate::vertex::{IndexType, SectionVertex};

/// What a render pass needs to bind one section layer.
#[derive(Debug, Clone)]
pub struct WgpuArrayObject {
    /// Vertex buffer layout of [`SectionVertex`].
    pub vertex_layout: wgpu::VertexBufferLayout<'static>,
    /// Index buffer format.
    pub index_format: wgpu::IndexFormat,
}

/// Backend over a WGPU device and queue.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    max_buffer_size: u64,
}

impl WgpuBackend {
    /// Wraps a device and its queue.
    #[must_use]
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let max_buffer_size = device.limits().max_buffer_size;
        Self {
            device,
            queue,
            max_buffer_size,
        }
    }

    /// The device.
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The queue.
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl GpuBackend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type ArrayObject = WgpuArrayObject;

    fn create_buffer(
        &mut self,
        kind: BufferKind,
        size: u64,
        label: &str,
    ) -> Result<wgpu::Buffer, GpuError> {
        if size > self.max_buffer_size {
            return Err(GpuError::BufferTooLarge {
                requested: size,
                max: self.max_buffer_size,
            });
        }
        let usage = match kind {
            BufferKind::Vertex => wgpu::BufferUsages::VERTEX,
            BufferKind::Index => wgpu::BufferUsages::INDEX,
        } | wgpu::BufferUsages::COPY_DST;

        Ok(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        }))
    }

    fn write_buffer(&mut self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        // Queue writes must be a multiple of four bytes.
        let rem = data.len() % wgpu::COPY_BUFFER_ALIGNMENT as usize;
        if rem == 0 {
            self.queue.write_buffer(buffer, offset, data);
        } else {
            let mut padded = Vec::with_capacity(data.len() + 4 - rem);
            padded.extend_from_slice(data);
            padded.resize(data.len() + 4 - rem, 0);
            self.queue.write_buffer(buffer, offset, &padded);
        }
    }

    fn destroy_buffer(&mut self, buffer: wgpu::Buffer) {
        buffer.destroy();
    }

    fn create_array_object(&mut self, index_type: IndexType) -> WgpuArrayObject {
        WgpuArrayObject {
            vertex_layout: SectionVertex::desc(),
            index_format: index_type.format(),
        }
    }

    fn destroy_array_object(&mut self, _object: WgpuArrayObject) {}
}
