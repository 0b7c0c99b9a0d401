//! Section vertex format and index element types.

use bytemuck::{Pod, Zeroable};

// =============================================================================
// VERTEX FORMAT - Standard vertex buffer layout
// =============================================================================

/// Vertex for section geometry - 32 bytes, packed for GPU efficiency.
///
/// Positions are relative to the section origin so they stay precise far
/// from the world origin.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SectionVertex {
    /// Position relative to the section origin [x, y, z].
    pub position: [f32; 3],
    /// RGBA8 tint.
    pub color: u32,
    /// Texture coordinates [u, v].
    pub uv: [f32; 2],
    /// Block light in the low 16 bits, sky light in the high 16 bits.
    pub light: u32,
    /// Normal packed as signed bytes [nx, ny, nz, 0].
    pub normal: u32,
}

impl SectionVertex {
    /// Size of one vertex in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Vertex buffer layout for WGPU.
    pub const ATTRIBS: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        0 => Float32x3,  // position
        1 => Unorm8x4,   // color
        2 => Float32x2,  // uv
        3 => Uint32,     // light
        4 => Snorm8x4,   // normal
    ];

    /// Vertex buffer layout descriptor.
    #[must_use]
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Self::SIZE as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }

    /// Packs a unit normal into signed bytes.
    #[must_use]
    pub fn pack_normal(normal: [f32; 3]) -> u32 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let byte = |v: f32| u32::from((v.clamp(-1.0, 1.0) * 127.0).round() as i8 as u8);
        byte(normal[0]) | byte(normal[1]) << 8 | byte(normal[2]) << 16
    }
}

/// Width of index buffer elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    U32,
}

impl IndexType {
    /// Largest index count that still fits 16-bit indices.
    pub const U16_LIMIT: usize = u16::MAX as usize;

    /// Smallest element type that can address `index_count` indices.
    #[inline]
    #[must_use]
    pub const fn for_index_count(index_count: usize) -> Self {
        if index_count <= Self::U16_LIMIT {
            Self::U16
        } else {
            Self::U32
        }
    }

    /// Bytes per index.
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Matching WGPU format.
    #[inline]
    #[must_use]
    pub const fn format(self) -> wgpu::IndexFormat {
        match self {
            Self::U16 => wgpu::IndexFormat::Uint16,
            Self::U32 => wgpu::IndexFormat::Uint32,
        }
    }
}

/// Indices of the two triangles of quad `k`, in draw winding.
#[inline]
#[must_use]
pub const fn quad_indices(k: u32) -> [u32; 6] {
    let base = k * 4;
    [base, base + 1, base + 2, base + 2, base + 3, base]
}
