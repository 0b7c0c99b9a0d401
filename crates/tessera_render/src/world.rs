//! # World Query Boundary
//!
//! What the mesh compiler needs from the world: cell lookups and the
//! callbacks that turn a cell into vertices. The world owns all block
//! knowledge; the compiler only sees opaque cell descriptors.

use tessera_core::{LocalPos, SectionPos};

use crate::material::{Material, MaterialSet};
use crate::vertex::SectionVertex;

/// Availability of a section and its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    /// The section is not loaded. It compiles to an empty result.
    Missing,
    /// The section is loaded but some neighbours are not; faces on the
    /// missing sides cannot be culled.
    Partial,
    /// The section and all six neighbours are loaded.
    Ready,
}

/// How a cell produces geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellShape {
    /// Nothing to draw.
    Empty,
    /// Drawn by the model renderer.
    Model,
    /// Drawn by the liquid renderer.
    Liquid,
    /// A model submerged in liquid; both renderers run.
    ModelWithLiquid,
}

impl CellShape {
    /// Whether the model renderer runs.
    #[inline]
    #[must_use]
    pub const fn has_model(self) -> bool {
        matches!(self, Self::Model | Self::ModelWithLiquid)
    }

    /// Whether the liquid renderer runs.
    #[inline]
    #[must_use]
    pub const fn has_liquid(self) -> bool {
        matches!(self, Self::Liquid | Self::ModelWithLiquid)
    }
}

/// Where a cell is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellPose {
    /// Section being compiled.
    pub section: SectionPos,
    /// Cell inside the section.
    pub local: LocalPos,
    /// False when some neighbour sections are missing.
    pub neighbors_complete: bool,
}

/// An object drawn by its own renderer instead of the section mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxRenderable {
    /// Cell the object sits in.
    pub local: LocalPos,
    /// Renderer-specific kind tag.
    pub kind: u32,
    /// True if it must be drawn even when its section is culled
    /// (beams, large structures).
    pub global: bool,
}

/// Receives vertices from cell renderers.
pub trait VertexSink {
    /// Appends one vertex to `material`. Every four consecutive vertices of
    /// one material form a quad.
    fn vertex(&mut self, material: Material, vertex: SectionVertex);
}

/// The world as seen by the mesh compiler.
///
/// Implementations are shared across worker threads and must tolerate
/// sections being unloaded while a compile is running.
pub trait WorldQuery: Send + Sync + 'static {
    /// Cell descriptor. Usually a snapshot of the block plus whatever
    /// neighbour data face culling needs.
    type Cell: Send;

    /// Availability of `section` and its neighbours.
    fn section_status(&self, section: SectionPos) -> SectionStatus;

    /// Content of one cell, or `None` if the section has gone away.
    fn get_cell_content(&self, section: SectionPos, local: LocalPos) -> Option<Self::Cell>;

    /// Whether the cell is a full opaque solid that blocks visibility.
    fn is_opaque(&self, cell: &Self::Cell) -> bool;

    /// Which renderers the cell needs.
    fn cell_shape(&self, cell: &Self::Cell) -> CellShape;

    /// Model renderer. Returns the materials it wrote to.
    fn render_cell(&self, cell: &Self::Cell, pose: &CellPose, sink: &mut dyn VertexSink)
        -> MaterialSet;

    /// Liquid renderer. Returns the materials it wrote to.
    fn render_liquid(
        &self,
        cell: &Self::Cell,
        pose: &CellPose,
        sink: &mut dyn VertexSink,
    ) -> MaterialSet;

    /// Auxiliary object attached to the cell, if any.
    fn auxiliary(&self, cell: &Self::Cell, pose: &CellPose) -> Option<AuxRenderable>;
}
