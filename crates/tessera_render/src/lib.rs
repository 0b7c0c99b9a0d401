//! # TESSERA Render
//!
//! Compiles voxel world sections into GPU geometry off the render thread:
//! - Per-material vertex and index batches written into scratch arenas
//! - Back-to-front index order for translucent quads, re-sortable later
//! - Device buffers reused across recompiles
//! - A dispatcher with fair priority queues and a bounded arena pool
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    SECTION PIPELINE                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  WorldQuery → MeshCompiler → SectionArenas → UploadQueue     │
//! │                    ↓                              ↓          │
//! │           VisibilityGraph              RenderTarget (GPU)    │
//! │                    ↓                              ↓          │
//! │           TransparencySorter  ←──── re-sort ── camera moves  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - Workers read the world and write arenas, nothing else
//! - The render thread is the only one touching GPU objects
//! - Cancellation and missing world data are never errors

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod compiler;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gpu;
pub mod grid;
pub mod material;
pub mod sorter;
pub mod vertex;
pub mod world;

pub use compiler::{CompileInterrupt, CompiledSection, LayerMesh, MeshCompiler, SectionArenas};
pub use config::PipelineConfig;
pub use dispatch::{CancelToken, Dispatcher, DispatcherStats};
pub use error::{GpuError, MeshError, MeshResult};
pub use gpu::{
    BufferKind, GpuBackend, GpuBufferObject, GpuSection, HeadlessBackend, RenderTarget,
    UploadStats, WgpuBackend,
};
pub use grid::{GridBlock, GridWorld};
pub use material::{Material, MaterialSet};
pub use sorter::{TransparencySortState, TransparencySorter};
pub use vertex::{IndexType, SectionVertex};
pub use world::{AuxRenderable, CellPose, CellShape, SectionStatus, VertexSink, WorldQuery};
