//! # Section Mesh Compiler
//!
//! Turns one section of the world into per-material vertex and index
//! batches inside a pack of scratch arenas.
//!
//! ## Output
//!
//! - One layer per material that received vertices, in first-touch order
//! - The section's face visibility
//! - A sort state when translucent geometry was written
//! - Auxiliary renderables split into global and local
//!
//! Nothing here touches the GPU; the batches are uploaded later on the
//! render thread.

use std::sync::Arc;
use std::time::Instant;

use tessera_core::{
    ArenaConfig, LocalPos, ResultHandle, ScratchArena, SectionPos, VisibilityGraph, VisibilitySet,
};

use crate::dispatch::CancelToken;
use crate::material::{Material, MaterialSet};
use crate::sorter::{distance_key, TransparencySortState, TransparencySorter};
use crate::vertex::{IndexType, SectionVertex};
use crate::world::{AuxRenderable, CellPose, SectionStatus, VertexSink, WorldQuery};

/// Cells walked between two cancellation checks (one horizontal layer).
const CANCEL_CHECK_INTERVAL: usize = 256;

// =============================================================================
// ARENA PACK
// =============================================================================

/// One scratch arena per material; the unit lent out by the arena pool.
#[derive(Debug)]
pub struct SectionArenas {
    arenas: [ScratchArena; Material::COUNT],
}

impl SectionArenas {
    /// Creates a pack of empty arenas.
    #[must_use]
    pub fn new(config: ArenaConfig) -> Self {
        Self {
            arenas: std::array::from_fn(|_| ScratchArena::new(config)),
        }
    }

    /// Arena holding `material`'s batches.
    #[inline]
    #[must_use]
    pub fn get(&self, material: Material) -> &ScratchArena {
        &self.arenas[material.index()]
    }

    /// Mutable arena for `material`.
    #[inline]
    pub fn get_mut(&mut self, material: Material) -> &mut ScratchArena {
        &mut self.arenas[material.index()]
    }

    /// Claims still held across all arenas.
    #[must_use]
    pub fn outstanding_claims(&self) -> u32 {
        self.arenas.iter().map(ScratchArena::outstanding_claims).sum()
    }

    /// Readies the pack for reuse after a successful upload.
    ///
    /// Every handle should have been released by then; leftovers are logged
    /// and dropped.
    pub fn clear_all(&mut self) {
        let leaked = self.outstanding_claims();
        if leaked > 0 {
            tracing::warn!(leaked, "arena pack returned with outstanding claims");
        }
        for arena in &mut self.arenas {
            if arena.outstanding_claims() > 0 || arena.unsealed_len() > 0 {
                arena.discard_all();
            }
        }
    }

    /// Drops all work after a cancelled or failed task.
    pub fn discard_all(&mut self) {
        for arena in &mut self.arenas {
            arena.discard_all();
        }
    }
}

// =============================================================================
// COMPILED OUTPUT
// =============================================================================

/// Finished geometry of one material.
#[derive(Debug)]
pub struct LayerMesh {
    /// Material the geometry belongs to.
    pub material: Material,
    /// Vertex batch in the material's arena.
    pub vertices: ResultHandle,
    /// Index batch in the material's arena.
    pub indices: ResultHandle,
    /// Number of vertices.
    pub vertex_count: u32,
    /// Number of indices.
    pub index_count: u32,
    /// Index element width.
    pub index_type: IndexType,
}

/// Compiler output for one section.
#[derive(Debug)]
pub struct CompiledSection {
    /// Section compiled.
    pub section: SectionPos,
    /// Layers with geometry, in first-touch order.
    pub layers: Vec<LayerMesh>,
    /// Face-to-face visibility.
    pub visibility: VisibilitySet,
    /// Present when translucent geometry was written.
    pub sort_state: Option<Arc<TransparencySortState>>,
    /// Renderables drawn even when the section is culled.
    pub global_renderables: Vec<AuxRenderable>,
    /// Renderables drawn with the section.
    pub local_renderables: Vec<AuxRenderable>,
}

impl CompiledSection {
    /// A section with no geometry that hides nothing behind it.
    #[must_use]
    pub fn empty(section: SectionPos) -> Self {
        Self {
            section,
            layers: Vec::new(),
            visibility: VisibilitySet::all(),
            sort_state: None,
            global_renderables: Vec::new(),
            local_renderables: Vec::new(),
        }
    }

    /// Returns true if there is no geometry.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Layer of `material`, if it has geometry.
    #[must_use]
    pub fn layer(&self, material: Material) -> Option<&LayerMesh> {
        self.layers.iter().find(|l| l.material == material)
    }

    /// Gives every handle back to its arena.
    pub fn release(self, arenas: &mut SectionArenas) {
        for layer in self.layers {
            let arena = arenas.get_mut(layer.material);
            for handle in [layer.vertices, layer.indices] {
                if let Err(err) = arena.release(handle) {
                    tracing::warn!(section = ?self.section, %err, "releasing compiled layer");
                }
            }
        }
    }
}

/// Why a compile stopped early. Neither case is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileInterrupt {
    /// The task was cancelled.
    Cancelled,
    /// The section was unloaded mid-walk.
    SectionVanished,
}

// =============================================================================
// LAYER WRITER
// =============================================================================

/// Vertex sink that streams into the pack, one arena per material.
struct LayerWriter<'a> {
    arenas: &'a mut SectionArenas,
    /// Materials in the order they first received a vertex.
    order: Vec<Material>,
    vertex_counts: [u32; Material::COUNT],
    /// One centroid per completed translucent quad.
    centroids: Vec<[f32; 3]>,
    quad_sum: [f32; 3],
}

impl<'a> LayerWriter<'a> {
    fn new(arenas: &'a mut SectionArenas) -> Self {
        Self {
            arenas,
            order: Vec::with_capacity(Material::COUNT),
            vertex_counts: [0; Material::COUNT],
            centroids: Vec::new(),
            quad_sum: [0.0; 3],
        }
    }
}

impl VertexSink for LayerWriter<'_> {
    fn vertex(&mut self, material: Material, vertex: SectionVertex) {
        let count = &mut self.vertex_counts[material.index()];
        if *count == 0 {
            self.order.push(material);
        }
        *count += 1;
        let completes_quad = *count % 4 == 0;

        self.arenas.get_mut(material).write_pod(&vertex);

        if material.needs_sorting() {
            for (sum, p) in self.quad_sum.iter_mut().zip(vertex.position) {
                *sum += p;
            }
            if completes_quad {
                self.centroids.push(self.quad_sum.map(|s| s / 4.0));
                self.quad_sum = [0.0; 3];
            }
        }
    }
}

// =============================================================================
// MESH COMPILER
// =============================================================================

/// Compiles sections. One per worker; holds the sorter's scratch space.
#[derive(Debug, Default)]
pub struct MeshCompiler {
    sorter: TransparencySorter,
}

impl MeshCompiler {
    /// Creates a compiler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The sorter, for re-sort tasks run on the same worker.
    pub fn sorter_mut(&mut self) -> &mut TransparencySorter {
        &mut self.sorter
    }

    /// Compiles `section` into `arenas`.
    ///
    /// A missing section yields [`CompiledSection::empty`]. Missing
    /// neighbours only reduce face culling.
    ///
    /// # Errors
    ///
    /// Returns a [`CompileInterrupt`] when cancelled or when the section
    /// disappears mid-walk. The caller discards the arenas in both cases.
    pub fn compile<W: WorldQuery>(
        &mut self,
        world: &W,
        section: SectionPos,
        arenas: &mut SectionArenas,
        camera: [f32; 3],
        cancel: &CancelToken,
    ) -> Result<CompiledSection, CompileInterrupt> {
        let start = Instant::now();

        let status = world.section_status(section);
        if cancel.is_cancelled() {
            return Err(CompileInterrupt::Cancelled);
        }
        let neighbors_complete = match status {
            SectionStatus::Missing => return Ok(CompiledSection::empty(section)),
            SectionStatus::Partial => false,
            SectionStatus::Ready => true,
        };

        let mut graph = VisibilityGraph::new();
        let mut global_renderables = Vec::new();
        let mut local_renderables = Vec::new();
        let mut writer = LayerWriter::new(arenas);
        // Materials the renderers claim; must agree with what the sink saw.
        let mut reported = MaterialSet::EMPTY;

        for local in LocalPos::all() {
            if local.index() % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(CompileInterrupt::Cancelled);
            }
            let cell = world
                .get_cell_content(section, local)
                .ok_or(CompileInterrupt::SectionVanished)?;

            if world.is_opaque(&cell) {
                graph.mark_opaque(local);
            }

            let pose = CellPose {
                section,
                local,
                neighbors_complete,
            };
            let shape = world.cell_shape(&cell);
            if shape.has_liquid() {
                reported = reported.union(world.render_liquid(&cell, &pose, &mut writer));
            }
            if shape.has_model() {
                reported = reported.union(world.render_cell(&cell, &pose, &mut writer));
            }
            if let Some(aux) = world.auxiliary(&cell, &pose) {
                if aux.global {
                    global_renderables.push(aux);
                } else {
                    local_renderables.push(aux);
                }
            }
        }

        let LayerWriter {
            arenas,
            order,
            vertex_counts,
            mut centroids,
            ..
        } = writer;
        debug_assert_eq!(
            reported,
            order.iter().copied().collect::<MaterialSet>(),
            "renderers reported materials they did not write"
        );

        let mut compiled = CompiledSection {
            section,
            layers: Vec::with_capacity(order.len()),
            visibility: graph.resolve(),
            sort_state: None,
            global_renderables,
            local_renderables,
        };

        for material in order {
            let vertex_count = vertex_counts[material.index()];
            let arena = arenas.get_mut(material);
            let Some(vertices) = arena.seal() else {
                continue;
            };
            if vertex_count % 4 != 0 {
                tracing::warn!(?section, ?material, vertex_count, "incomplete quad dropped");
            }

            let quads = (vertex_count / 4) as usize;
            let (indices, index_type) = if material.needs_sorting() {
                let state = TransparencySortState::new(section, std::mem::take(&mut centroids));
                let permutation = self
                    .sorter
                    .sort(state.centroids(), distance_key(section.relative(camera)));
                let index_type = state.index_type();
                compiled.sort_state = Some(Arc::new(state));
                (
                    TransparencySorter::rebuild_index_buffer(&permutation, arena, index_type),
                    index_type,
                )
            } else {
                #[allow(clippy::cast_possible_truncation)]
                let sequential: Vec<u32> = (0..quads as u32).collect();
                let index_type = IndexType::for_index_count(quads * 6);
                (
                    TransparencySorter::rebuild_index_buffer(&sequential, arena, index_type),
                    index_type,
                )
            };

            let Some(indices) = indices else {
                // Fewer than four vertices: nothing drawable.
                if let Err(err) = arena.release(vertices) {
                    tracing::warn!(?section, %err, "releasing undrawable layer");
                }
                continue;
            };

            #[allow(clippy::cast_possible_truncation)]
            compiled.layers.push(LayerMesh {
                material,
                vertices,
                indices,
                vertex_count,
                index_count: (quads * 6) as u32,
                index_type,
            });
        }

        tracing::trace!(
            ?section,
            layers = compiled.layers.len(),
            visibility = ?compiled.visibility,
            elapsed_us = start.elapsed().as_micros() as u64,
            "section compiled"
        );
        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridBlock, GridCell, GridWorld};
    use crate::sorter::decode_indices;
    use crate::world::CellShape;
    use tessera_core::{Face, SectionPos};

    /// Grid world whose model renderer reports nothing.
    struct SilentRenderer(GridWorld);

    impl WorldQuery for SilentRenderer {
        type Cell = GridCell;

        fn section_status(&self, section: SectionPos) -> SectionStatus {
            self.0.section_status(section)
        }

        fn get_cell_content(&self, section: SectionPos, local: LocalPos) -> Option<GridCell> {
            self.0.get_cell_content(section, local)
        }

        fn is_opaque(&self, cell: &GridCell) -> bool {
            self.0.is_opaque(cell)
        }

        fn cell_shape(&self, cell: &GridCell) -> CellShape {
            self.0.cell_shape(cell)
        }

        fn render_cell(
            &self,
            cell: &GridCell,
            pose: &CellPose,
            sink: &mut dyn VertexSink,
        ) -> MaterialSet {
            self.0.render_cell(cell, pose, sink);
            MaterialSet::EMPTY
        }

        fn render_liquid(
            &self,
            cell: &GridCell,
            pose: &CellPose,
            sink: &mut dyn VertexSink,
        ) -> MaterialSet {
            self.0.render_liquid(cell, pose, sink)
        }

        fn auxiliary(&self, cell: &GridCell, pose: &CellPose) -> Option<AuxRenderable> {
            self.0.auxiliary(cell, pose)
        }
    }

    fn small_pack() -> SectionArenas {
        SectionArenas::new(ArenaConfig {
            initial_capacity: 4096,
            max_growth_step: 64 * 1024,
        })
    }

    #[test]
    fn test_missing_section_is_empty() {
        let world = GridWorld::new();
        let mut arenas = small_pack();
        let compiled = MeshCompiler::new()
            .compile(&world, SectionPos::default(), &mut arenas, [0.0; 3], &CancelToken::new())
            .unwrap();
        assert!(compiled.is_empty());
        assert!(compiled.visibility.is_all());
        assert_eq!(arenas.outstanding_claims(), 0);
    }

    #[test]
    fn test_single_cube() {
        let world = GridWorld::new();
        let pos = SectionPos::default();
        world.load_section(pos);
        world.set_block(4, 4, 4, GridBlock::Solid);

        let mut arenas = small_pack();
        let compiled = MeshCompiler::new()
            .compile(&world, pos, &mut arenas, [0.0; 3], &CancelToken::new())
            .unwrap();

        assert_eq!(compiled.layers.len(), 1);
        let layer = compiled.layer(Material::Solid).unwrap();
        assert_eq!(layer.vertex_count, 24);
        assert_eq!(layer.index_count, 36);
        assert_eq!(layer.index_type, IndexType::U16);
        assert_eq!(
            arenas.get(Material::Solid).read(&layer.vertices).len(),
            24 * SectionVertex::SIZE
        );
        assert!(compiled.sort_state.is_none());
        assert!(compiled.visibility.is_all());

        compiled.release(&mut arenas);
        assert_eq!(arenas.outstanding_claims(), 0);
    }

    #[test]
    fn test_first_touch_order_and_sparse_output() {
        let world = GridWorld::new();
        let pos = SectionPos::default();
        world.load_section(pos);
        // Index order walks x, then z, then y: the cutout block comes first.
        world.set_block(1, 0, 0, GridBlock::Cutout);
        world.set_block(3, 0, 0, GridBlock::Solid);

        let mut arenas = small_pack();
        let compiled = MeshCompiler::new()
            .compile(&world, pos, &mut arenas, [0.0; 3], &CancelToken::new())
            .unwrap();

        let materials: Vec<_> = compiled.layers.iter().map(|l| l.material).collect();
        assert_eq!(materials, vec![Material::Cutout, Material::Solid]);
        assert!(compiled.layer(Material::Translucent).is_none());
        compiled.release(&mut arenas);
    }

    #[test]
    fn test_translucent_sorted_back_to_front() {
        let world = GridWorld::new();
        let pos = SectionPos::default();
        world.load_section(pos);
        world.set_block(0, 0, 0, GridBlock::Translucent);
        world.set_block(10, 0, 0, GridBlock::Translucent);

        let mut arenas = small_pack();
        let compiled = MeshCompiler::new()
            .compile(&world, pos, &mut arenas, [-50.0, 0.5, 0.5], &CancelToken::new())
            .unwrap();

        let state = compiled.sort_state.as_ref().unwrap();
        assert_eq!(state.quad_count(), 12);

        let layer = compiled.layer(Material::Translucent).unwrap();
        let indices = decode_indices(
            arenas.get(Material::Translucent).read(&layer.indices),
            layer.index_type,
        );
        // The first quad drawn belongs to the far cube (vertices 24..48).
        assert!(indices[0] >= 24, "first index {} is from the near cube", indices[0]);
        compiled.release(&mut arenas);
    }

    #[test]
    fn test_tunnel_visibility_and_auxiliaries() {
        let world = GridWorld::new();
        let pos = SectionPos::default();
        world.fill_section(pos, |p| {
            if p.y == 8 && p.z == 8 {
                if p.x == 3 {
                    GridBlock::Chest
                } else if p.x == 5 {
                    GridBlock::Beacon
                } else {
                    GridBlock::Air
                }
            } else {
                GridBlock::Solid
            }
        });

        let mut arenas = small_pack();
        let compiled = MeshCompiler::new()
            .compile(&world, pos, &mut arenas, [0.0; 3], &CancelToken::new())
            .unwrap();

        let pairs: Vec<_> = compiled.visibility.visible_pairs().collect();
        assert_eq!(pairs, vec![(Face::West, Face::East)]);
        assert_eq!(compiled.local_renderables.len(), 1);
        assert_eq!(compiled.global_renderables.len(), 1);
        compiled.release(&mut arenas);
    }

    #[test]
    fn test_cancelled_before_walk() {
        let world = GridWorld::new();
        world.load_section(SectionPos::default());
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut arenas = small_pack();
        let result = MeshCompiler::new().compile(
            &world,
            SectionPos::default(),
            &mut arenas,
            [0.0; 3],
            &cancel,
        );
        assert_eq!(result.unwrap_err(), CompileInterrupt::Cancelled);
    }

    #[test]
    fn test_discard_after_partial_write() {
        let mut arenas = small_pack();
        let mut writer = LayerWriter::new(&mut arenas);
        for _ in 0..6 {
            writer.vertex(Material::Solid, SectionVertex::default());
        }
        drop(writer);

        arenas.discard_all();
        assert_eq!(arenas.get(Material::Solid).written(), 0);
    }

    #[test]
    fn test_reported_materials_match_layers() {
        let world = GridWorld::new();
        let pos = SectionPos::default();
        world.load_section(pos);
        world.set_block(2, 2, 2, GridBlock::Solid);
        world.set_block(5, 5, 5, GridBlock::Water);
        world.set_block(9, 9, 9, GridBlock::Cutout);

        let mut arenas = small_pack();
        let compiled = MeshCompiler::new()
            .compile(&world, pos, &mut arenas, [0.0; 3], &CancelToken::new())
            .unwrap();
        let materials: MaterialSet = compiled.layers.iter().map(|l| l.material).collect();
        assert_eq!(
            materials,
            [Material::Solid, Material::Translucent, Material::Cutout]
                .into_iter()
                .collect()
        );
        compiled.release(&mut arenas);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "renderers reported materials they did not write")]
    fn test_unreported_material_is_caught() {
        let world = SilentRenderer(GridWorld::new());
        let pos = SectionPos::default();
        world.0.load_section(pos);
        world.0.set_block(4, 4, 4, GridBlock::Solid);

        let mut arenas = small_pack();
        let _ = MeshCompiler::new()
            .compile(&world, pos, &mut arenas, [0.0; 3], &CancelToken::new());
    }
}
