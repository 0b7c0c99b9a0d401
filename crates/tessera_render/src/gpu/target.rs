//! Render-facing cache of uploaded sections.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tessera_core::{Face, ResultHandle, ScratchArena, SectionPos, VisibilitySet};

use super::{GpuBackend, GpuBufferObject};
use crate::compiler::{CompiledSection, SectionArenas};
use crate::error::GpuError;
use crate::material::Material;
use crate::sorter::TransparencySortState;
use crate::world::AuxRenderable;

/// Upload counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Compiles and re-sorts uploaded.
    pub uploaded: u64,
    /// Uploads dropped because their target went away.
    pub discarded: u64,
    /// Bytes handed to the backend.
    pub bytes: u64,
}

/// Everything the frame renderer draws for one section.
pub struct GpuSection<B: GpuBackend> {
    layers: Vec<GpuBufferObject<B>>,
    visibility: VisibilitySet,
    sort_state: Option<Arc<TransparencySortState>>,
    global_renderables: Vec<AuxRenderable>,
    local_renderables: Vec<AuxRenderable>,
}

impl<B: GpuBackend> GpuSection<B> {
    fn new() -> Self {
        Self {
            layers: Vec::new(),
            visibility: VisibilitySet::all(),
            sort_state: None,
            global_renderables: Vec::new(),
            local_renderables: Vec::new(),
        }
    }

    /// Layers with geometry, in compile order.
    #[must_use]
    pub fn layers(&self) -> &[GpuBufferObject<B>] {
        &self.layers
    }

    /// Layer of `material`, if present.
    #[must_use]
    pub fn layer(&self, material: Material) -> Option<&GpuBufferObject<B>> {
        self.layers.iter().find(|l| l.material() == material)
    }

    /// Face visibility of the last upload.
    #[inline]
    #[must_use]
    pub const fn visibility(&self) -> VisibilitySet {
        self.visibility
    }

    /// Renderables drawn even when the section is culled.
    #[must_use]
    pub fn global_renderables(&self) -> &[AuxRenderable] {
        &self.global_renderables
    }

    /// Renderables drawn with the section.
    #[must_use]
    pub fn local_renderables(&self) -> &[AuxRenderable] {
        &self.local_renderables
    }

    fn release(self, backend: &mut B) {
        for layer in self.layers {
            layer.release(backend);
        }
    }
}

/// GPU-side section cache, owned by the render thread.
///
/// A section must be loaded before uploads for it are accepted; uploads for
/// sections that are not loaded are discarded.
pub struct RenderTarget<B: GpuBackend> {
    backend: B,
    render_thread: ThreadId,
    loaded: HashSet<SectionPos>,
    sections: HashMap<SectionPos, GpuSection<B>>,
    stats: UploadStats,
}

impl<B: GpuBackend> RenderTarget<B> {
    /// Creates a target; the calling thread becomes the render thread.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            render_thread: thread::current().id(),
            loaded: HashSet::new(),
            sections: HashMap::new(),
            stats: UploadStats::default(),
        }
    }

    /// Returns true on the thread that created the target.
    #[inline]
    #[must_use]
    pub fn is_render_thread(&self) -> bool {
        thread::current().id() == self.render_thread
    }

    /// The GPU backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Upload counters.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> UploadStats {
        self.stats
    }

    /// Accepts uploads for `section` from now on.
    pub fn load_section(&mut self, section: SectionPos) {
        self.loaded.insert(section);
    }

    /// Frees a section's GPU objects; later uploads for it are discarded.
    pub fn unload_section(&mut self, section: SectionPos) {
        self.loaded.remove(&section);
        if let Some(gpu) = self.sections.remove(&section) {
            gpu.release(&mut self.backend);
        }
    }

    /// Returns true if uploads for `section` are accepted.
    #[must_use]
    pub fn is_loaded(&self, section: SectionPos) -> bool {
        self.loaded.contains(&section)
    }

    /// Uploaded geometry of a section.
    #[must_use]
    pub fn section(&self, section: SectionPos) -> Option<&GpuSection<B>> {
        self.sections.get(&section)
    }

    /// Number of sections with uploaded data.
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Whether a view entering through `from` can leave through `to`.
    ///
    /// Sections never compiled hide nothing.
    #[must_use]
    pub fn faces_can_see(&self, section: SectionPos, from: Face, to: Face) -> bool {
        self.sections
            .get(&section)
            .map_or(true, |s| s.visibility.can_see(from, to))
    }

    /// Current sort state, for scheduling a re-sort.
    #[must_use]
    pub fn sort_state(&self, section: SectionPos) -> Option<Arc<TransparencySortState>> {
        self.sections.get(&section)?.sort_state.clone()
    }

    /// Replaces a section's geometry with a fresh compile.
    ///
    /// Returns `Ok(false)` if the section is not loaded. Every handle in
    /// `compiled` is given back to `arenas`, even on error.
    ///
    /// # Errors
    ///
    /// Fails when a device buffer cannot be created.
    pub fn install_compiled(
        &mut self,
        compiled: CompiledSection,
        arenas: &mut SectionArenas,
    ) -> Result<bool, GpuError> {
        debug_assert!(self.is_render_thread());
        let section = compiled.section;
        if !self.loaded.contains(&section) {
            self.stats.discarded += 1;
            tracing::warn!(?section, "section unloaded before upload, discarding");
            compiled.release(arenas);
            return Ok(false);
        }

        let Self {
            backend,
            sections,
            stats,
            ..
        } = self;
        let gpu = sections.entry(section).or_insert_with(GpuSection::new);

        let mut previous = std::mem::take(&mut gpu.layers);
        let mut result = Ok(());
        let CompiledSection {
            layers,
            visibility,
            sort_state,
            global_renderables,
            local_renderables,
            ..
        } = compiled;

        for layer in layers {
            let mut object = match previous.iter().position(|o| o.material() == layer.material) {
                Some(i) => previous.swap_remove(i),
                None => GpuBufferObject::new(layer.material),
            };
            let arena = arenas.get_mut(layer.material);
            if result.is_ok() {
                let vertices = arena.read(&layer.vertices);
                let indices = arena.read(&layer.indices);
                stats.bytes += (vertices.len() + indices.len()) as u64;
                result = object
                    .upload_vertices(backend, vertices, layer.vertex_count)
                    .and_then(|()| {
                        object.upload_indices(backend, indices, layer.index_count, layer.index_type)
                    });
            }
            for handle in [layer.vertices, layer.indices] {
                if let Err(err) = arena.release(handle) {
                    tracing::warn!(?section, %err, "releasing uploaded layer");
                }
            }
            gpu.layers.push(object);
        }
        for stale in previous {
            stale.release(backend);
        }

        gpu.visibility = visibility;
        gpu.sort_state = sort_state;
        gpu.global_renderables = global_renderables;
        gpu.local_renderables = local_renderables;

        result?;
        stats.uploaded += 1;
        Ok(true)
    }

    /// Replaces the translucent index buffer after a re-sort.
    ///
    /// Returns `Ok(false)` if the section was unloaded or recompiled since
    /// `sort_state` was taken. The handle is released either way.
    ///
    /// # Errors
    ///
    /// Fails when a device buffer cannot be created.
    pub fn install_resorted(
        &mut self,
        section: SectionPos,
        sort_state: &Arc<TransparencySortState>,
        indices: ResultHandle,
        arena: &mut ScratchArena,
    ) -> Result<bool, GpuError> {
        debug_assert!(self.is_render_thread());
        let current = self.loaded.contains(&section)
            && self
                .sections
                .get(&section)
                .and_then(|s| s.sort_state.as_ref())
                .is_some_and(|s| Arc::ptr_eq(s, sort_state));

        let result = if current {
            let Self {
                backend,
                sections,
                stats,
                ..
            } = self;
            let layer = sections
                .get_mut(&section)
                .and_then(|s| s.layers.iter_mut().find(|l| l.material() == Material::Translucent));
            match layer {
                Some(layer) => {
                    let bytes = arena.read(&indices);
                    stats.bytes += bytes.len() as u64;
                    #[allow(clippy::cast_possible_truncation)]
                    let index_count = (sort_state.quad_count() * 6) as u32;
                    layer
                        .upload_indices(backend, bytes, index_count, sort_state.index_type())
                        .map(|()| {
                            stats.uploaded += 1;
                            true
                        })
                }
                None => Ok(false),
            }
        } else {
            Ok(false)
        };

        if matches!(result, Ok(false)) {
            self.stats.discarded += 1;
            tracing::warn!(?section, "sort state superseded before upload, discarding");
        }
        if let Err(err) = arena.release(indices) {
            tracing::warn!(?section, %err, "releasing re-sorted indices");
        }
        result
    }

    /// Frees every section.
    pub fn clear(&mut self) {
        self.loaded.clear();
        for (_, gpu) in self.sections.drain() {
            gpu.release(&mut self.backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::MeshCompiler;
    use crate::dispatch::CancelToken;
    use crate::gpu::HeadlessBackend;
    use crate::grid::{GridBlock, GridWorld};
    use tessera_core::ArenaConfig;

    fn compile_one(world: &GridWorld, arenas: &mut SectionArenas) -> CompiledSection {
        MeshCompiler::new()
            .compile(world, SectionPos::default(), arenas, [0.0; 3], &CancelToken::new())
            .unwrap()
    }

    fn world_with(block: GridBlock) -> GridWorld {
        let world = GridWorld::new();
        world.load_section(SectionPos::default());
        world.set_block(2, 2, 2, block);
        world
    }

    #[test]
    fn test_install_uploads_and_releases_handles() {
        let world = world_with(GridBlock::Solid);
        let mut arenas = SectionArenas::new(ArenaConfig::default());
        let mut target = RenderTarget::new(HeadlessBackend::new());
        target.load_section(SectionPos::default());

        let compiled = compile_one(&world, &mut arenas);
        assert!(target.install_compiled(compiled, &mut arenas).unwrap());
        assert_eq!(arenas.outstanding_claims(), 0);

        let gpu = target.section(SectionPos::default()).unwrap();
        let layer = gpu.layer(Material::Solid).unwrap();
        assert_eq!(layer.vertex_count(), 24);
        assert_eq!(layer.index_count(), 36);
        assert_eq!(target.stats().uploaded, 1);
    }

    #[test]
    fn test_unloaded_section_discards() {
        let world = world_with(GridBlock::Solid);
        let mut arenas = SectionArenas::new(ArenaConfig::default());
        let mut target = RenderTarget::new(HeadlessBackend::new());

        let compiled = compile_one(&world, &mut arenas);
        assert!(!target.install_compiled(compiled, &mut arenas).unwrap());
        assert_eq!(arenas.outstanding_claims(), 0);
        assert_eq!(target.stats().discarded, 1);
        assert_eq!(target.backend().live_buffers(), 0);
    }

    #[test]
    fn test_recompile_drops_vanished_layers() {
        let mut arenas = SectionArenas::new(ArenaConfig::default());
        let mut target = RenderTarget::new(HeadlessBackend::new());
        target.load_section(SectionPos::default());

        let solid = compile_one(&world_with(GridBlock::Solid), &mut arenas);
        target.install_compiled(solid, &mut arenas).unwrap();
        assert_eq!(target.backend().live_buffers(), 2);

        let glass = compile_one(&world_with(GridBlock::Cutout), &mut arenas);
        target.install_compiled(glass, &mut arenas).unwrap();

        let gpu = target.section(SectionPos::default()).unwrap();
        assert!(gpu.layer(Material::Solid).is_none());
        assert!(gpu.layer(Material::Cutout).is_some());
        assert_eq!(target.backend().live_buffers(), 2);

        target.unload_section(SectionPos::default());
        assert_eq!(target.backend().live_buffers(), 0);
    }

    #[test]
    fn test_gpu_failure_still_releases_handles() {
        let world = world_with(GridBlock::Solid);
        let mut arenas = SectionArenas::new(ArenaConfig::default());
        let mut target = RenderTarget::new(HeadlessBackend::with_max_buffer_size(16));
        target.load_section(SectionPos::default());

        let compiled = compile_one(&world, &mut arenas);
        assert!(target.install_compiled(compiled, &mut arenas).is_err());
        assert_eq!(arenas.outstanding_claims(), 0);
    }

    #[test]
    fn test_stale_resort_discarded() {
        let world = world_with(GridBlock::Translucent);
        let mut arenas = SectionArenas::new(ArenaConfig::default());
        let mut target = RenderTarget::new(HeadlessBackend::new());
        target.load_section(SectionPos::default());

        let compiled = compile_one(&world, &mut arenas);
        let old_state = compiled.sort_state.clone().unwrap();
        target.install_compiled(compiled, &mut arenas).unwrap();

        let recompiled = compile_one(&world, &mut arenas);
        target.install_compiled(recompiled, &mut arenas).unwrap();

        let arena = arenas.get_mut(Material::Translucent);
        let handle = old_state
            .resort(&mut crate::sorter::TransparencySorter::new(), [9.0; 3], arena)
            .unwrap();
        let installed = target
            .install_resorted(SectionPos::default(), &old_state, handle, arena)
            .unwrap();

        assert!(!installed);
        assert_eq!(target.stats().discarded, 1);
        assert_eq!(arena.outstanding_claims(), 0);
    }

    #[test]
    fn test_faces_default_visible() {
        let target = RenderTarget::new(HeadlessBackend::new());
        assert!(target.faces_can_see(SectionPos::new(5, 5, 5), Face::Up, Face::Down));
    }
}
