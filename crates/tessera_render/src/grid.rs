//! Reference grid world.
//!
//! An in-memory [`WorldQuery`] over a handful of block kinds, used by the
//! soak binary, the benchmarks and the integration tests.

use parking_lot::RwLock;
use std::collections::HashMap;

use tessera_core::{Face, LocalPos, SectionPos, SECTION_SIZE, SECTION_VOLUME};

use crate::material::{Material, MaterialSet};
use crate::vertex::SectionVertex;
use crate::world::{AuxRenderable, CellPose, CellShape, SectionStatus, VertexSink, WorldQuery};

/// Pre-allocated hash map capacity.
const MAX_LOADED_SECTIONS: usize = 4096;

/// Full brightness for block and sky light.
const FULL_LIGHT: u32 = 15 | 15 << 16;

/// Height of a water surface with nothing above it.
const WATER_SURFACE: f32 = 0.875;

/// Auxiliary kind tag for chests.
pub const AUX_CHEST: u32 = 1;
/// Auxiliary kind tag for beacon beams.
pub const AUX_BEACON: u32 = 2;

/// Unit-cube corners per face, counter-clockwise seen from outside.
const FACE_CORNERS: [[[f32; 3]; 4]; 6] = [
    // Down
    [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
    // Up
    [[0.0, 1.0, 0.0], [0.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 0.0]],
    // North
    [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0], [1.0, 0.0, 0.0]],
    // South
    [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0], [0.0, 1.0, 1.0]],
    // West
    [[0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 1.0], [0.0, 1.0, 0.0]],
    // East
    [[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 1.0, 1.0], [1.0, 0.0, 1.0]],
];

const FACE_UVS: [[f32; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];

/// Block kinds of the grid world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum GridBlock {
    /// Empty.
    #[default]
    Air,
    /// Opaque full cube.
    Solid,
    /// Alpha-tested full cube (glass).
    Cutout,
    /// Alpha-blended full cube (stained glass).
    Translucent,
    /// Liquid.
    Water,
    /// Drawn by its own renderer, local to the section.
    Chest,
    /// Cutout cube plus a beam that is visible from far away.
    Beacon,
}

impl GridBlock {
    /// Returns true if this block is air.
    #[inline]
    #[must_use]
    pub const fn is_air(self) -> bool {
        matches!(self, Self::Air)
    }

    /// Returns true if this block hides every face behind it.
    #[inline]
    #[must_use]
    pub const fn is_opaque(self) -> bool {
        matches!(self, Self::Solid)
    }

    /// Material of the block's cube faces.
    #[must_use]
    pub const fn material(self) -> Option<Material> {
        match self {
            Self::Solid => Some(Material::Solid),
            Self::Cutout | Self::Beacon => Some(Material::Cutout),
            Self::Translucent | Self::Water => Some(Material::Translucent),
            Self::Air | Self::Chest => None,
        }
    }

    /// RGBA8 tint.
    #[must_use]
    pub const fn color(self) -> u32 {
        match self {
            Self::Solid => 0xFF80_8080,
            Self::Cutout => 0xFFFF_FFFF,
            Self::Translucent => 0x80C0_4040,
            Self::Water => 0xB0FF_6030,
            Self::Beacon => 0xFFFF_E0A0,
            Self::Air | Self::Chest => 0,
        }
    }

    /// Whether a face of `self` next to `neighbor` is hidden.
    ///
    /// `None` means the neighbour is unknown and the face is drawn.
    #[must_use]
    pub fn face_hidden_by(self, neighbor: Option<Self>) -> bool {
        match neighbor {
            Some(Self::Solid) => true,
            Some(other) => other == self && !matches!(self, Self::Beacon),
            None => false,
        }
    }
}

/// A cell snapshot: the block and its six neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridCell {
    /// The block in the cell.
    pub block: GridBlock,
    /// Neighbours in [`Face`] order, `None` where the neighbour section is
    /// not loaded.
    pub neighbors: [Option<GridBlock>; 6],
}

/// One 16x16x16 section of blocks.
#[derive(Clone)]
struct GridSection {
    /// Layout: `blocks[LocalPos::index()]`.
    blocks: Box<[GridBlock]>,
    /// Number of non-air blocks (for quick empty checks).
    non_air: u32,
}

impl GridSection {
    fn new() -> Self {
        Self {
            blocks: vec![GridBlock::Air; SECTION_VOLUME].into_boxed_slice(),
            non_air: 0,
        }
    }

    #[inline]
    fn get(&self, local: LocalPos) -> GridBlock {
        self.blocks[local.index()]
    }

    fn set(&mut self, local: LocalPos, block: GridBlock) {
        let index = local.index();
        match (self.blocks[index].is_air(), block.is_air()) {
            (true, false) => self.non_air += 1,
            (false, true) => self.non_air -= 1,
            _ => {}
        }
        self.blocks[index] = block;
    }
}

/// Grid world containing multiple sections.
///
/// Thread-safe for concurrent read access from compile workers while game
/// logic writes updates.
pub struct GridWorld {
    /// Sections indexed by coordinate.
    sections: RwLock<HashMap<SectionPos, GridSection>>,

    /// Sections that need recompiling.
    dirty_sections: RwLock<Vec<SectionPos>>,
}

impl GridWorld {
    /// Creates a new empty world.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sections: RwLock::new(HashMap::with_capacity(MAX_LOADED_SECTIONS)),
            dirty_sections: RwLock::new(Vec::with_capacity(256)),
        }
    }

    /// Loads an all-air section.
    ///
    /// Returns true if the section was newly created.
    pub fn load_section(&self, pos: SectionPos) -> bool {
        let mut sections = self.sections.write();
        if sections.contains_key(&pos) {
            return false;
        }
        sections.insert(pos, GridSection::new());
        self.mark_dirty(pos);
        true
    }

    /// Loads a section whose blocks are produced by `fill`, replacing any
    /// existing one.
    pub fn fill_section(&self, pos: SectionPos, mut fill: impl FnMut(LocalPos) -> GridBlock) {
        let mut section = GridSection::new();
        for local in LocalPos::all() {
            section.set(local, fill(local));
        }
        self.sections.write().insert(pos, section);
        self.mark_dirty(pos);
    }

    /// Unloads a section. Returns true if it was loaded.
    pub fn unload_section(&self, pos: SectionPos) -> bool {
        self.sections.write().remove(&pos).is_some()
    }

    /// Returns true if the section is loaded.
    #[must_use]
    pub fn is_loaded(&self, pos: SectionPos) -> bool {
        self.sections.read().contains_key(&pos)
    }

    /// Sets a block at world coordinates.
    ///
    /// Marks the containing section dirty, plus the neighbour across any
    /// section face the block touches. Does nothing if the section is not
    /// loaded.
    pub fn set_block(&self, x: i32, y: i32, z: i32, block: GridBlock) {
        let pos = SectionPos::from_block(x, y, z);
        let local = local_of(x, y, z);

        let mut sections = self.sections.write();
        let Some(section) = sections.get_mut(&pos) else {
            return;
        };
        section.set(local, block);
        drop(sections);

        self.mark_dirty(pos);
        let faces = local.boundary_faces();
        for face in Face::ALL.into_iter().filter(|f| faces & f.bit() != 0) {
            if self.is_loaded(pos.neighbor(face)) {
                self.mark_dirty(pos.neighbor(face));
            }
        }
    }

    /// Gets a block at world coordinates. Unloaded sections read as air.
    #[must_use]
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> GridBlock {
        let pos = SectionPos::from_block(x, y, z);
        self.sections
            .read()
            .get(&pos)
            .map_or(GridBlock::Air, |s| s.get(local_of(x, y, z)))
    }

    /// Number of non-air blocks in a section, or `None` if not loaded.
    #[must_use]
    pub fn non_air_count(&self, pos: SectionPos) -> Option<u32> {
        self.sections.read().get(&pos).map(|s| s.non_air)
    }

    /// Returns and clears the list of dirty sections.
    pub fn take_dirty_sections(&self) -> Vec<SectionPos> {
        std::mem::take(&mut *self.dirty_sections.write())
    }

    /// Returns the number of loaded sections.
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.read().len()
    }

    fn mark_dirty(&self, pos: SectionPos) {
        let mut dirty = self.dirty_sections.write();
        if !dirty.contains(&pos) {
            dirty.push(pos);
        }
    }
}

impl Default for GridWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldQuery for GridWorld {
    type Cell = GridCell;

    fn section_status(&self, section: SectionPos) -> SectionStatus {
        let sections = self.sections.read();
        if !sections.contains_key(&section) {
            SectionStatus::Missing
        } else if Face::ALL
            .into_iter()
            .all(|f| sections.contains_key(&section.neighbor(f)))
        {
            SectionStatus::Ready
        } else {
            SectionStatus::Partial
        }
    }

    fn get_cell_content(&self, section: SectionPos, local: LocalPos) -> Option<GridCell> {
        let sections = self.sections.read();
        let block = sections.get(&section)?.get(local);
        let neighbors = Face::ALL.map(|face| match local.offset(face) {
            Some(next) => sections.get(&section).map(|s| s.get(next)),
            None => sections
                .get(&section.neighbor(face))
                .map(|s| s.get(wrap_across(local, face))),
        });
        Some(GridCell { block, neighbors })
    }

    fn is_opaque(&self, cell: &GridCell) -> bool {
        cell.block.is_opaque()
    }

    fn cell_shape(&self, cell: &GridCell) -> CellShape {
        match cell.block {
            GridBlock::Air | GridBlock::Chest => CellShape::Empty,
            GridBlock::Water => CellShape::Liquid,
            GridBlock::Solid | GridBlock::Cutout | GridBlock::Translucent | GridBlock::Beacon => {
                CellShape::Model
            }
        }
    }

    fn render_cell(
        &self,
        cell: &GridCell,
        pose: &CellPose,
        sink: &mut dyn VertexSink,
    ) -> MaterialSet {
        let Some(material) = cell.block.material() else {
            return MaterialSet::EMPTY;
        };
        let mut written = MaterialSet::EMPTY;
        for face in Face::ALL {
            if cell.block.face_hidden_by(cell.neighbors[face.index()]) {
                continue;
            }
            emit_face(sink, material, cell.block.color(), pose.local, face, 1.0);
            written.insert(material);
        }
        written
    }

    fn render_liquid(
        &self,
        cell: &GridCell,
        pose: &CellPose,
        sink: &mut dyn VertexSink,
    ) -> MaterialSet {
        let covered = cell.neighbors[Face::Up.index()] == Some(GridBlock::Water);
        let height = if covered { 1.0 } else { WATER_SURFACE };
        let mut written = MaterialSet::EMPTY;
        for face in Face::ALL {
            if cell.block.face_hidden_by(cell.neighbors[face.index()]) {
                continue;
            }
            emit_face(sink, Material::Translucent, cell.block.color(), pose.local, face, height);
            written.insert(Material::Translucent);
        }
        written
    }

    fn auxiliary(&self, cell: &GridCell, pose: &CellPose) -> Option<AuxRenderable> {
        let (kind, global) = match cell.block {
            GridBlock::Chest => (AUX_CHEST, false),
            GridBlock::Beacon => (AUX_BEACON, true),
            _ => return None,
        };
        Some(AuxRenderable {
            local: pose.local,
            kind,
            global,
        })
    }
}

/// Writes one quad for `face` of the cell at `local`, with the top of the
/// cube at `height`.
fn emit_face(
    sink: &mut dyn VertexSink,
    material: Material,
    color: u32,
    local: LocalPos,
    face: Face,
    height: f32,
) {
    let origin = local.as_f32();
    let normal = SectionVertex::pack_normal(face.normal());
    for (corner, uv) in FACE_CORNERS[face.index()].iter().zip(FACE_UVS) {
        sink.vertex(
            material,
            SectionVertex {
                position: [
                    origin[0] + corner[0],
                    origin[1] + corner[1] * height,
                    origin[2] + corner[2],
                ],
                color,
                uv,
                light: FULL_LIGHT,
                normal,
            },
        );
    }
}

/// Local position inside a section of a world cell.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn local_of(x: i32, y: i32, z: i32) -> LocalPos {
    let size = SECTION_SIZE as i32;
    LocalPos::from_index(
        x.rem_euclid(size) as usize
            | (z.rem_euclid(size) as usize) << 4
            | (y.rem_euclid(size) as usize) << 8,
    )
}

/// The cell on the far side of `face` when `local` sits on that face.
fn wrap_across(local: LocalPos, face: Face) -> LocalPos {
    const MAX: u8 = (SECTION_SIZE - 1) as u8;
    let mut next = local;
    match face {
        Face::Down => next.y = MAX,
        Face::Up => next.y = 0,
        Face::North => next.z = MAX,
        Face::South => next.z = 0,
        Face::West => next.x = MAX,
        Face::East => next.x = 0,
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSink(Vec<(Material, SectionVertex)>);

    impl VertexSink for CountingSink {
        fn vertex(&mut self, material: Material, vertex: SectionVertex) {
            self.0.push((material, vertex));
        }
    }

    fn pose(local: LocalPos) -> CellPose {
        CellPose {
            section: SectionPos::default(),
            local,
            neighbors_complete: true,
        }
    }

    #[test]
    fn test_world_operations() {
        let world = GridWorld::new();

        assert!(world.load_section(SectionPos::new(0, 0, 0)));
        assert!(!world.load_section(SectionPos::new(0, 0, 0)));

        world.set_block(5, 10, 15, GridBlock::Solid);
        assert_eq!(world.get_block(5, 10, 15), GridBlock::Solid);
        assert_eq!(world.non_air_count(SectionPos::default()), Some(1));

        let dirty = world.take_dirty_sections();
        assert_eq!(dirty, vec![SectionPos::default()]);
        assert!(world.take_dirty_sections().is_empty());
    }

    #[test]
    fn test_negative_coordinates() {
        let world = GridWorld::new();
        world.load_section(SectionPos::new(-1, 0, 0));
        world.set_block(-5, 0, 0, GridBlock::Cutout);
        assert_eq!(world.get_block(-5, 0, 0), GridBlock::Cutout);
        assert_eq!(world.get_block(5, 0, 0), GridBlock::Air);
    }

    #[test]
    fn test_section_status() {
        let world = GridWorld::new();
        let center = SectionPos::new(0, 0, 0);
        assert_eq!(world.section_status(center), SectionStatus::Missing);

        world.load_section(center);
        assert_eq!(world.section_status(center), SectionStatus::Partial);

        for face in Face::ALL {
            world.load_section(center.neighbor(face));
        }
        assert_eq!(world.section_status(center), SectionStatus::Ready);
    }

    #[test]
    fn test_neighbors_cross_section_faces() {
        let world = GridWorld::new();
        world.load_section(SectionPos::new(0, 0, 0));
        world.load_section(SectionPos::new(1, 0, 0));
        world.set_block(16, 3, 3, GridBlock::Solid);

        let local = LocalPos::try_new(15, 3, 3).unwrap();
        let cell = world.get_cell_content(SectionPos::default(), local).unwrap();
        assert_eq!(cell.neighbors[Face::East.index()], Some(GridBlock::Solid));
        assert_eq!(cell.neighbors[Face::West.index()], Some(GridBlock::Air));
        assert_eq!(cell.neighbors[Face::Up.index()], Some(GridBlock::Air));
        assert_eq!(cell.neighbors[Face::South.index()], Some(GridBlock::Air));
    }

    #[test]
    fn test_isolated_cube_draws_six_faces() {
        let world = GridWorld::new();
        let local = LocalPos::try_new(4, 4, 4).unwrap();
        let cell = GridCell {
            block: GridBlock::Solid,
            neighbors: [Some(GridBlock::Air); 6],
        };

        let mut sink = CountingSink(Vec::new());
        let written = world.render_cell(&cell, &pose(local), &mut sink);

        assert_eq!(written, MaterialSet::only(Material::Solid));
        assert_eq!(sink.0.len(), 24);
    }

    #[test]
    fn test_buried_cube_draws_nothing() {
        let world = GridWorld::new();
        let cell = GridCell {
            block: GridBlock::Solid,
            neighbors: [Some(GridBlock::Solid); 6],
        };

        let mut sink = CountingSink(Vec::new());
        let written = world.render_cell(&cell, &pose(LocalPos::default()), &mut sink);
        assert!(written.is_empty());
        assert!(sink.0.is_empty());
    }

    #[test]
    fn test_unknown_neighbors_keep_faces() {
        let world = GridWorld::new();
        let mut neighbors = [Some(GridBlock::Solid); 6];
        neighbors[Face::West.index()] = None;
        let cell = GridCell {
            block: GridBlock::Cutout,
            neighbors,
        };

        let mut sink = CountingSink(Vec::new());
        world.render_cell(&cell, &pose(LocalPos::default()), &mut sink);
        assert_eq!(sink.0.len(), 4);
    }

    #[test]
    fn test_water_surface_lowered() {
        let world = GridWorld::new();
        let mut neighbors = [Some(GridBlock::Water); 6];
        neighbors[Face::Up.index()] = Some(GridBlock::Air);
        let cell = GridCell {
            block: GridBlock::Water,
            neighbors,
        };

        let mut sink = CountingSink(Vec::new());
        let written = world.render_liquid(&cell, &pose(LocalPos::default()), &mut sink);
        assert_eq!(written, MaterialSet::only(Material::Translucent));
        assert_eq!(sink.0.len(), 4);
        assert!(sink.0.iter().all(|(_, v)| (v.position[1] - WATER_SURFACE).abs() < f32::EPSILON));
    }

    #[test]
    fn test_auxiliary_split() {
        let world = GridWorld::new();
        let local = LocalPos::try_new(1, 2, 3).unwrap();
        let chest = GridCell {
            block: GridBlock::Chest,
            neighbors: [None; 6],
        };
        let beacon = GridCell {
            block: GridBlock::Beacon,
            ..chest
        };

        assert_eq!(world.cell_shape(&chest), CellShape::Empty);
        assert!(!world.auxiliary(&chest, &pose(local)).unwrap().global);
        assert!(world.auxiliary(&beacon, &pose(local)).unwrap().global);
    }
}
