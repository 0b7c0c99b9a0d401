//! # Transparency Sorter
//!
//! Back-to-front ordering of translucent quads. Only the index buffer is
//! rebuilt; vertex data stays where the compiler put it, so a re-sort after
//! camera movement costs one pass over the quad centroids.

use tessera_core::{ResultHandle, ScratchArena, SectionPos};

use crate::vertex::{quad_indices, IndexType};

/// Sorts quads by a scalar key and emits index buffers.
///
/// Holds a reusable key buffer; one sorter per worker.
#[derive(Debug, Default)]
pub struct TransparencySorter {
    keys: Vec<f32>,
}

impl TransparencySorter {
    /// Creates a sorter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Permutation of quad indices, descending by `key`.
    ///
    /// The sort is stable: quads with equal keys keep their original order,
    /// so repeated calls with the same input return the same permutation.
    pub fn sort(&mut self, centroids: &[[f32; 3]], key: impl Fn([f32; 3]) -> f32) -> Vec<u32> {
        self.keys.clear();
        self.keys.extend(centroids.iter().map(|&c| key(c)));

        #[allow(clippy::cast_possible_truncation)]
        let mut permutation: Vec<u32> = (0..centroids.len() as u32).collect();
        let keys = &self.keys;
        permutation.sort_by(|&a, &b| keys[b as usize].total_cmp(&keys[a as usize]));
        permutation
    }

    /// Writes six indices per quad in permutation order, then seals.
    ///
    /// Returns `None` for an empty permutation. The arena must not hold an
    /// unsealed batch.
    pub fn rebuild_index_buffer(
        permutation: &[u32],
        arena: &mut ScratchArena,
        index_type: IndexType,
    ) -> Option<ResultHandle> {
        debug_assert_eq!(arena.unsealed_len(), 0, "index batch would merge with pending bytes");
        debug_assert!(
            index_type == IndexType::U32 || permutation.len() * 6 <= IndexType::U16_LIMIT,
            "too many quads for 16-bit indices",
        );

        let width = index_type.size();
        let bytes = arena.reserve_slice(permutation.len() * 6 * width);
        for (quad, &k) in bytes.chunks_exact_mut(6 * width).zip(permutation) {
            for (slot, index) in quad.chunks_exact_mut(width).zip(quad_indices(k)) {
                match index_type {
                    #[allow(clippy::cast_possible_truncation)]
                    IndexType::U16 => slot.copy_from_slice(&(index as u16).to_le_bytes()),
                    IndexType::U32 => slot.copy_from_slice(&index.to_le_bytes()),
                }
            }
        }
        arena.seal()
    }
}

/// Sort key putting the farthest quad first.
///
/// Squared distance to `camera`; both in the same space. Paired with the
/// descending [`TransparencySorter::sort`], quads are drawn back to front.
#[must_use]
pub fn distance_key(camera: [f32; 3]) -> impl Fn([f32; 3]) -> f32 {
    move |c| {
        let dx = c[0] - camera[0];
        let dy = c[1] - camera[1];
        let dz = c[2] - camera[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// Decodes an index buffer written by [`TransparencySorter::rebuild_index_buffer`].
#[must_use]
pub fn decode_indices(bytes: &[u8], index_type: IndexType) -> Vec<u32> {
    match index_type {
        IndexType::U16 => bytes
            .chunks_exact(2)
            .map(|b| u32::from(u16::from_le_bytes([b[0], b[1]])))
            .collect(),
        IndexType::U32 => bytes
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    }
}

/// What a re-sort needs: quad centroids and the index element type.
///
/// Shared between the render target and re-sort tasks; immutable.
#[derive(Debug, Clone, PartialEq)]
pub struct TransparencySortState {
    section: SectionPos,
    centroids: Vec<[f32; 3]>,
    index_type: IndexType,
}

impl TransparencySortState {
    /// Creates a sort state. Centroids are relative to the section origin.
    #[must_use]
    pub fn new(section: SectionPos, centroids: Vec<[f32; 3]>) -> Self {
        let index_type = IndexType::for_index_count(centroids.len() * 6);
        Self {
            section,
            centroids,
            index_type,
        }
    }

    /// Section the quads belong to.
    #[inline]
    #[must_use]
    pub const fn section(&self) -> SectionPos {
        self.section
    }

    /// Quad centroids, relative to the section origin.
    #[inline]
    #[must_use]
    pub fn centroids(&self) -> &[[f32; 3]] {
        &self.centroids
    }

    /// Number of quads.
    #[inline]
    #[must_use]
    pub fn quad_count(&self) -> usize {
        self.centroids.len()
    }

    /// Index element type.
    #[inline]
    #[must_use]
    pub const fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Sorts for a world-space camera position and writes a new index batch.
    pub fn resort(
        &self,
        sorter: &mut TransparencySorter,
        camera: [f32; 3],
        arena: &mut ScratchArena,
    ) -> Option<ResultHandle> {
        let permutation = sorter.sort(&self.centroids, distance_key(self.section.relative(camera)));
        TransparencySorter::rebuild_index_buffer(&permutation, arena, self.index_type)
    }
}
