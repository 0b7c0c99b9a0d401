//! # Section Visibility
//!
//! Decides which pairs of section faces are connected through non-opaque
//! cells. The renderer uses the result to skip sections that cannot be seen
//! through the section the camera is looking across.
//!
//! ## Algorithm
//!
//! 1. Cells are marked opaque while the section is compiled
//! 2. Mostly open and fully solid sections short-circuit
//! 3. Otherwise a breadth-first flood fill starts from every open boundary
//!    cell; the faces each connected region touches see each other

use std::collections::VecDeque;

use crate::section::{Face, LocalPos, SECTION_VOLUME};

/// Below this many opaque cells every face is assumed to see every other.
///
/// 256 is the smallest count that can wall off a section (one full 16x16
/// layer), so fewer opaque cells can never separate two faces completely.
const OPEN_SHORTCUT: usize = 256;

const WORDS: usize = SECTION_VOLUME / 64;

/// Symmetric face-to-face visibility relation.
///
/// Only distinct pairs are stored. Bit `a * 6 + b` is set for every visible
/// pair `(a, b)`, always together with `(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VisibilitySet(u64);

impl VisibilitySet {
    /// No face sees any other.
    pub const NONE: Self = Self(0);

    const ALL_PAIRS: u64 = {
        let mut bits = 0u64;
        let mut a = 0;
        while a < 6 {
            let mut b = 0;
            while b < 6 {
                if a != b {
                    bits |= 1 << (a * 6 + b);
                }
                b += 1;
            }
            a += 1;
        }
        bits
    };

    /// Every face sees every other face.
    #[inline]
    #[must_use]
    pub const fn all() -> Self {
        Self(Self::ALL_PAIRS)
    }

    /// Marks `a` and `b` as mutually visible. Equal faces are ignored.
    #[inline]
    pub fn set(&mut self, a: Face, b: Face) {
        if a != b {
            self.0 |= 1 << (a.index() * 6 + b.index()) | 1 << (b.index() * 6 + a.index());
        }
    }

    /// Whether a path connects face `a` to face `b`.
    #[inline]
    #[must_use]
    pub const fn can_see(self, a: Face, b: Face) -> bool {
        self.0 & (1 << (a.index() * 6 + b.index())) != 0
    }

    /// Marks every pair inside a face mask as visible.
    pub fn add_faces(&mut self, mask: u8) {
        for a in Face::ALL {
            if mask & a.bit() == 0 {
                continue;
            }
            for b in Face::ALL {
                if mask & b.bit() != 0 {
                    self.set(a, b);
                }
            }
        }
    }

    /// Visible pairs with `a < b`.
    pub fn visible_pairs(self) -> impl Iterator<Item = (Face, Face)> {
        Face::ALL.into_iter().flat_map(move |a| {
            Face::ALL
                .into_iter()
                .filter(move |&b| a < b && self.can_see(a, b))
                .map(move |b| (a, b))
        })
    }

    /// Returns true if every pair is visible.
    #[inline]
    #[must_use]
    pub const fn is_all(self) -> bool {
        self.0 == Self::ALL_PAIRS
    }

    /// Returns true if no pair is visible.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Opaque-cell markers for one section.
#[derive(Clone)]
pub struct VisibilityGraph {
    opaque: [u64; WORDS],
    opaque_count: usize,
}

impl Default for VisibilityGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityGraph {
    /// Creates a graph with every cell open.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            opaque: [0; WORDS],
            opaque_count: 0,
        }
    }

    /// Flags a cell as impassable.
    #[inline]
    pub fn mark_opaque(&mut self, cell: LocalPos) {
        let index = cell.index();
        let bit = 1u64 << (index % 64);
        let word = &mut self.opaque[index / 64];
        if *word & bit == 0 {
            *word |= bit;
            self.opaque_count += 1;
        }
    }

    /// Whether a cell was marked opaque.
    #[inline]
    #[must_use]
    pub fn is_opaque(&self, cell: LocalPos) -> bool {
        test_bit(&self.opaque, cell.index())
    }

    /// Number of opaque cells.
    #[inline]
    #[must_use]
    pub const fn opaque_count(&self) -> usize {
        self.opaque_count
    }

    /// Computes the face visibility relation.
    #[must_use]
    pub fn resolve(&self) -> VisibilitySet {
        if self.opaque_count < OPEN_SHORTCUT {
            VisibilitySet::all()
        } else if self.opaque_count == SECTION_VOLUME {
            VisibilitySet::NONE
        } else {
            self.flood_fill()
        }
    }

    /// Full flood fill, without the short-circuits of [`Self::resolve`].
    #[must_use]
    pub fn flood_fill(&self) -> VisibilitySet {
        let mut visited = self.opaque;
        let mut queue = VecDeque::with_capacity(SECTION_VOLUME);
        let mut result = VisibilitySet::NONE;

        for start in LocalPos::all().filter(|p| p.is_boundary()) {
            if test_bit(&visited, start.index()) {
                continue;
            }
            set_bit(&mut visited, start.index());
            queue.push_back(start);

            let mut faces = 0u8;
            while let Some(cell) = queue.pop_front() {
                faces |= cell.boundary_faces();
                for face in Face::ALL {
                    let Some(next) = cell.offset(face) else {
                        continue;
                    };
                    if !test_bit(&visited, next.index()) {
                        set_bit(&mut visited, next.index());
                        queue.push_back(next);
                    }
                }
            }
            result.add_faces(faces);
        }

        result
    }
}

impl std::fmt::Debug for VisibilityGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityGraph")
            .field("opaque_count", &self.opaque_count)
            .finish_non_exhaustive()
    }
}

#[inline]
fn test_bit(bits: &[u64; WORDS], index: usize) -> bool {
    bits[index / 64] & (1 << (index % 64)) != 0
}

#[inline]
fn set_bit(bits: &mut [u64; WORDS], index: usize) {
    bits[index / 64] |= 1 << (index % 64);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_except(open: impl Fn(LocalPos) -> bool) -> VisibilityGraph {
        let mut graph = VisibilityGraph::new();
        for cell in LocalPos::all().filter(|&p| !open(p)) {
            graph.mark_opaque(cell);
        }
        graph
    }

    #[test]
    fn test_empty_volume_sees_everything() {
        let graph = VisibilityGraph::new();
        assert!(graph.resolve().is_all());
        assert!(graph.flood_fill().is_all());
        assert_eq!(graph.resolve().visible_pairs().count(), 15);
    }

    #[test]
    fn test_solid_volume_sees_nothing() {
        let graph = solid_except(|_| false);
        assert_eq!(graph.opaque_count(), SECTION_VOLUME);
        assert!(graph.resolve().is_none());
        assert!(graph.flood_fill().is_none());
    }

    #[test]
    fn test_straight_tunnel_connects_two_faces() {
        let graph = solid_except(|p| p.y == 8 && p.z == 8);
        let visibility = graph.resolve();

        let pairs: Vec<_> = visibility.visible_pairs().collect();
        assert_eq!(pairs, vec![(Face::West, Face::East)]);
        assert!(visibility.can_see(Face::East, Face::West));
    }

    #[test]
    fn test_vertical_tunnel() {
        let graph = solid_except(|p| p.x == 3 && p.z == 12);
        let pairs: Vec<_> = graph.resolve().visible_pairs().collect();
        assert_eq!(pairs, vec![(Face::Down, Face::Up)]);
    }

    #[test]
    fn test_wall_separates_halves() {
        // A full layer at x = 7 splits west from east.
        let graph = solid_except(|p| p.x != 7);
        let visibility = graph.resolve();

        assert!(!visibility.can_see(Face::West, Face::East));
        assert!(visibility.can_see(Face::Up, Face::Down));
        assert!(visibility.can_see(Face::West, Face::North));
        assert!(visibility.can_see(Face::East, Face::South));
    }

    #[test]
    fn test_sparse_opaque_short_circuits() {
        let mut graph = VisibilityGraph::new();
        graph.mark_opaque(LocalPos::from_index(0));
        graph.mark_opaque(LocalPos::from_index(0));
        assert_eq!(graph.opaque_count(), 1);
        assert!(graph.is_opaque(LocalPos::from_index(0)));
        assert!(graph.resolve().is_all());
    }

    #[test]
    fn test_set_ignores_self_pairs() {
        let mut set = VisibilitySet::NONE;
        set.set(Face::Up, Face::Up);
        assert!(set.is_none());
        set.set(Face::Up, Face::North);
        assert!(set.can_see(Face::North, Face::Up));
        assert!(!set.can_see(Face::Up, Face::Up));
    }
}
