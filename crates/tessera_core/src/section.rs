//! Section coordinates and the 16x16x16 cell grid.
//!
//! Sections are 16x16x16 cells - the unit of mesh compilation and of
//! occlusion culling.

use serde::{Deserialize, Serialize};

/// Section dimension - 16 cells per axis.
pub const SECTION_SIZE: usize = 16;

/// Total cells per section.
pub const SECTION_VOLUME: usize = SECTION_SIZE * SECTION_SIZE * SECTION_SIZE;

const SIZE_I32: i32 = SECTION_SIZE as i32;

/// One of the six outer faces of a section.
///
/// North is -Z, west is -X, down is -Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Face {
    /// -Y
    Down,
    /// +Y
    Up,
    /// -Z
    North,
    /// +Z
    South,
    /// -X
    West,
    /// +X
    East,
}

impl Face {
    /// All faces, in index order.
    pub const ALL: [Self; 6] = [
        Self::Down,
        Self::Up,
        Self::North,
        Self::South,
        Self::West,
        Self::East,
    ];

    /// Index in `0..6`.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Single-bit mask for face sets.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }

    /// The face on the other side of the cube.
    #[inline]
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Down => Self::Up,
            Self::Up => Self::Down,
            Self::North => Self::South,
            Self::South => Self::North,
            Self::West => Self::East,
            Self::East => Self::West,
        }
    }

    /// Unit step `(dx, dy, dz)` towards this face.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> (i32, i32, i32) {
        match self {
            Self::Down => (0, -1, 0),
            Self::Up => (0, 1, 0),
            Self::North => (0, 0, -1),
            Self::South => (0, 0, 1),
            Self::West => (-1, 0, 0),
            Self::East => (1, 0, 0),
        }
    }

    /// Outward normal as floats.
    #[inline]
    #[must_use]
    pub fn normal(self) -> [f32; 3] {
        let (x, y, z) = self.offset();
        [x as f32, y as f32, z as f32]
    }
}

/// Section coordinate in world space, in units of whole sections.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SectionPos {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
    /// Z coordinate.
    pub z: i32,
}

impl SectionPos {
    /// Creates a new section coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Converts a world cell position to the section containing it.
    #[inline]
    #[must_use]
    pub const fn from_block(x: i32, y: i32, z: i32) -> Self {
        Self::new(
            x.div_euclid(SIZE_I32),
            y.div_euclid(SIZE_I32),
            z.div_euclid(SIZE_I32),
        )
    }

    /// World cell position of the section's minimum corner.
    #[inline]
    #[must_use]
    pub const fn origin(self) -> (i32, i32, i32) {
        (self.x * SIZE_I32, self.y * SIZE_I32, self.z * SIZE_I32)
    }

    /// World-space center point.
    #[must_use]
    pub fn center(self) -> [f32; 3] {
        let (x, y, z) = self.origin();
        let half = SECTION_SIZE as f32 / 2.0;
        [x as f32 + half, y as f32 + half, z as f32 + half]
    }

    /// Adjacent section across `face`.
    #[inline]
    #[must_use]
    pub const fn neighbor(self, face: Face) -> Self {
        let (dx, dy, dz) = face.offset();
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Squared distance from the section center to a world point.
    #[must_use]
    pub fn distance_squared_to(self, point: [f32; 3]) -> f64 {
        let center = self.center();
        (0..3)
            .map(|i| {
                let d = f64::from(center[i]) - f64::from(point[i]);
                d * d
            })
            .sum()
    }

    /// A world point expressed relative to the section origin.
    #[must_use]
    pub fn relative(self, point: [f32; 3]) -> [f32; 3] {
        let (x, y, z) = self.origin();
        [point[0] - x as f32, point[1] - y as f32, point[2] - z as f32]
    }
}

/// Position of a cell inside a section. Every component is below 16.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LocalPos {
    /// X coordinate.
    pub x: u8,
    /// Y coordinate.
    pub y: u8,
    /// Z coordinate.
    pub z: u8,
}

impl LocalPos {
    /// Creates a local position, or `None` if a component is out of range.
    #[inline]
    #[must_use]
    pub const fn try_new(x: u8, y: u8, z: u8) -> Option<Self> {
        if (x as usize) < SECTION_SIZE && (y as usize) < SECTION_SIZE && (z as usize) < SECTION_SIZE
        {
            Some(Self { x, y, z })
        } else {
            None
        }
    }

    /// Cell index. Layout: `x | z << 4 | y << 8`.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.x as usize | (self.z as usize) << 4 | (self.y as usize) << 8
    }

    /// Inverse of [`Self::index`]. Only the low 12 bits are used.
    #[inline]
    #[must_use]
    pub const fn from_index(index: usize) -> Self {
        Self {
            x: (index & 0xF) as u8,
            z: ((index >> 4) & 0xF) as u8,
            y: ((index >> 8) & 0xF) as u8,
        }
    }

    /// Neighbouring cell across `face`, or `None` at the section edge.
    #[must_use]
    pub fn offset(self, face: Face) -> Option<Self> {
        let (dx, dy, dz) = face.offset();
        let step = |v: u8, d: i32| u8::try_from(i32::from(v) + d).ok();
        Self::try_new(step(self.x, dx)?, step(self.y, dy)?, step(self.z, dz)?)
    }

    /// Mask of the section faces this cell lies on, see [`Face::bit`].
    #[must_use]
    pub const fn boundary_faces(self) -> u8 {
        const MAX: u8 = (SECTION_SIZE - 1) as u8;
        let mut mask = 0;
        if self.y == 0 {
            mask |= Face::Down.bit();
        }
        if self.y == MAX {
            mask |= Face::Up.bit();
        }
        if self.z == 0 {
            mask |= Face::North.bit();
        }
        if self.z == MAX {
            mask |= Face::South.bit();
        }
        if self.x == 0 {
            mask |= Face::West.bit();
        }
        if self.x == MAX {
            mask |= Face::East.bit();
        }
        mask
    }

    /// Returns true if the cell touches any section face.
    #[inline]
    #[must_use]
    pub const fn is_boundary(self) -> bool {
        self.boundary_faces() != 0
    }

    /// Iterates all 4096 cells in index order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..SECTION_VOLUME).map(Self::from_index)
    }

    /// Position as floats, relative to the section origin.
    #[inline]
    #[must_use]
    pub fn as_f32(self) -> [f32; 3] {
        [f32::from(self.x), f32::from(self.y), f32::from(self.z)]
    }
}
