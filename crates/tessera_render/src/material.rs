//! Render materials.
//!
//! Each material is a separate GPU pipeline and gets its own vertex and
//! index buffers per section.

use serde::{Deserialize, Serialize};

/// A render layer of section geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Material {
    /// Fully opaque geometry.
    Solid,
    /// Alpha-tested geometry sampled with mipmaps (leaves).
    CutoutMipped,
    /// Alpha-tested geometry without mipmaps (glass panes, plants).
    Cutout,
    /// Alpha-blended geometry; needs back-to-front sorting.
    Translucent,
    /// Thin alpha-tested lines drawn last.
    Tripwire,
}

impl Material {
    /// Number of materials.
    pub const COUNT: usize = 5;

    /// All materials, in draw order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Solid,
        Self::CutoutMipped,
        Self::Cutout,
        Self::Translucent,
        Self::Tripwire,
    ];

    /// Index in `0..COUNT`.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Whether geometry of this material must be depth sorted.
    #[inline]
    #[must_use]
    pub const fn needs_sorting(self) -> bool {
        matches!(self, Self::Translucent)
    }

    /// Short name, used as a GPU debug label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Solid => "solid",
            Self::CutoutMipped => "cutout_mipped",
            Self::Cutout => "cutout",
            Self::Translucent => "translucent",
            Self::Tripwire => "tripwire",
        }
    }
}

/// A set of materials, returned by cell renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MaterialSet(u8);

impl MaterialSet {
    /// No materials.
    pub const EMPTY: Self = Self(0);

    /// Set containing one material.
    #[inline]
    #[must_use]
    pub const fn only(material: Material) -> Self {
        Self(1 << material as u8)
    }

    /// Adds a material.
    #[inline]
    pub fn insert(&mut self, material: Material) {
        self.0 |= 1 << material as u8;
    }

    /// Whether the set contains `material`.
    #[inline]
    #[must_use]
    pub const fn contains(self, material: Material) -> bool {
        self.0 & (1 << material as u8) != 0
    }

    /// Union of two sets.
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if the set is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Members in draw order.
    pub fn iter(self) -> impl Iterator<Item = Material> {
        Material::ALL.into_iter().filter(move |&m| self.contains(m))
    }
}

impl FromIterator<Material> for MaterialSet {
    fn from_iter<I: IntoIterator<Item = Material>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for material in iter {
            set.insert(material);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_set_ops() {
        let mut set = MaterialSet::only(Material::Translucent);
        set.insert(Material::Solid);
        assert!(set.contains(Material::Solid));
        assert!(!set.contains(Material::Cutout));
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![Material::Solid, Material::Translucent]
        );
        assert!(MaterialSet::EMPTY.is_empty());
    }

    #[test]
    fn test_only_translucent_sorts() {
        let sorted: MaterialSet = Material::ALL.into_iter().filter(|m| m.needs_sorting()).collect();
        assert_eq!(sorted, MaterialSet::only(Material::Translucent));
    }
}
