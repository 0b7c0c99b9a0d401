//! # TESSERA Core
//!
//! Memory and visibility primitives for compiling 16x16x16 sections of a
//! voxel world into GPU geometry:
//! - Growable scratch arenas handing out generation-checked result handles
//! - A bounded pool of reusable arena packs
//! - Face-to-face visibility of a section via flood fill
//!
//! ## Architecture Rules
//!
//! 1. **No allocator churn per section** - Arenas grow lazily and are reused
//! 2. **Handles are weak** - A result handle is a validity check, never an owner
//! 3. **No GPU knowledge** - Everything here is plain bytes and cell indices
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{ArenaConfig, ScratchArena};
//!
//! let mut arena = ScratchArena::new(ArenaConfig::default());
//! arena.write_bytes(&[1, 2, 3, 4]);
//! let handle = arena.seal().expect("four bytes were written");
//! assert_eq!(arena.read(&handle), &[1, 2, 3, 4]);
//! arena.release(handle)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod memory;
pub mod section;
pub mod visibility;

pub use error::{ArenaError, ArenaResult};
pub use memory::{ArenaConfig, ArenaPool, ResultHandle, ScratchArena};
pub use section::{Face, LocalPos, SectionPos, SECTION_SIZE, SECTION_VOLUME};
pub use visibility::{VisibilityGraph, VisibilitySet};
