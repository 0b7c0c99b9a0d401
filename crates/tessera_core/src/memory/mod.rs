//! # Memory Management
//!
//! Reusable scratch arenas and the bounded pool that lends them out.
//!
//! ## Design Philosophy
//!
//! Compiling a section touches several per-material buffers at once.
//! Allocating and freeing them per section is too slow, so:
//! - Arenas are allocated once and grown lazily
//! - Sealed batches are read back through generation-checked handles
//! - An arena compacts only once every claim on it has been released

mod arena;
mod pool;

pub use arena::{ArenaConfig, ResultHandle, ScratchArena};
pub use pool::ArenaPool;
