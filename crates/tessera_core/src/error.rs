//! # Core Error Types
//!
//! Errors raised when a result handle is used against the wrong arena state.
//! Allocation failure is not represented here: it is fatal.

use thiserror::Error;

/// Errors that can occur when reading or releasing arena results.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    /// The handle was issued before the arena last compacted.
    #[error("stale result handle: issued in generation {handle}, arena is at generation {current}")]
    StaleHandle {
        /// Generation recorded in the handle.
        handle: u64,
        /// Current generation of the arena.
        current: u64,
    },

    /// The handle was issued by a different arena.
    #[error("result handle belongs to arena {handle_arena}, not arena {arena}")]
    ForeignHandle {
        /// Arena that issued the handle.
        handle_arena: u32,
        /// Arena the handle was presented to.
        arena: u32,
    },

    /// The handle range is not inside the sealed region of the arena.
    #[error("result handle out of bounds: {offset}+{len} exceeds sealed length {sealed}")]
    OutOfBounds {
        /// Start of the handle range.
        offset: usize,
        /// Length of the handle range.
        len: usize,
        /// Number of sealed bytes in the arena.
        sealed: usize,
    },

    /// A release arrived while no claims were outstanding.
    #[error("release without outstanding claims")]
    NoOutstandingClaims,
}

/// Result type for arena operations.
pub type ArenaResult<T> = Result<T, ArenaError>;
