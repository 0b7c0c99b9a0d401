//! # Scratch Arena
//!
//! A growable byte region that hands out sealed batches to a producer and lets
//! a consumer read them back until they are released.

use std::alloc::Layout;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

use crate::error::{ArenaError, ArenaResult};

/// Source of unique arena ids, so handles cannot be read through the wrong arena.
static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

/// Sizing policy for a scratch arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArenaConfig {
    /// Bytes allocated up front.
    pub initial_capacity: usize,
    /// Largest single growth step in bytes. Smaller arenas double instead.
    pub max_growth_step: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256 * 1024,
            max_growth_step: 2 * 1024 * 1024,
        }
    }
}

/// Weak reference to one sealed batch of an arena.
///
/// A handle is only a validity check: it stays readable while the arena's
/// generation matches the one recorded here. Handles are move-only, so exactly
/// one exists per sealed batch; giving it back through
/// [`ScratchArena::release`] drops the claim.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "result handles must be released back to their arena"]
pub struct ResultHandle {
    arena: u32,
    offset: usize,
    len: usize,
    generation: u64,
}

impl ResultHandle {
    /// Byte offset of the batch inside the arena.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the batch in bytes. Never zero.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always false; empty batches are never sealed.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Arena generation the handle was issued in.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Id of the issuing arena.
    #[inline]
    #[must_use]
    pub const fn arena_id(&self) -> u32 {
        self.arena
    }

    /// Byte range covered by the batch.
    #[inline]
    #[must_use]
    pub const fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// A growable scratch buffer with batch sealing and deferred compaction.
///
/// Layout of the backing storage:
///
/// ```text
/// 0                 next_result_offset        write_offset        capacity
/// ├── sealed batches ──────┼── unsealed batch ───────┼── free ─────────┤
/// ```
///
/// While any sealed batch is still claimed the storage is never moved. When
/// the last claim is released the unsealed tail is copied to offset 0 and the
/// generation is bumped, invalidating every handle issued so far.
///
/// # Thread Safety
///
/// The arena is `Send` but not shared: it moves between the task that fills
/// it and the render thread that reads it back.
pub struct ScratchArena {
    /// Unique id, recorded in every handle.
    id: u32,
    /// Backing storage. `len()` is the capacity.
    storage: Vec<u8>,
    /// End of everything written so far.
    write_offset: usize,
    /// Start of the batch that has not been sealed yet.
    next_result_offset: usize,
    /// Number of sealed batches not yet released.
    outstanding: u32,
    /// Bumped on every compaction.
    generation: u64,
    /// Largest growth step.
    max_growth_step: usize,
}

impl ScratchArena {
    /// Creates an arena with the configured initial capacity.
    #[must_use]
    pub fn new(config: ArenaConfig) -> Self {
        let mut arena = Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            storage: Vec::new(),
            write_offset: 0,
            next_result_offset: 0,
            outstanding: 0,
            generation: 0,
            max_growth_step: config.max_growth_step.max(1),
        };
        if config.initial_capacity > 0 {
            arena.grow_to(config.initial_capacity);
        }
        arena
    }

    /// Unique id of this arena.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Current capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes written, sealed or not.
    #[inline]
    #[must_use]
    pub const fn written(&self) -> usize {
        self.write_offset
    }

    /// Bytes written since the last seal.
    #[inline]
    #[must_use]
    pub const fn unsealed_len(&self) -> usize {
        self.write_offset - self.next_result_offset
    }

    /// Number of sealed batches not yet released.
    #[inline]
    #[must_use]
    pub const fn outstanding_claims(&self) -> u32 {
        self.outstanding
    }

    /// Current generation.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Reserves `len` bytes and returns the offset where they start.
    ///
    /// The range keeps whatever bytes it held; use [`Self::reserve_slice`]
    /// to fill it in place.
    /// Grows the storage if needed; failing to grow aborts the process.
    pub fn reserve(&mut self, len: usize) -> usize {
        let start = self.write_offset;
        let Some(end) = start.checked_add(len) else {
            allocation_failure(usize::MAX)
        };
        if end > self.storage.len() {
            self.grow_for(end);
        }
        self.write_offset = end;
        start
    }

    /// Reserves `len` bytes and returns them for filling.
    pub fn reserve_slice(&mut self, len: usize) -> &mut [u8] {
        let start = self.reserve(len);
        &mut self.storage[start..start + len]
    }

    /// Appends raw bytes to the unsealed batch.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> usize {
        let start = self.reserve(bytes.len());
        self.storage[start..start + bytes.len()].copy_from_slice(bytes);
        start
    }

    /// Appends one plain-old-data value to the unsealed batch.
    #[inline]
    pub fn write_pod<T: Pod>(&mut self, value: &T) -> usize {
        self.write_bytes(bytemuck::bytes_of(value))
    }

    /// Seals everything written since the last seal into one batch.
    ///
    /// Returns `None` when nothing was written.
    pub fn seal(&mut self) -> Option<ResultHandle> {
        let offset = self.next_result_offset;
        let len = self.write_offset - offset;
        if len == 0 {
            return None;
        }
        self.next_result_offset = self.write_offset;
        self.outstanding += 1;
        Some(ResultHandle {
            arena: self.id,
            offset,
            len,
            generation: self.generation,
        })
    }

    /// Returns whether `handle` can still be read.
    #[must_use]
    pub fn is_valid(&self, handle: &ResultHandle) -> bool {
        self.check(handle).is_ok()
    }

    /// Reads a sealed batch.
    ///
    /// # Errors
    ///
    /// Fails if the handle is stale, foreign, or out of range.
    pub fn try_read(&self, handle: &ResultHandle) -> ArenaResult<&[u8]> {
        self.check(handle)?;
        Ok(&self.storage[handle.range()])
    }

    /// Reads a sealed batch, treating an invalid handle as a logic error.
    ///
    /// Debug builds assert; release builds log and return an empty slice.
    #[must_use]
    pub fn read(&self, handle: &ResultHandle) -> &[u8] {
        match self.try_read(handle) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug_assert!(false, "invalid arena read: {err}");
                tracing::error!(arena = self.id, %err, "invalid arena read");
                &[]
            }
        }
    }

    /// Releases the claim held by `handle`.
    ///
    /// When the last claim goes away the arena compacts and the generation
    /// moves on.
    ///
    /// # Errors
    ///
    /// Stale or foreign handles are rejected and change nothing.
    pub fn release(&mut self, handle: ResultHandle) -> ArenaResult<()> {
        self.check(&handle)?;
        if self.outstanding == 0 {
            return Err(ArenaError::NoOutstandingClaims);
        }
        self.outstanding -= 1;
        if self.outstanding == 0 {
            self.compact();
        }
        Ok(())
    }

    /// Drops every claim and the unsealed batch, then compacts.
    ///
    /// Used when the producer was cancelled or failed; the arena is empty
    /// afterwards and all earlier handles are stale.
    pub fn discard_all(&mut self) {
        if self.outstanding > 0 {
            tracing::trace!(
                arena = self.id,
                claims = self.outstanding,
                "discarding outstanding arena claims"
            );
        }
        self.outstanding = 0;
        self.write_offset = self.next_result_offset;
        self.compact();
    }

    fn check(&self, handle: &ResultHandle) -> ArenaResult<()> {
        if handle.arena != self.id {
            return Err(ArenaError::ForeignHandle {
                handle_arena: handle.arena,
                arena: self.id,
            });
        }
        if handle.generation != self.generation {
            return Err(ArenaError::StaleHandle {
                handle: handle.generation,
                current: self.generation,
            });
        }
        if handle.offset + handle.len > self.next_result_offset {
            return Err(ArenaError::OutOfBounds {
                offset: handle.offset,
                len: handle.len,
                sealed: self.next_result_offset,
            });
        }
        Ok(())
    }

    /// Moves the unsealed tail to offset 0 and invalidates all handles.
    fn compact(&mut self) {
        let tail = self.next_result_offset..self.write_offset;
        let pending = tail.len();
        if pending > 0 && tail.start > 0 {
            self.storage.copy_within(tail, 0);
        }
        self.write_offset = pending;
        self.next_result_offset = 0;
        self.generation += 1;
    }

    fn grow_for(&mut self, required: usize) {
        let capacity = self.storage.len();
        let step = capacity.min(self.max_growth_step);
        let target = capacity.saturating_add(step).max(required);
        self.grow_to(target);
    }

    fn grow_to(&mut self, target: usize) {
        let capacity = self.storage.len();
        if self.storage.try_reserve_exact(target - capacity).is_err() {
            allocation_failure(target);
        }
        self.storage.resize(target, 0);
        tracing::trace!(arena = self.id, from = capacity, to = target, "scratch arena grew");
    }
}

impl std::fmt::Debug for ScratchArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchArena")
            .field("id", &self.id)
            .field("capacity", &self.storage.len())
            .field("write_offset", &self.write_offset)
            .field("next_result_offset", &self.next_result_offset)
            .field("outstanding", &self.outstanding)
            .field("generation", &self.generation)
            .finish()
    }
}

/// A half-grown arena cannot be used safely.
#[cold]
fn allocation_failure(bytes: usize) -> ! {
    tracing::error!(bytes, "scratch arena allocation failed");
    let layout = Layout::array::<u8>(bytes).unwrap_or_else(|_| Layout::new::<u8>());
    std::alloc::handle_alloc_error(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn small_arena() -> ScratchArena {
        ScratchArena::new(ArenaConfig {
            initial_capacity: 64,
            max_growth_step: 256,
        })
    }

    #[test]
    fn test_reserve_returns_previous_cursor() {
        let mut arena = small_arena();
        assert_eq!(arena.reserve(10), 0);
        assert_eq!(arena.reserve(6), 10);
        assert_eq!(arena.written(), 16);
    }

    #[test]
    fn test_reserve_slice_fills_in_place() {
        let mut arena = small_arena();
        arena.write_bytes(&[1, 2]);
        arena.reserve_slice(3).copy_from_slice(&[7, 8, 9]);
        let handle = arena.seal().unwrap();
        assert_eq!(arena.read(&handle), &[1, 2, 7, 8, 9]);
        arena.release(handle).unwrap();
    }

    #[test]
    fn test_growth_doubles_then_caps() {
        let mut arena = small_arena();
        arena.reserve(65);
        assert_eq!(arena.capacity(), 128);

        arena.reserve(40);
        assert_eq!(arena.capacity(), 128);
        arena.reserve(40);
        assert_eq!(arena.capacity(), 256);

        arena.reserve(200);
        assert_eq!(arena.capacity(), 512);

        // Step is capped at 256 bytes once the arena is large.
        arena.reserve(200);
        assert_eq!(arena.capacity(), 768);

        // A single huge request is satisfied in one step.
        arena.reserve(10_000);
        assert_eq!(arena.capacity(), 10_545);
    }

    #[test]
    fn test_seal_empty_batch_is_none() {
        let mut arena = small_arena();
        assert!(arena.seal().is_none());

        arena.write_bytes(&[1, 2, 3]);
        let handle = arena.seal().unwrap();
        assert!(arena.seal().is_none());
        assert_eq!(arena.outstanding_claims(), 1);
        arena.release(handle).unwrap();
    }

    #[test]
    fn test_seal_and_read_back() {
        let mut arena = small_arena();
        arena.write_bytes(&[1, 2, 3, 4]);
        let first = arena.seal().unwrap();
        arena.write_pod(&0xAABB_CCDDu32);
        let second = arena.seal().unwrap();

        assert_eq!(arena.read(&first), &[1, 2, 3, 4]);
        assert_eq!(arena.read(&second), &0xAABB_CCDDu32.to_ne_bytes());
        assert_eq!(first.range(), 0..4);
        assert_eq!(second.range(), 4..8);
    }

    #[test]
    fn test_release_last_claim_bumps_generation() {
        let mut arena = small_arena();
        arena.write_bytes(&[7; 8]);
        let handle = arena.seal().unwrap();
        let generation = arena.generation();

        arena.release(handle).unwrap();
        assert_eq!(arena.generation(), generation + 1);
        assert_eq!(arena.written(), 0);
        assert_eq!(arena.outstanding_claims(), 0);
    }

    #[test]
    fn test_handles_stale_after_claims_drain() {
        let mut arena = small_arena();
        arena.write_bytes(&[1; 4]);
        let kept = arena.seal().unwrap();
        arena.write_bytes(&[2; 4]);
        let released = arena.seal().unwrap();

        arena.release(released).unwrap();
        assert!(arena.is_valid(&kept), "one claim is still outstanding");

        arena.discard_all();
        assert_eq!(arena.outstanding_claims(), 0);
        assert!(!arena.is_valid(&kept));
        assert!(matches!(
            arena.try_read(&kept),
            Err(ArenaError::StaleHandle { .. })
        ));
        assert!(matches!(
            arena.release(kept),
            Err(ArenaError::StaleHandle { .. })
        ));
    }

    #[test]
    fn test_compaction_keeps_unsealed_tail() {
        let mut arena = small_arena();
        arena.write_bytes(&[9; 12]);
        let sealed = arena.seal().unwrap();
        arena.write_bytes(&[1, 2, 3]);

        arena.release(sealed).unwrap();
        assert_eq!(arena.written(), 3);
        assert_eq!(arena.unsealed_len(), 3);

        let tail = arena.seal().unwrap();
        assert_eq!(tail.offset(), 0);
        assert_eq!(arena.read(&tail), &[1, 2, 3]);
    }

    #[test]
    fn test_discard_all_drops_unsealed_batch() {
        let mut arena = small_arena();
        arena.write_bytes(&[5; 16]);
        let _abandoned = arena.seal().unwrap();
        arena.write_bytes(&[6; 16]);

        arena.discard_all();
        assert_eq!(arena.written(), 0);
        assert!(arena.seal().is_none());
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut a = small_arena();
        let mut b = small_arena();
        a.write_bytes(&[1]);
        let handle = a.seal().unwrap();
        b.write_bytes(&[1]);
        let _other = b.seal().unwrap();

        assert!(matches!(
            b.try_read(&handle),
            Err(ArenaError::ForeignHandle { .. })
        ));
        assert_eq!(b.outstanding_claims(), 1);
    }

    #[test]
    fn test_random_sequences_never_overlap() {
        let mut rng = StdRng::seed_from_u64(0x7E55_E7A);
        let mut arena = small_arena();
        let mut live: Vec<(ResultHandle, u8)> = Vec::new();
        let mut fill = 0u8;

        for _ in 0..5_000 {
            match rng.gen_range(0..10) {
                0..=4 => {
                    let len = rng.gen_range(1..300);
                    fill = fill.wrapping_add(1);
                    arena.reserve_slice(len).fill(fill);
                }
                5..=6 => {
                    if let Some(handle) = arena.seal() {
                        let byte = arena.read(&handle)[0];
                        live.push((handle, byte));
                    }
                }
                _ => {
                    if !live.is_empty() {
                        let index = rng.gen_range(0..live.len());
                        let (handle, _) = live.swap_remove(index);
                        let was_last = live.is_empty();
                        let generation = arena.generation();
                        arena.release(handle).unwrap();
                        assert_eq!(arena.generation() != generation, was_last);
                    }
                }
            }

            let sealed: usize = live.iter().map(|(h, _)| h.len()).sum();
            assert!(sealed <= arena.capacity());
            assert_eq!(arena.outstanding_claims() as usize, live.len());

            for (i, (a, _)) in live.iter().enumerate() {
                assert!(arena.is_valid(a));
                for (b, _) in &live[i + 1..] {
                    let disjoint =
                        a.range().end <= b.range().start || b.range().end <= a.range().start;
                    assert!(disjoint, "{:?} overlaps {:?}", a.range(), b.range());
                }
            }
        }

        // Contents survive interleaved reserves and releases untouched.
        for (handle, byte) in &live {
            assert_eq!(arena.read(handle)[0], *byte);
        }
    }
}
