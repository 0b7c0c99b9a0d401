//! # Arena Pool
//!
//! Bounded free list of reusable scratch packs.

/// A bounded pool of reusable objects.
///
/// The pool is filled once at construction. [`Self::acquire`] never creates a
/// new object: when every object is lent out it returns `None` and the caller
/// waits for one to come back. That bound is what limits how many sections
/// compile at the same time.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. It is owned by the dispatcher's single
/// mailbox thread.
///
/// # Example
///
/// ```rust,ignore
/// let mut pool = ArenaPool::new(2, || ScratchArena::new(ArenaConfig::default()));
///
/// let arena = pool.acquire().expect("pool starts full");
/// // ... fill it on a worker ...
/// pool.release(arena);
/// ```
pub struct ArenaPool<T> {
    /// Objects available for lending.
    free: Vec<T>,
    /// Number of objects the pool was created with.
    capacity: usize,
}

impl<T> ArenaPool<T> {
    /// Creates a pool holding `capacity` objects built by `factory`.
    ///
    /// All objects are allocated upfront.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize, mut factory: impl FnMut() -> T) -> Self {
        assert!(capacity > 0, "Capacity must be greater than zero");

        let free: Vec<T> = (0..capacity).map(|_| factory()).collect();

        Self { free, capacity }
    }

    /// Returns the total capacity.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of objects ready to be lent.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Returns the number of objects currently lent out.
    #[inline]
    #[must_use]
    pub fn lent_count(&self) -> usize {
        self.capacity - self.free.len()
    }

    /// Returns true if nothing can be acquired right now.
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }

    /// Takes an object out of the pool, or `None` if all are lent.
    #[inline]
    pub fn acquire(&mut self) -> Option<T> {
        self.free.pop()
    }

    /// Returns an object to the pool.
    ///
    /// Objects beyond capacity are dropped.
    pub fn release(&mut self, item: T) {
        if self.free.len() >= self.capacity {
            tracing::warn!(capacity = self.capacity, "arena pool over capacity, dropping object");
            return;
        }
        self.free.push(item);
    }
}

impl<T> std::fmt::Debug for ArenaPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaPool")
            .field("free", &self.free.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
