use std::cell::Cell;

thread_local! {
    /// Whether the last call to an LRU-memoized function was a cache hit.
    static LAST_WAS_HIT: Cell<bool> = const { Cell::new(false) };
    /// How many hits and misses this thread has seen.
    static COUNTS: Cell<(usize, usize)> = const { Cell::new((0, 0)) };
}

/// Whether the last call to an LRU-memoized function on this thread was a
/// cache hit.
pub fn last_was_hit() -> bool {
    LAST_WAS_HIT.with(|cell| cell.get())
}

/// The number of `(hits, misses)` on this thread since the last reset.
pub fn counts() -> (usize, usize) {
    COUNTS.with(|cell| cell.get())
}

/// Reset the hit and miss counts of this thread.
pub fn reset_counts() {
    COUNTS.with(|cell| cell.set((0, 0)))
}

/// Marks the last call as a cache hit.
pub(crate) fn register_hit() {
    LAST_WAS_HIT.with(|cell| cell.set(true));
    COUNTS.with(|cell| {
        let (hits, misses) = cell.get();
        cell.set((hits + 1, misses));
    });
}

/// Marks the last call as a cache miss.
pub(crate) fn register_miss() {
    LAST_WAS_HIT.with(|cell| cell.set(false));
    COUNTS.with(|cell| {
        let (hits, misses) = cell.get();
        cell.set((hits, misses + 1));
    });
}
