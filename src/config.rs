//! Runtime configuration for the collector.

/// Tunables for a [`crate::pool::GcPool`] and the cycle it drives.
///
/// Defaults mirror the thresholds the original collector compiled in as
/// constants, adapted into a `Default` impl so an embedder can override
/// only what it needs to.
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Number of worker threads beyond worker 0 (the mutator). A value of
    /// `0` disables parallelism entirely; every fan-out threshold is then
    /// moot since there is no one to steal from.
    pub num_threads: usize,

    /// Minimum array length before `parallel_mark_array` fans out instead
    /// of marking inline.
    pub parallel_mark_array_threshold: usize,

    /// Minimum table capacity before `parallel_mark_hashtable` fans out
    /// instead of marking inline.
    pub parallel_mark_hashtable_threshold: usize,

    /// Minimum object-list length before `parallel_sweep` partitions the
    /// list into chunks instead of sweeping serially.
    pub parallel_sweep_threshold: usize,

    /// Initial capacity of each worker's deque.
    pub initial_deque_capacity: usize,

    /// Floor for `next_gc`, regardless of how little is currently live.
    pub min_heap_threshold: usize,

    /// Multiplier applied to bytes-in-use to compute the next collection
    /// threshold.
    pub heap_growth_factor: f64,

    /// Force a full cycle on every allocation. Intended for test harnesses
    /// that want maximum GC coverage, not production use.
    pub stress_gc: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get().saturating_sub(1).max(1),
            parallel_mark_array_threshold: 10_000,
            parallel_mark_hashtable_threshold: 2_000,
            parallel_sweep_threshold: 100_000,
            initial_deque_capacity: 1024,
            min_heap_threshold: 1024 * 1024,
            heap_growth_factor: 2.0,
            stress_gc: false,
        }
    }
}
