//! Collection of per-producer queue sets and the two-pass drain into a
//! seed index.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐       ┌───────────────────┐       ┌────────────┐
//! │ Producer 0   │──add─>│ QueueSet 0        │       │            │
//! │ Producer 1   │──add─>│ QueueSet 1        │─iter─>│ SeedIndex  │
//! │   ...        │       │   ...             │  x2   │ (two-pass) │
//! │ Producer N-1 │──add─>│ QueueSet N-1      │       │            │
//! └──────────────┘       └───────────────────┘       └────────────┘
//!    insert phase          close + drain phase
//!    (no sharing)          (radix-range partitioned)
//! ```
//!
//! During the insert phase every producer thread owns one [`QueueSet`]
//! exclusively (`&mut` access, no locks). [`StagingQueues::freeze`] then
//! closes all sets and replays their contents into the index twice: the
//! radix range is split once into contiguous, size-balanced sub-ranges, one
//! drain task per sub-range runs on an owned thread pool, and each task
//! walks its radixes in ascending order across all sets in fixed index
//! order. Because the sub-ranges and the walk are pure functions of the
//! closed data, the two passes replay bit-for-bit identical `add` sequences.
//! The two-phase index (size-probe, then populate) depends on that.

use crate::errors::{Result, StageError};
use crate::index::SeedIndex;
use crate::logging::{format_bytes, format_count};
use crate::queue::QueueSet;
use rayon::prelude::*;
use std::ops::Range;

/// Cap on the radix bit-width.
///
/// Bounds each set's bucket table (and the per-drain-task state) while
/// leaving enough buckets to balance any practical thread count.
const MAX_RADIX_BITS: u32 = 10;

/// Per-producer staging queues plus the drain orchestration.
///
/// # Example
///
/// ```
/// use fgstage::{SeedIndex, StagingQueues};
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// struct CountingIndex(AtomicU64);
///
/// impl SeedIndex for CountingIndex {
///     fn add(&self, _hash: u64, _id: u64) -> anyhow::Result<()> {
///         self.0.fetch_add(1, Ordering::Relaxed);
///         Ok(())
///     }
///     fn freeze(&self) -> anyhow::Result<()> {
///         Ok(())
///     }
/// }
///
/// # fn main() -> anyhow::Result<()> {
/// let mut queues = StagingQueues::new(2, 24, 1_000, 32, 12)?;
/// queues.queue_mut(0).add(0x00AB_CDEF, 7);
/// queues.queue_mut(1).add(0x0012_3456, 8);
///
/// let index = CountingIndex(AtomicU64::new(0));
/// queues.freeze(&index)?;
/// // Both records are replayed once per drain pass.
/// assert_eq!(index.0.load(Ordering::Relaxed), 4);
/// # Ok(())
/// # }
/// ```
pub struct StagingQueues {
    sets: Vec<QueueSet>,
    radix_bits: u32,
    lower_bits: u32,
    pool: rayon::ThreadPool,
}

impl StagingQueues {
    /// Create `threads` queue sets for hashes of `hash_bits` significant
    /// bits.
    ///
    /// The radix bit-width is `min(hash_bits, partition_bits, 10)`, where
    /// `partition_bits` is the bit-width of the target index's own internal
    /// partitioning. Each set is sized for `estimated_size / threads`
    /// records.
    ///
    /// # Errors
    /// Fails fast, without clamping, if `threads < 1`, `hash_bits` is
    /// outside `[1, 64]`, `partition_bits < 1`, or `value_bits` is outside
    /// `[1, 63]`.
    ///
    /// # Panics
    /// Panics if the drain thread pool cannot be created.
    pub fn new(
        threads: usize,
        hash_bits: u32,
        estimated_size: u64,
        value_bits: u32,
        partition_bits: u32,
    ) -> Result<Self> {
        if threads < 1 {
            return Err(StageError::invalid("threads", format!("must be >= 1, got {threads}")));
        }
        if hash_bits < 1 || hash_bits > 64 {
            return Err(StageError::invalid(
                "hash_bits",
                format!("must be in [1, 64], got {hash_bits}"),
            ));
        }
        if partition_bits < 1 {
            return Err(StageError::invalid(
                "partition_bits",
                format!("must be >= 1, got {partition_bits}"),
            ));
        }

        let radix_bits = hash_bits.min(partition_bits).min(MAX_RADIX_BITS);
        let lower_bits = hash_bits - radix_bits;

        let per_set = estimated_size.div_ceil(threads as u64);
        let sets = (0..threads)
            .map(|_| QueueSet::new(lower_bits, radix_bits, value_bits, per_set))
            .collect::<Result<Vec<_>>>()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .expect("Failed to build drain thread pool");

        Ok(Self { sets, radix_bits, lower_bits, pool })
    }

    /// The queue set assigned to producer `thread_index`.
    ///
    /// Each producer thread takes exclusive `&mut` access to exactly one set
    /// for the whole insert phase; splitting [`queues_mut`](Self::queues_mut)
    /// across scoped threads is the usual way to hand them out.
    ///
    /// # Panics
    /// Panics if `thread_index >= threads`.
    #[must_use]
    pub fn queue_mut(&mut self, thread_index: usize) -> &mut QueueSet {
        &mut self.sets[thread_index]
    }

    /// All queue sets, for splitting across producer threads.
    #[must_use]
    pub fn queues_mut(&mut self) -> &mut [QueueSet] {
        &mut self.sets
    }

    /// Number of producer threads (and drain tasks).
    #[must_use]
    pub fn threads(&self) -> usize {
        self.sets.len()
    }

    /// Radix bit-width shared by every set.
    #[must_use]
    pub fn radix_bits(&self) -> u32 {
        self.radix_bits
    }

    /// Low hash bits stored per record.
    #[must_use]
    pub fn lower_bits(&self) -> u32 {
        self.lower_bits
    }

    /// Number of buckets per set (`2^radix_bits`).
    #[must_use]
    pub fn radix_count(&self) -> usize {
        1 << self.radix_bits
    }

    /// Records staged across all sets.
    #[must_use]
    pub fn total_entries(&self) -> u64 {
        self.sets.iter().map(|set| set.len()).sum()
    }

    /// Bytes held by all backing stores.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.sets.iter().map(|set| set.memory_stats().bytes).sum()
    }

    /// Close every set and drain the staged records into `index`, twice.
    ///
    /// Pass structure: close all sets sequentially, then run two identical
    /// drain passes, each ending with one `index.freeze()` call. Within a
    /// pass, one task per sub-range of the radix space drains its radixes in
    /// ascending order, reading every set in index order `0..N-1`, and feeds
    /// each record to `index.add` in FIFO order. The sub-ranges are computed
    /// once and reused so both passes replay identical call sequences per
    /// task. The two-phase index counts on that.
    ///
    /// No two tasks share a radix, so `index.add` only ever sees
    /// partition-confined concurrency (see [`SeedIndex`]).
    ///
    /// # Errors
    /// The first `index` error aborts the whole freeze; partial results are
    /// not meaningful. This subsystem never retries.
    ///
    /// # Panics
    /// Panics if any set was already closed directly.
    pub fn freeze<I: SeedIndex + ?Sized>(mut self, index: &I) -> Result<()> {
        for set in &mut self.sets {
            set.close();
        }
        self.log_staging_summary();

        let ranges = split_ranges(self.radix_count(), self.sets.len());
        let sets = &self.sets;
        let lower_bits = self.lower_bits;

        for pass in 1..=2u32 {
            log::debug!("Seed index drain pass {pass} of 2 starting");
            self.pool.install(|| {
                ranges
                    .par_iter()
                    .cloned()
                    .try_for_each(|range| drain_range(sets, lower_bits, range, index))
            })?;
            index.freeze().map_err(|source| StageError::Drain { source })?;
        }
        Ok(())
    }

    /// Validate every set's block chains. Diagnostic only.
    ///
    /// # Errors
    /// Returns the first [`StageError::QueueCorrupt`] found.
    ///
    /// # Panics
    /// Panics if the sets have not been closed.
    pub fn check_integrity(&self) -> Result<()> {
        for set in &self.sets {
            set.check_integrity()?;
        }
        Ok(())
    }

    fn log_staging_summary(&self) {
        let mut entries = 0u64;
        let mut growths = 0u64;
        let mut bytes = 0usize;
        for (i, set) in self.sets.iter().enumerate() {
            let stats = set.memory_stats();
            log::debug!(
                "Queue set {i}: {} records, {} growth events, {}",
                format_count(stats.entries),
                format_count(stats.growths),
                format_bytes(stats.bytes),
            );
            entries += stats.entries;
            growths += stats.growths;
            bytes += stats.bytes;
        }
        log::info!(
            "Staged {} seed records in {} across {} queue sets ({} block growth events)",
            format_count(entries),
            format_bytes(bytes),
            self.sets.len(),
            format_count(growths),
        );
    }
}

/// Drain one contiguous radix sub-range from every set into the index.
///
/// Radixes ascend; within a radix, sets are read in index order; within a
/// set, records come out in FIFO insertion order. Deterministic for a given
/// closed collection.
fn drain_range<I: SeedIndex + ?Sized>(
    sets: &[QueueSet],
    lower_bits: u32,
    radixes: Range<usize>,
    index: &I,
) -> Result<()> {
    for radix in radixes {
        let radix_shifted = (radix as u64) << lower_bits;
        for set in sets {
            for (hash, id) in set.iter_bucket(radix, radix_shifted) {
                index.add(hash, id).map_err(|source| StageError::Drain { source })?;
            }
        }
    }
    Ok(())
}

/// Split `[0, n)` into `parts` contiguous ranges whose sizes differ by at
/// most one. Ranges may be empty when `parts > n`.
fn split_ranges(n: usize, parts: usize) -> Vec<Range<usize>> {
    let base = n / parts;
    let extra = n % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut lo = 0;
    for i in 0..parts {
        let width = base + usize::from(i < extra);
        ranges.push(lo..lo + width);
        lo += width;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radix_bits_selection() {
        // min(hash_bits, partition_bits, 10) with lower_bits the remainder.
        let queues = StagingQueues::new(2, 10, 1000, 20, 10).unwrap();
        assert_eq!(queues.radix_bits(), 10);
        assert_eq!(queues.lower_bits(), 0);
        assert_eq!(queues.radix_count(), 1024);
        assert_eq!(queues.threads(), 2);

        let queues = StagingQueues::new(1, 31, 0, 20, 7).unwrap();
        assert_eq!(queues.radix_bits(), 7);
        assert_eq!(queues.lower_bits(), 24);

        let queues = StagingQueues::new(1, 6, 0, 20, 30).unwrap();
        assert_eq!(queues.radix_bits(), 6);
        assert_eq!(queues.lower_bits(), 0);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(StagingQueues::new(0, 10, 0, 20, 10).is_err());
        assert!(StagingQueues::new(1, 0, 0, 20, 10).is_err());
        assert!(StagingQueues::new(1, 65, 0, 20, 10).is_err());
        assert!(StagingQueues::new(1, 10, 0, 0, 10).is_err());
        assert!(StagingQueues::new(1, 10, 0, 64, 10).is_err());
        assert!(StagingQueues::new(1, 10, 0, 20, 0).is_err());
    }

    #[test]
    fn test_split_ranges_balanced_and_contiguous() {
        for (n, parts) in [(1024, 4), (1000, 3), (7, 7), (5, 8), (1, 1)] {
            let ranges = split_ranges(n, parts);
            assert_eq!(ranges.len(), parts);
            assert_eq!(ranges[0].start, 0);
            assert_eq!(ranges[parts - 1].end, n);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            let min = ranges.iter().map(ExactSizeIterator::len).min().unwrap();
            let max = ranges.iter().map(ExactSizeIterator::len).max().unwrap();
            assert!(max - min <= 1, "unbalanced split for n={n} parts={parts}");
        }
    }

    #[test]
    fn test_split_ranges_deterministic() {
        assert_eq!(split_ranges(10, 3), split_ranges(10, 3));
        assert_eq!(split_ranges(10, 3), vec![0..4, 4..7, 7..10]);
    }

    #[test]
    fn test_total_entries_and_bytes() {
        let mut queues = StagingQueues::new(2, 12, 0, 20, 10).unwrap();
        queues.queue_mut(0).add(0x001, 1);
        queues.queue_mut(0).add(0x002, 2);
        queues.queue_mut(1).add(0x003, 3);
        assert_eq!(queues.total_entries(), 3);
        assert_eq!(queues.total_bytes(), 2 * queues.queue_mut(0).memory_stats().bytes);
    }
}
