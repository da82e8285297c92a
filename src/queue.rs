//! Per-producer radix-partitioned staging queues.
//!
//! A [`QueueSet`] holds one independent FIFO queue per radix bucket, all
//! carved out of a single private [`WordStore`]. One set belongs to exactly
//! one producer thread, so the insert path needs no locking at all.
//!
//! # Block chains
//!
//! Each bucket's records live in a chain of blocks inside the store. A block
//! of `len` words holds up to `len - 2` data words plus two trailing control
//! words, decoded through the `BlockTail` tagged union:
//!
//! ```text
//! [ low0 id0 low1 id1 ... ........ | tail payload | tail tag ]
//!   base                             end-1          end
//! ```
//!
//! While a block is the bucket's current block its control words are unused.
//! When it fills, a fresh block of [`MIN_BLOCK_SIZE`] words is appended to
//! the store and the old block's tail becomes a continuation pointing at it.
//! When the set is closed, the current block's tail becomes a terminal tail
//! carrying the saved write pointer.
//!
//! Block lengths are always even and records are written as word pairs, so a
//! full block's write pointer lands exactly on `end - 1` and a pair can
//! never straddle the control words.

use crate::errors::{Result, StageError};
use crate::store::WordStore;
use std::iter::FusedIterator;

/// Length in words of each continuation block.
///
/// Even, and large enough that a block spans several cache lines of words.
/// A tuning constant: correctness does not depend on its value.
pub const MIN_BLOCK_SIZE: usize = 128;

/// Per-bucket cursor state: four words per radix, kept in one flat array.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Offset of the bucket's first block.
    start: usize,
    /// Next write offset within the current block.
    curr: usize,
    /// Offset of the current block's last word (the tail tag).
    end: usize,
    /// Length of the current block in words.
    len: usize,
}

/// Control words trailing every block, decoded from the store.
///
/// The encoding packs the variant tag into the sign of the word at `end`:
/// non-negative means continuation (the payload at `end - 1` is the next
/// block's offset), negative means terminal (the payload is the saved write
/// pointer). Block lengths are at least 4, so the tag word is never zero for
/// a terminal tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockTail {
    /// The block filled up and the chain continues at `next`.
    Continuation { next: usize, len: usize },
    /// The block is the last in its chain; data ends at `used`.
    Terminal { used: usize, len: usize },
}

impl BlockTail {
    /// Decode the tail of the block whose last word sits at `end`.
    #[inline]
    fn read(store: &WordStore, end: usize) -> Self {
        let tag = store.get(end);
        let payload = store.get(end - 1) as usize;
        if tag >= 0 {
            Self::Continuation { next: payload, len: tag as usize }
        } else {
            Self::Terminal { used: payload, len: tag.unsigned_abs() as usize }
        }
    }

    /// Encode this tail into the block whose last word sits at `end`.
    #[inline]
    fn write(self, store: &mut WordStore, end: usize) {
        match self {
            Self::Continuation { next, len } => {
                store.set(end - 1, next as i64);
                store.set(end, len as i64);
            }
            Self::Terminal { used, len } => {
                store.set(end - 1, used as i64);
                store.set(end, -(len as i64));
            }
        }
    }
}

/// Memory and throughput statistics for one queue set.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueMemoryStats {
    /// Words allocated in the backing store.
    pub words: usize,
    /// Bytes allocated in the backing store.
    pub bytes: usize,
    /// Records staged into the set.
    pub entries: u64,
    /// Number of continuation blocks allocated.
    pub growths: u64,
}

/// One producer thread's radix-partitioned staging queues.
///
/// Records are `(hash, id)` pairs. The high `upper_bits` of each hash select
/// the bucket; only the low `lower_bits` are stored, and iteration
/// reconstructs the full hash from the bucket's radix.
///
/// # Lifecycle
///
/// A set is open on construction and accepts [`add`] until [`close`] is
/// called exactly once; after that only [`iter_bucket`] (and the
/// diagnostics) may be used. Misuse panics: these transitions are programmer
/// errors, not runtime conditions.
///
/// # Example
///
/// ```
/// use fgstage::QueueSet;
///
/// let mut set = QueueSet::new(2, 2, 16, 0).unwrap();
/// set.add(0b0110, 42); // radix 1, low bits 0b10
/// set.close();
/// let records: Vec<_> = set.iter_bucket(1, 1 << 2).collect();
/// assert_eq!(records, vec![(0b0110, 42)]);
/// ```
///
/// [`add`]: QueueSet::add
/// [`close`]: QueueSet::close
/// [`iter_bucket`]: QueueSet::iter_bucket
#[derive(Debug)]
pub struct QueueSet {
    store: WordStore,
    buckets: Vec<Bucket>,
    lower_bits: u32,
    upper_bits: u32,
    lower_mask: u64,
    value_bits: u32,
    /// Length in words of every bucket's first block.
    init_block_len: usize,
    closed: bool,
    entries: u64,
    growths: u64,
}

impl QueueSet {
    /// Create a set with `2^upper_bits` buckets.
    ///
    /// Each bucket's first block is sized from `estimated_entries` (the
    /// expected total across all buckets, assumed uniformly hashed) so that
    /// typical buckets never need a continuation block.
    ///
    /// # Errors
    /// Fails fast on bit widths that cannot work: `upper_bits` outside
    /// `[1, 24]`, `lower_bits + upper_bits > 64`, or `value_bits` outside
    /// `[1, 63]` (ids are stored in signed 64-bit words). Arguments are
    /// never silently clamped.
    pub fn new(
        lower_bits: u32,
        upper_bits: u32,
        value_bits: u32,
        estimated_entries: u64,
    ) -> Result<Self> {
        if upper_bits < 1 || upper_bits > 24 {
            return Err(StageError::invalid(
                "upper_bits",
                format!("must be in [1, 24], got {upper_bits}"),
            ));
        }
        if lower_bits + upper_bits > 64 {
            return Err(StageError::invalid(
                "lower_bits",
                format!("lower_bits + upper_bits must be <= 64, got {lower_bits} + {upper_bits}"),
            ));
        }
        if value_bits < 1 || value_bits > 63 {
            return Err(StageError::invalid(
                "value_bits",
                format!("must be in [1, 63], got {value_bits}"),
            ));
        }

        let radix_count = 1usize << upper_bits;
        let init_block_len = Self::initial_block_len(estimated_entries, radix_count);

        let mut store = WordStore::with_capacity(radix_count * init_block_len);
        let mut buckets = Vec::with_capacity(radix_count);
        for _ in 0..radix_count {
            let base = store.extend_by(init_block_len);
            buckets.push(Bucket {
                start: base,
                curr: base,
                end: base + init_block_len - 1,
                len: init_block_len,
            });
        }

        Ok(Self {
            store,
            buckets,
            lower_bits,
            upper_bits,
            lower_mask: if lower_bits == 0 { 0 } else { (1u64 << lower_bits) - 1 },
            value_bits,
            init_block_len,
            closed: false,
            entries: 0,
            growths: 0,
        })
    }

    /// First-block length: two words per expected record plus the control
    /// pair (always even), never below [`MIN_BLOCK_SIZE`].
    fn initial_block_len(estimated_entries: u64, radix_count: usize) -> usize {
        let per_bucket = estimated_entries.div_ceil(radix_count as u64);
        (2 * per_bucket as usize + 2).max(MIN_BLOCK_SIZE)
    }

    /// Stage one `(hash, id)` record.
    ///
    /// The caller guarantees `hash >> lower_bits < 2^upper_bits`. Writes the
    /// masked low hash bits and the id as two consecutive words. O(1)
    /// amortized; a full block triggers one store growth of
    /// [`MIN_BLOCK_SIZE`] words.
    ///
    /// # Panics
    /// Panics if the set has been closed, or if the hash's radix is out of
    /// range for this set.
    #[inline]
    pub fn add(&mut self, hash: u64, id: u64) {
        assert!(!self.closed, "add() called on a closed QueueSet");
        debug_assert!(
            self.value_bits == 63 || id >> self.value_bits == 0,
            "id {id} does not fit in {} value bits",
            self.value_bits
        );

        let radix = (hash >> self.lower_bits) as usize;
        if self.buckets[radix].curr >= self.buckets[radix].end - 1 {
            self.grow(radix);
        }

        let bucket = &mut self.buckets[radix];
        let at = bucket.curr;
        bucket.curr += 2;
        self.store.set(at, (hash & self.lower_mask) as i64);
        self.store.set(at + 1, id as i64);
        self.entries += 1;
    }

    /// Append a continuation block for `radix` and link the old block to it.
    fn grow(&mut self, radix: usize) {
        let next = self.store.extend_by(MIN_BLOCK_SIZE);
        let bucket = &mut self.buckets[radix];
        let old_end = bucket.end;
        let old_len = bucket.len;
        bucket.curr = next;
        bucket.end = next + MIN_BLOCK_SIZE - 1;
        bucket.len = MIN_BLOCK_SIZE;
        BlockTail::Continuation { next, len: old_len }.write(&mut self.store, old_end);
        self.growths += 1;
    }

    /// Close the set, writing every bucket's terminal tail.
    ///
    /// After closing, the set accepts [`iter_bucket`](Self::iter_bucket) but
    /// no further [`add`](Self::add) calls.
    ///
    /// # Panics
    /// Panics if called more than once.
    pub fn close(&mut self) {
        assert!(!self.closed, "close() called twice on a QueueSet");
        for bucket in &self.buckets {
            BlockTail::Terminal { used: bucket.curr, len: bucket.len }
                .write(&mut self.store, bucket.end);
        }
        self.closed = true;
    }

    /// Iterate one bucket's records in FIFO insertion order.
    ///
    /// `radix_shifted` is the bucket's radix pre-shifted into hash position;
    /// yielded hashes are `stored_low_bits | radix_shifted`.
    ///
    /// # Panics
    /// Panics if the set has not been closed, or if `radix` is out of range.
    #[must_use]
    pub fn iter_bucket(&self, radix: usize, radix_shifted: u64) -> BucketIter<'_> {
        assert!(self.closed, "iter_bucket() called before close()");
        let bucket = &self.buckets[radix];
        BucketIter::new(&self.store, bucket.start, self.init_block_len, radix_shifted)
    }

    /// Number of buckets (`2^upper_bits`).
    #[must_use]
    pub fn radix_count(&self) -> usize {
        self.buckets.len()
    }

    /// Low hash bits stored per record.
    #[must_use]
    pub fn lower_bits(&self) -> u32 {
        self.lower_bits
    }

    /// High hash bits selecting the bucket.
    #[must_use]
    pub fn upper_bits(&self) -> u32 {
        self.upper_bits
    }

    /// Bit width the caller promised ids fit in.
    #[must_use]
    pub fn value_bits(&self) -> u32 {
        self.value_bits
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Records staged so far.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.entries
    }

    /// Whether no records have been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Memory and throughput statistics for diagnostics.
    #[must_use]
    pub fn memory_stats(&self) -> QueueMemoryStats {
        QueueMemoryStats {
            words: self.store.len(),
            bytes: self.store.bytes(),
            entries: self.entries,
            growths: self.growths,
        }
    }

    /// Validate every bucket's block chain.
    ///
    /// Walks each chain from its first block: continuation offsets must be
    /// strictly increasing, every tail must record the length of the block it
    /// terminates, the terminal block must be the bucket's current block, and
    /// its saved write pointer must sit on a pair boundary inside the block.
    /// Diagnostic only; the insert and drain paths do not depend on it.
    ///
    /// # Errors
    /// Returns [`StageError::QueueCorrupt`] naming the first inconsistency.
    ///
    /// # Panics
    /// Panics if the set has not been closed.
    pub fn check_integrity(&self) -> Result<()> {
        assert!(self.closed, "check_integrity() called before close()");

        let corrupt = |radix: usize, offset: usize, reason: &str| {
            Err(StageError::QueueCorrupt { radix, offset, reason: reason.to_string() })
        };

        for (radix, bucket) in self.buckets.iter().enumerate() {
            let mut base = bucket.start;
            let mut len = self.init_block_len;
            loop {
                let end = base + len - 1;
                if end >= self.store.len() {
                    return corrupt(radix, end, "block extends past the store");
                }
                match BlockTail::read(&self.store, end) {
                    BlockTail::Continuation { next, len: stored } => {
                        if stored != len {
                            return corrupt(radix, end, "continuation tail length mismatch");
                        }
                        if next <= end {
                            return corrupt(radix, end - 1, "continuation offset not monotonic");
                        }
                        base = next;
                        len = MIN_BLOCK_SIZE;
                    }
                    BlockTail::Terminal { used, len: stored } => {
                        if stored != len {
                            return corrupt(radix, end, "terminal tail length mismatch");
                        }
                        if end != bucket.end {
                            return corrupt(radix, end, "terminal block is not the current block");
                        }
                        if used < base || used > end - 1 {
                            return corrupt(radix, end - 1, "write pointer outside its block");
                        }
                        if (used - base) % 2 != 0 {
                            return corrupt(radix, end - 1, "odd word count in terminal block");
                        }
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Cursor over one bucket's block chain, yielding `(hash, id)` records in
/// FIFO insertion order.
///
/// Created by [`QueueSet::iter_bucket`] on a closed set. Continuation tails
/// are followed transparently; a terminal tail ends iteration, and an
/// exhausted iterator stays exhausted.
#[derive(Debug)]
pub struct BucketIter<'a> {
    store: &'a WordStore,
    /// Next read offset.
    pos: usize,
    /// One past the last readable offset in the current block.
    limit: usize,
    /// Continuation target, if the current block has one.
    next_block: Option<usize>,
    radix_shifted: u64,
}

impl<'a> BucketIter<'a> {
    fn new(store: &'a WordStore, start: usize, first_block_len: usize, radix_shifted: u64) -> Self {
        let mut iter = Self { store, pos: 0, limit: 0, next_block: None, radix_shifted };
        iter.enter_block(start, first_block_len);
        iter
    }

    /// Position the cursor at `base` and decode that block's tail once.
    fn enter_block(&mut self, base: usize, len: usize) {
        let end = base + len - 1;
        self.pos = base;
        match BlockTail::read(self.store, end) {
            BlockTail::Continuation { next, .. } => {
                self.limit = end - 1;
                self.next_block = Some(next);
            }
            BlockTail::Terminal { used, .. } => {
                self.limit = used;
                self.next_block = None;
            }
        }
    }
}

impl Iterator for BucketIter<'_> {
    type Item = (u64, u64);

    #[inline]
    fn next(&mut self) -> Option<(u64, u64)> {
        while self.pos >= self.limit {
            let next = self.next_block?;
            self.enter_block(next, MIN_BLOCK_SIZE);
        }
        let low = self.store.get(self.pos) as u64;
        let id = self.store.get(self.pos + 1) as u64;
        self.pos += 2;
        Some((low | self.radix_shifted, id))
    }
}

impl FusedIterator for BucketIter<'_> {}
