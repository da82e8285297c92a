#![deny(unsafe_code)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::manual_range_contains,
    clippy::uninlined_format_args
)]

//! # fgstage - Staging Queues for Seed-Index Construction
//!
//! Radix-partitioned, multi-threaded bulk-loading queues for building the
//! seed index of a genomic read mapper. Parallel hashing producers emit
//! large volumes of `(hash, id)` records; this crate stages them without any
//! cross-thread contention and later replays them, twice and in a
//! deterministic order, into a caller-supplied two-phase [`SeedIndex`].
//!
//! ## Overview
//!
//! - **[`queue`]** - per-producer [`QueueSet`]s: one linked-block FIFO queue
//!   per radix bucket, carved out of a private flat [`WordStore`]
//! - **[`bank`]** - the [`StagingQueues`] collection: radix bit-width
//!   selection, close, and the two-pass partitioned parallel drain
//! - **[`index`]** - the [`SeedIndex`] boundary trait and its concurrency
//!   contract
//! - **[`store`]** - the growable flat word array backing each set
//!
//! ## Phases
//!
//! 1. **Insert**: each producer thread owns one `QueueSet` (`&mut`) and
//!    calls [`QueueSet::add`]; no locks, no shared mutable state.
//! 2. **Freeze**: [`StagingQueues::freeze`] closes every set, then drains
//!    all of them into the index twice over an owned thread pool, with the
//!    radix space split into disjoint per-task sub-ranges. Both passes
//!    replay identical record sequences, which a size-probe/populate index
//!    requires.
//!
//! ## Quick Start
//!
//! ```
//! use fgstage::{SeedIndex, StagingQueues};
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! /// Sink that just counts what it is fed.
//! struct CountingIndex(AtomicU64);
//!
//! impl SeedIndex for CountingIndex {
//!     fn add(&self, _hash: u64, _id: u64) -> anyhow::Result<()> {
//!         self.0.fetch_add(1, Ordering::Relaxed);
//!         Ok(())
//!     }
//!     fn freeze(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut queues = StagingQueues::new(4, 20, 100_000, 32, 13)?;
//!
//! // Insert phase: hand one set to each producer thread.
//! std::thread::scope(|scope| {
//!     for (thread_id, set) in queues.queues_mut().iter_mut().enumerate() {
//!         scope.spawn(move || {
//!             for i in 0..1_000u64 {
//!                 let hash = (i * 0x9E37_79B9) & 0xF_FFFF;
//!                 set.add(hash, (thread_id as u64) * 1_000_000 + i);
//!             }
//!         });
//!     }
//! });
//!
//! // Freeze: two deterministic drain passes into the index.
//! let index = CountingIndex(AtomicU64::new(0));
//! queues.freeze(&index)?;
//! assert_eq!(index.0.load(Ordering::Relaxed), 2 * 4 * 1_000);
//! # Ok(())
//! # }
//! ```

pub mod bank;
pub mod errors;
pub mod index;
pub mod logging;
pub mod queue;
pub mod store;

pub use bank::StagingQueues;
pub use errors::{Result, StageError};
pub use index::SeedIndex;
pub use queue::{BucketIter, QueueMemoryStats, QueueSet, MIN_BLOCK_SIZE};
pub use store::WordStore;
