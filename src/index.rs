//! The seed-index sink that staged records are drained into.

/// A two-phase seed index under construction.
///
/// The index is an external collaborator: this crate only replays staged
/// `(hash, id)` records into it. [`StagingQueues::freeze`] drives it through
/// two identical passes: conventionally a size-probe pass that counts
/// records per key, then a populate pass that writes them into the sized
/// structure, calling [`freeze`](SeedIndex::freeze) once at the end of each
/// pass.
///
/// # Concurrency contract
///
/// `add` is called concurrently from multiple drain tasks, but each calling
/// task's keys are confined to a disjoint radix partition (a contiguous
/// range of `hash >> lower_bits` values). Implementations must tolerate
/// exactly this much concurrency, typically by sharding internal state by
/// the same high hash bits. Unconfined concurrent `add` calls are never
/// made. `freeze` is called from a single thread after all drain tasks have
/// joined.
///
/// [`StagingQueues::freeze`]: crate::StagingQueues::freeze
pub trait SeedIndex: Send + Sync {
    /// Accept one staged record.
    ///
    /// # Errors
    /// Any error aborts the surrounding drain pass; no retry is attempted.
    fn add(&self, hash: u64, id: u64) -> anyhow::Result<()>;

    /// Finish the current pass.
    ///
    /// Called once per drain pass, after every record has been replayed and
    /// all drain tasks have joined.
    ///
    /// # Errors
    /// Any error aborts the freeze.
    fn freeze(&self) -> anyhow::Result<()>;
}
