//! The partition-generator protocol.
//!
//! A splitter hands the controller a lazy, resumable source of partitions
//! rather than a pre-computed list: the controller requests a size, the
//! generator slices off that much of the remaining input (or less, if less
//! remains) and hands back the slice. Since Rust has no bidirectional
//! coroutines, that exchange is expressed as an explicit two-method trait
//! instead of a single generator function: [`PartitionGenerator::start`]
//! primes it, and [`PartitionGenerator::next`] both receives the requested
//! size and returns the next chunk (or [`PartitionStep::End`]).

use crate::named_args::NamedArguments;
use anyhow::Result;

/// One step of a partition generator's output.
pub enum PartitionStep {
    /// A partition was produced. `actual_size` may differ from the size
    /// requested by the controller; the controller validates and clamps it
    /// before submitting the partition for execution.
    Item {
        actual_size: usize,
        payload: NamedArguments,
    },
    /// No more partitions remain.
    End,
}

/// A (possibly stateful) source of partitions over a bound [`NamedArguments`].
///
/// Implementations are driven by the controller's adaptive partition loop:
/// `start` once, then `next` repeatedly until `PartitionStep::End`.
pub trait PartitionGenerator: Send {
    /// Primes the generator. Called exactly once before the first `next`.
    fn start(&mut self) -> Result<()>;

    /// Produces the next partition, sized as close to `requested_size` as the
    /// remaining input allows. Implementations must never return an
    /// `actual_size` greater than `requested_size` except for the
    /// unavoidable case of a final partial chunk smaller than requested.
    fn next(&mut self, requested_size: usize) -> Result<PartitionStep>;

    /// A best-effort count of input units not yet consumed, used to bound
    /// the estimator's size recommendations. Returns `None` when the
    /// generator has no cheap way to know how much input remains (for
    /// example, an unbounded or externally-fed stream).
    fn remaining(&self) -> Option<usize> {
        None
    }
}

/// Splits a bound [`NamedArguments`] into the part that is shared by every
/// partition (`non_partitioned`) and a generator over the part that is
/// divided across partitions (see `splitters::by_row` for a concrete,
/// row-oriented implementation).
pub type PartitionFunction =
    Box<dyn Fn(NamedArguments) -> Result<(NamedArguments, Box<dyn PartitionGenerator>)> + Send + Sync>;
