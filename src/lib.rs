//! # parafn
//!
//! A **parallel map-reduce execution engine** that transparently parallelizes
//! a user-supplied function: it splits the function's arguments into
//! partitions, dispatches each partition as an independent task to a
//! pluggable worker backend, and combines the per-partition outputs into a
//! single result. Partition sizes adapt at runtime by fitting an online cost
//! model to observed task durations, so callers don't have to hand-tune a
//! chunk size.
//!
//! ## Core pieces
//!
//! - [`controller::ParallelFunction`] -- the wrapped callable. Construct one
//!   with a [`named_args::FunctionSignature`], the user function, an
//!   associative combiner, an identity element, and a [`partition::PartitionFunction`]
//!   splitter. Calling [`controller::ParallelFunction::invoke`] binds
//!   arguments, drives the adaptive partition loop, submits work to whatever
//!   [`backend::Backend`] is ambient, and reduces the results.
//! - [`backend`] -- the pluggable worker-pool contract ([`backend::Backend`]/
//!   [`backend::Session`]), plus the thread-local ambient backend and
//!   nested-call marker ([`backend::ambient`]).
//! - [`local_backend::ThreadPoolBackend`] -- the one concrete backend this
//!   crate ships, built on `rayon` (feature `local-backend`, on by default).
//! - [`estimator`] -- the online partition-size model
//!   ([`estimator::LinearRegressionEstimator`]) and the narrow
//!   [`estimator::PartitionSizeEstimator`] capability trait alternative
//!   strategies implement.
//! - [`partition`] -- the bidirectional partition-generator protocol.
//! - [`splitters`] -- generic, non-tabular reference splitters
//!   ([`splitters::by_row`], [`splitters::by_row2`]).
//! - [`named_args`] -- the function-signature/argument-binding model.
//! - [`trace`] -- per-partition timing records, human-readable profile
//!   printing, and CSV export (feature `profiling`).
//! - [`error::EngineError`] -- the error kinds callers can match on after an
//!   `invoke` call fails.
//! - [`testing`] -- a deterministic, single-threaded [`testing::TestBackend`]
//!   plus trace assertion helpers, for exercising `invoke` without a real
//!   thread pool.
//!
//! ## Quick start
//!
//! ```
//! use parafn::backend::ambient;
//! use parafn::controller::ParallelFunction;
//! use parafn::named_args::{FunctionSignature, NamedArguments, Parameter, Value};
//! use parafn::splitters::by_row;
//! use parafn::testing::TestBackend;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let signature = Arc::new(FunctionSignature::new(vec![Parameter::positional("values")])?);
//!
//! let sum_of_partition = ParallelFunction::new(
//!     "sum",
//!     signature,
//!     |args: NamedArguments| -> anyhow::Result<i64> {
//!         Ok(args.get::<Vec<i64>>("values").unwrap().iter().sum())
//!     },
//!     |a: i64, b: i64| Ok(a + b),
//!     || 0i64,
//!     by_row::<i64>("values"),
//! )
//! .with_fixed_partition_size(10usize)?;
//!
//! let _guard = ambient::with_backend(Arc::new(TestBackend::new()));
//! let total = sum_of_partition.invoke(
//!     vec![Arc::new((1..=100i64).collect::<Vec<i64>>()) as Value],
//!     HashMap::new(),
//! )?;
//! assert_eq!(total, 5050);
//! # Ok(())
//! # }
//! ```
//!
//! Without any ambient backend configured, `invoke` runs `function`
//! sequentially on the unsplit arguments and returns exactly what the bare
//! function would -- parafn never changes behavior, only how the work gets
//! scheduled.

pub mod backend;
pub mod controller;
pub mod error;
pub mod estimator;
pub mod named_args;
pub mod partition;
pub mod splitters;
pub mod testing;
pub mod trace;

#[cfg(feature = "local-backend")]
pub mod local_backend;

pub use backend::{ambient, Backend, Session};
pub use controller::{EstimatorFactory, ParallelFunction, SizeSpec};
pub use error::EngineError;
pub use estimator::{ConstantEstimator, LinearRegressionEstimator, PartitionSizeEstimator};
pub use named_args::{FunctionSignature, NamedArguments, Parameter, ParameterKind, Value};
pub use partition::{PartitionFunction, PartitionGenerator, PartitionStep};
pub use trace::{PartitionedTaskTrace, TaskTrace};
