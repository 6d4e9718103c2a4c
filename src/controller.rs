//! The execution controller: `invoke` and the adaptive partition-size loop.
//!
//! `ParallelFunction` is the wrapped, parallelized callable: a small builder
//! that owns a [`FunctionSignature`], the user function, an associative
//! combiner, a [`PartitionFunction`] splitter, and an estimator factory, and
//! drives them through one invocation on every call: bind arguments, split
//! into partitions, submit to a backend session, feed the estimator, combine
//! results in order, and release the session.

use crate::backend::{
    ambient, Backend, JobResult, PartitionJob, Preloaded, Session, TaskFn, TaskOutput,
};
use crate::error::EngineError;
use crate::estimator::{LinearRegressionEstimator, PartitionSizeEstimator};
use crate::named_args::{FunctionSignature, NamedArguments, Value};
use crate::partition::{PartitionFunction, PartitionGenerator, PartitionStep};
use crate::trace::{PartitionedTaskTrace, TaskTrace};
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "profiling")]
use std::path::PathBuf;

/// An integer or a callable of the bound call arguments. Both size options
/// accept either form.
#[derive(Clone)]
pub struct SizeSpec(Arc<dyn Fn(&NamedArguments) -> usize + Send + Sync>);

impl SizeSpec {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&NamedArguments) -> usize + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    fn resolve(&self, args: &NamedArguments) -> usize {
        (self.0)(args).max(1)
    }
}

impl From<usize> for SizeSpec {
    fn from(size: usize) -> Self {
        SizeSpec::from_fn(move |_| size)
    }
}

/// Constructs a fresh estimator for one `invoke` call. `cold_start_seed` is
/// `Some(n)` when `initial_partition_size` was supplied, so the estimator can
/// continue the cold-start doubling sequence from `n` instead of `1`.
pub type EstimatorFactory =
    Arc<dyn Fn(Option<usize>) -> Box<dyn PartitionSizeEstimator> + Send + Sync>;

fn default_estimator_factory() -> EstimatorFactory {
    Arc::new(|cold_start_seed| {
        let mut estimator = LinearRegressionEstimator::new();
        if let Some(seed) = cold_start_seed {
            // The controller already used `seed` for the first partition
            // explicitly; the next cold-start request should double it.
            estimator = estimator.with_cold_start_size((seed * 2).max(2));
        }
        Box::new(estimator)
    })
}

/// A scoped `Box<dyn Session>` that is closed on every exit path -- including
/// `?`-propagated errors -- via `Drop`, so a session is never leaked
/// regardless of how `invoke` returns.
struct SessionGuard {
    session: Box<dyn Session>,
}

impl std::ops::Deref for SessionGuard {
    type Target = dyn Session;
    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl std::ops::DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let _ = self.session.close();
    }
}

/// A wrapped, parallelized callable.
///
/// `Out` is the user function's return type -- the same type the combiner
/// reduces over. Internally, results cross the backend boundary as
/// `Box<dyn Any + Send + Sync>`, downcast back to `Out` once the controller
/// regains ownership.
pub struct ParallelFunction<Out> {
    name: String,
    signature: Arc<FunctionSignature>,
    function: Arc<dyn Fn(NamedArguments) -> Result<Out> + Send + Sync>,
    combiner: Arc<dyn Fn(Out, Out) -> Result<Out> + Send + Sync>,
    identity: Arc<dyn Fn() -> Out + Send + Sync>,
    splitter: PartitionFunction,
    initial_partition_size: Option<SizeSpec>,
    fixed_partition_size: Option<SizeSpec>,
    estimator_factory: EstimatorFactory,
    profile: bool,
    #[cfg(feature = "profiling")]
    trace_export: Option<PathBuf>,
}

impl<Out: Send + Sync + 'static> ParallelFunction<Out> {
    /// Builds a wrapped callable. `identity` is the value returned when the
    /// input splits into zero partitions (an empty input yields the
    /// combiner's identity element rather than submitting any work).
    pub fn new(
        name: impl Into<String>,
        signature: Arc<FunctionSignature>,
        function: impl Fn(NamedArguments) -> Result<Out> + Send + Sync + 'static,
        combiner: impl Fn(Out, Out) -> Result<Out> + Send + Sync + 'static,
        identity: impl Fn() -> Out + Send + Sync + 'static,
        splitter: PartitionFunction,
    ) -> Self {
        Self {
            name: name.into(),
            signature,
            function: Arc::new(function),
            combiner: Arc::new(combiner),
            identity: Arc::new(identity),
            splitter,
            initial_partition_size: None,
            fixed_partition_size: None,
            estimator_factory: default_estimator_factory(),
            profile: false,
            #[cfg(feature = "profiling")]
            trace_export: None,
        }
    }

    /// Seeds the estimator's first partition only; every subsequent
    /// partition uses the estimator's recommendation.
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] if `fixed_partition_size` is already
    /// set -- the two options are mutually exclusive.
    pub fn with_initial_partition_size(mut self, size: impl Into<SizeSpec>) -> Result<Self> {
        if self.fixed_partition_size.is_some() {
            bail!(EngineError::Configuration(
                "initial_partition_size and fixed_partition_size are mutually exclusive".into()
            ));
        }
        self.initial_partition_size = Some(size.into());
        Ok(self)
    }

    /// Disables the estimator entirely; every partition requests this size
    /// (the generator may still yield a smaller final partial partition).
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] if `initial_partition_size` is already
    /// set.
    pub fn with_fixed_partition_size(mut self, size: impl Into<SizeSpec>) -> Result<Self> {
        if self.initial_partition_size.is_some() {
            bail!(EngineError::Configuration(
                "initial_partition_size and fixed_partition_size are mutually exclusive".into()
            ));
        }
        self.fixed_partition_size = Some(size.into());
        Ok(self)
    }

    /// Overrides the default [`LinearRegressionEstimator`] factory, e.g. with
    /// a `ConstantEstimator` or a custom strategy.
    #[must_use]
    pub fn with_estimator_factory(mut self, factory: EstimatorFactory) -> Self {
        self.estimator_factory = factory;
        self
    }

    /// Enables the human-readable profile summary printed at the end of
    /// every invocation.
    #[must_use]
    pub fn with_profile(mut self, profile: bool) -> Self {
        self.profile = profile;
        self
    }

    /// Configures a path to export the tabular trace to after every
    /// invocation. Requires the `profiling` feature.
    #[cfg(feature = "profiling")]
    #[must_use]
    pub fn with_trace_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.trace_export = Some(path.into());
        self
    }

    /// Binds `positional`/`named` against the signature and executes,
    /// transparently parallelizing when a backend is configured and
    /// returning the same result the bare function would.
    pub fn invoke(&self, positional: Vec<Value>, named: HashMap<String, Value>) -> Result<Out> {
        self.invoke_with_trace(positional, named).map(|(out, _)| out)
    }

    /// Like [`invoke`](Self::invoke), but also returns the [`TaskTrace`]
    /// recorded for the call -- the sequential fallback path (no backend, or
    /// nested parallelism under a non-nesting backend) produces an empty
    /// trace, since no partitions were ever submitted.
    pub fn invoke_with_trace(
        &self,
        positional: Vec<Value>,
        named: HashMap<String, Value>,
    ) -> Result<(Out, TaskTrace)> {
        let bound = self.signature.assign(positional, named)?;

        let backend = match ambient::current_backend() {
            Some(backend) => backend,
            None => {
                eprintln!(
                    "warning: parafn: no backend configured for `{}`; running sequentially",
                    self.name
                );
                return Ok(((self.function)(bound)?, TaskTrace::default()));
            }
        };

        if ambient::is_nested_parallelism() && !backend.allows_nested_tasks() {
            eprintln!(
                "warning: parafn: nested parallel call to `{}` under a non-nesting backend; \
                 running sequentially",
                self.name
            );
            return Ok(((self.function)(bound)?, TaskTrace::default()));
        }

        self.invoke_parallel(bound, backend)
    }

    fn invoke_parallel(
        &self,
        bound: NamedArguments,
        backend: ambient::BackendHandle,
    ) -> Result<(Out, TaskTrace)> {
        let size_args = bound.clone();
        let (non_partitioned, mut generator) = (self.splitter)(bound)?;
        generator.start()?;

        let mut session = SessionGuard {
            session: backend.open_session()?,
        };
        let preloaded: Preloaded = session.preload(non_partitioned)?;

        let cold_start_seed = self
            .initial_partition_size
            .as_ref()
            .map(|spec| spec.resolve(&size_args));
        let mut estimator = (self.estimator_factory)(cold_start_seed);

        let function = Arc::clone(&self.function);
        let task: Arc<TaskFn> = Arc::new(move |args: NamedArguments| -> Result<TaskOutput> {
            let out = function(args)?;
            Ok(Box::new(out) as TaskOutput)
        });

        let mut trace = TaskTrace::default();
        let wall_clock_start = Instant::now();

        let mut submitted = 0usize;
        let mut still_generating = true;
        let mut first_request = true;
        let mut pending: HashMap<usize, JobResult> = HashMap::new();
        let mut next_to_combine = 0usize;
        let mut accumulator: Option<Out> = None;

        while still_generating || next_to_combine < submitted {
            if still_generating {
                let requested = if let Some(spec) = &self.fixed_partition_size {
                    spec.resolve(&size_args)
                } else if first_request {
                    if let Some(spec) = &self.initial_partition_size {
                        spec.resolve(&size_args)
                    } else {
                        estimator.next_size(generator.remaining().unwrap_or(usize::MAX))
                    }
                } else {
                    estimator.next_size(generator.remaining().unwrap_or(usize::MAX))
                };
                first_request = false;

                let partition_started = Instant::now();
                let step = generator.next(requested)?;
                let partition_duration = partition_started.elapsed();

                match step {
                    PartitionStep::End => {
                        still_generating = false;
                        session.finish_submissions();
                    }
                    PartitionStep::Item {
                        actual_size,
                        payload,
                    } => {
                        if actual_size == 0 || actual_size > requested {
                            bail!(EngineError::InvalidPartition(format!(
                                "generator yielded actual_size {actual_size} for a request of \
                                 {requested}"
                            )));
                        }
                        let index = submitted;
                        trace.record(PartitionedTaskTrace::new(
                            index,
                            actual_size,
                            partition_duration,
                        ));
                        session.submit(
                            Arc::clone(&task),
                            &preloaded,
                            PartitionJob {
                                index,
                                payload,
                                partition_size: actual_size,
                                partition_duration,
                            },
                        )?;
                        submitted += 1;
                    }
                }
            }

            // Drain whatever has completed so far without blocking partition
            // generation on it; completions interleave with generation
            // rather than gating it. Once no more partitions remain to
            // submit, block for the rest.
            let completed = if still_generating {
                session.try_recv()
            } else {
                session.recv()
            };

            let Some(job_result) = completed else {
                continue;
            };

            let slot = &mut trace.partitions[job_result.index];
            slot.task_duration = job_result.task_duration;
            // Estimator feedback happens in completion order; the cost
            // model is order-insensitive so this is fine.
            estimator.observe(slot.partition_size, job_result.task_duration);

            let output = match job_result.output {
                Ok(output) => output,
                Err(err) => {
                    bail!(EngineError::WorkerFailure {
                        partition_index: job_result.index,
                        source: format!("{err:#}"),
                    });
                }
            };
            pending.insert(job_result.index, JobResult {
                index: job_result.index,
                output: Ok(output),
                task_duration: job_result.task_duration,
            });

            // Results reach the combiner in submission order regardless of
            // completion order.
            while let Some(ready) = pending.remove(&next_to_combine) {
                let output = ready
                    .output
                    .expect("only Ok outputs are ever staged in `pending`");
                let value = *output
                    .downcast::<Out>()
                    .map_err(|_| anyhow!("internal error: worker output type mismatch"))?;

                let combine_started = Instant::now();
                accumulator = Some(match accumulator.take() {
                    None => value,
                    Some(acc) => (self.combiner)(acc, value)?,
                });
                let combine_duration = combine_started.elapsed();
                trace.partitions[next_to_combine].combine_duration = Some(combine_duration);
                next_to_combine += 1;
            }
        }

        trace.total_duration = wall_clock_start.elapsed();
        trace.estimator_state = estimator.state();

        // Close explicitly so profile printing/export below observes a
        // fully-released session; the `Drop` impl makes this idempotent.
        session.close()?;

        if self.profile {
            crate::trace::print_profile_trace(&self.name, &trace);
        }
        #[cfg(feature = "profiling")]
        if let Some(path) = &self.trace_export {
            let file = std::fs::File::create(path)?;
            crate::trace::export_csv(&trace, file)?;
        }

        Ok(accumulator.unwrap_or_else(|| (self.identity)()))
    }
}
