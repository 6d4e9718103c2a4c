//! Deterministic, in-process test backend and trace assertion helpers.
//!
//! [`TestBackend`] runs every submitted task synchronously on the calling
//! thread, in submission order -- no `rayon`, no real concurrency -- so unit
//! tests can exercise [`crate::controller::ParallelFunction::invoke`]
//! deterministically without spinning up a thread pool. A purpose-built test
//! double plus a handful of assertion helpers is enough to cover this
//! engine's own contract.

use crate::backend::{ambient, Backend, JobResult, PartitionJob, Preloaded, Session, TaskFn};
use crate::named_args::NamedArguments;
use crate::trace::TaskTrace;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// A single-threaded, synchronous [`Backend`] for tests.
///
/// Every `submit` call runs the task immediately and pushes its result onto
/// an internal FIFO, so `recv`/`try_recv` always return results in
/// submission order -- unlike [`crate::local_backend::ThreadPoolBackend`],
/// which completes out of order. Useful for asserting exact trace contents
/// without accounting for scheduling nondeterminism.
pub struct TestBackend {
    allow_nested: bool,
}

impl TestBackend {
    pub fn new() -> Self {
        Self { allow_nested: false }
    }

    /// Allows worker tasks on this backend to themselves call `invoke`,
    /// exercising the nesting-allowed path of nested-call detection.
    #[must_use]
    pub fn allowing_nested_tasks(mut self) -> Self {
        self.allow_nested = true;
        self
    }
}

impl Default for TestBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for TestBackend {
    fn allows_nested_tasks(&self) -> bool {
        self.allow_nested
    }

    fn open_session(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(TestSession::default()))
    }

    fn shutdown(&self) {}
}

#[derive(Default)]
struct TestSession {
    queue: VecDeque<JobResult>,
}

impl Session for TestSession {
    fn preload(&mut self, value: NamedArguments) -> Result<Preloaded> {
        Ok(Preloaded(Arc::new(value)))
    }

    fn submit(&mut self, task: Arc<TaskFn>, preloaded: &Preloaded, job: PartitionJob) -> Result<()> {
        let _task_marker = ambient::mark_in_task();
        let started = Instant::now();
        let outcome = (*preloaded.0)
            .clone()
            .merge(job.payload)
            .and_then(|merged| task(merged));
        self.queue.push_back(JobResult {
            index: job.index,
            output: outcome,
            task_duration: started.elapsed(),
        });
        Ok(())
    }

    fn finish_submissions(&mut self) {}

    fn recv(&mut self) -> Option<JobResult> {
        self.queue.pop_front()
    }

    fn try_recv(&mut self) -> Option<JobResult> {
        self.queue.pop_front()
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Asserts that `trace` covers exactly `total_units` input items: the sum of
/// every partition's size equals the total number of units partitioned.
///
/// # Panics
///
/// Panics if the partition sizes in `trace` don't sum to `total_units`.
pub fn assert_partition_cover(trace: &TaskTrace, total_units: usize) {
    let covered: usize = trace.partitions.iter().map(|p| p.partition_size).sum();
    assert_eq!(
        covered, total_units,
        "partition sizes {:?} should sum to {total_units}",
        trace.partitions.iter().map(|p| p.partition_size).collect::<Vec<_>>()
    );
}

/// Asserts the exact sequence of partition sizes a run produced, in
/// submission order.
///
/// # Panics
///
/// Panics if the observed sizes don't match `expected`.
pub fn assert_partition_sizes(trace: &TaskTrace, expected: &[usize]) {
    let actual: Vec<usize> = trace.partitions.iter().map(|p| p.partition_size).collect();
    assert_eq!(
        actual, expected,
        "partition sizes mismatch:\n  expected: {expected:?}\n  actual: {actual:?}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TaskOutput;
    use crate::named_args::{FunctionSignature, Parameter};
    use std::sync::Arc as StdArc;

    #[test]
    fn test_backend_runs_synchronously_in_submission_order() {
        let backend = TestBackend::new();
        let mut session = backend.open_session().unwrap();
        let signature = StdArc::new(FunctionSignature::new(vec![Parameter::positional("x")]).unwrap());
        let preloaded = session
            .preload(NamedArguments::empty(StdArc::clone(&signature)))
            .unwrap();

        let task: Arc<TaskFn> = Arc::new(|args: NamedArguments| -> Result<TaskOutput> {
            Ok(Box::new(*args.get::<i64>("x").unwrap()))
        });

        for i in 0..5 {
            let mut payload = NamedArguments::empty(StdArc::clone(&signature));
            payload.insert("x", i as i64).unwrap();
            session
                .submit(
                    Arc::clone(&task),
                    &preloaded,
                    PartitionJob {
                        index: i,
                        payload,
                        partition_size: 1,
                        partition_duration: std::time::Duration::ZERO,
                    },
                )
                .unwrap();
        }
        session.finish_submissions();

        let mut seen = Vec::new();
        while let Some(result) = session.recv() {
            seen.push(*result.output.unwrap().downcast::<i64>().unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
