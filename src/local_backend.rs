//! The one concrete [`Backend`] this crate ships: a `rayon`-backed thread
//! pool, used both as the default backend for real workloads and as the
//! backend this crate's own tests exercise.
//!
//! Submission is streaming rather than batched: the controller interleaves
//! partition generation with submission instead of partitioning everything
//! up front, so this backend accepts work one partition at a time and
//! applies bounded backpressure (`per_worker_queue_size`) instead of driving
//! `rayon` over a single pre-built `Vec`.

use crate::backend::{Backend, JobResult, PartitionJob, Preloaded, Session, TaskFn};
use crate::backend::ambient;
use crate::named_args::NamedArguments;
use anyhow::Result;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::time::Instant;

/// A `rayon`-backed [`Backend`].
///
/// `n_workers` sizes a dedicated `rayon::ThreadPool` (rather than the global
/// pool) so that a process using several `ThreadPoolBackend`s doesn't starve
/// them of each other. `per_worker_queue_size` bounds how many partitions may
/// be in flight (submitted but not yet completed) per worker before
/// `Session::submit` blocks.
pub struct ThreadPoolBackend {
    pool: Arc<rayon::ThreadPool>,
    max_in_flight: usize,
    allow_nested: bool,
}

impl ThreadPoolBackend {
    /// Builds a backend with `n_workers` threads (falling back to
    /// `num_cpus::get()` if `n_workers` is zero) and a submission queue sized
    /// `n_workers * per_worker_queue_size`.
    pub fn new(n_workers: usize, per_worker_queue_size: usize) -> Result<Self> {
        let n_workers = if n_workers == 0 { num_cpus::get() } else { n_workers };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_workers)
            .build()?;
        Ok(Self {
            pool: Arc::new(pool),
            max_in_flight: (n_workers * per_worker_queue_size.max(1)).max(1),
            allow_nested: false,
        })
    }

    /// Allows worker tasks on this backend to themselves call `invoke`. Off
    /// by default: a worker recursively submitting to the same bounded pool
    /// can deadlock if every thread is blocked waiting on its own nested
    /// call.
    #[must_use]
    pub fn allowing_nested_tasks(mut self) -> Self {
        self.allow_nested = true;
        self
    }
}

impl Backend for ThreadPoolBackend {
    fn allows_nested_tasks(&self) -> bool {
        self.allow_nested
    }

    fn open_session(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(ThreadPoolSession::new(
            Arc::clone(&self.pool),
            self.max_in_flight,
        )))
    }

    fn shutdown(&self) {
        // rayon::ThreadPool has no explicit shutdown; dropping the last Arc
        // reference tears its threads down.
    }
}

struct ThreadPoolSession {
    pool: Arc<rayon::ThreadPool>,
    permit_tx: SyncSender<()>,
    permit_rx: Receiver<()>,
    results_tx: Sender<JobResult>,
    results_rx: Receiver<JobResult>,
    submitted: usize,
    completed: usize,
    submissions_finished: bool,
}

impl ThreadPoolSession {
    fn new(pool: Arc<rayon::ThreadPool>, max_in_flight: usize) -> Self {
        let (permit_tx, permit_rx) = mpsc::sync_channel(max_in_flight);
        for _ in 0..max_in_flight {
            permit_tx.send(()).expect("freshly created channel accepts a full buffer");
        }
        let (results_tx, results_rx) = mpsc::channel();
        Self {
            pool,
            permit_tx,
            permit_rx,
            results_tx,
            results_rx,
            submitted: 0,
            completed: 0,
            submissions_finished: false,
        }
    }
}

impl Session for ThreadPoolSession {
    fn preload(&mut self, value: NamedArguments) -> Result<Preloaded> {
        Ok(Preloaded(Arc::new(value)))
    }

    fn submit(&mut self, task: Arc<TaskFn>, preloaded: &Preloaded, job: PartitionJob) -> Result<()> {
        // Blocks when `max_in_flight` partitions are already outstanding,
        // applying backpressure to the controller's submission loop.
        self.permit_rx.recv().ok();

        self.submitted += 1;
        let results_tx = self.results_tx.clone();
        let permit_tx = self.permit_tx.clone();
        let preloaded = Arc::clone(&preloaded.0);
        let nested_backend = ambient::current_backend();

        self.pool.spawn(move || {
            let _task_marker = ambient::mark_in_task();
            let _backend_guard = nested_backend.map(ambient::with_backend);

            let started = Instant::now();
            let outcome = (*preloaded)
                .clone()
                .merge(job.payload)
                .and_then(|merged| task(merged));
            let task_duration = started.elapsed();

            let _ = results_tx.send(JobResult {
                index: job.index,
                output: outcome,
                task_duration,
            });
            let _ = permit_tx.send(());
        });

        Ok(())
    }

    fn finish_submissions(&mut self) {
        self.submissions_finished = true;
    }

    fn recv(&mut self) -> Option<JobResult> {
        if self.completed >= self.submitted && self.submissions_finished {
            return None;
        }
        let result = self.results_rx.recv().ok()?;
        self.completed += 1;
        Some(result)
    }

    fn try_recv(&mut self) -> Option<JobResult> {
        if self.completed >= self.submitted && self.submissions_finished {
            return None;
        }
        let result = self.results_rx.try_recv().ok()?;
        self.completed += 1;
        Some(result)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TaskOutput;
    use crate::named_args::{FunctionSignature, Parameter};
    use std::time::Duration;

    fn signature() -> Arc<FunctionSignature> {
        Arc::new(FunctionSignature::new(vec![Parameter::positional("x")]).unwrap())
    }

    #[test]
    fn submits_and_collects_results_for_every_job() {
        let backend = ThreadPoolBackend::new(2, 2).unwrap();
        let mut session = backend.open_session().unwrap();

        let preloaded = session.preload(NamedArguments::empty(signature())).unwrap();
        let task: Arc<TaskFn> = Arc::new(|named: NamedArguments| -> Result<TaskOutput> {
            let x = *named.get::<i64>("x").unwrap();
            Ok(Box::new(x * 2))
        });

        let n = 8;
        for i in 0..n {
            let mut payload = NamedArguments::empty(signature());
            payload.insert("x", i as i64).unwrap();
            let job = PartitionJob {
                index: i,
                payload,
                partition_size: 1,
                partition_duration: Duration::ZERO,
            };
            session.submit(Arc::clone(&task), &preloaded, job).unwrap();
        }
        session.finish_submissions();

        let mut results = Vec::new();
        while let Some(result) = session.recv() {
            results.push(result);
        }
        assert_eq!(results.len(), n);
        for result in &results {
            let output = result.output.as_ref().unwrap();
            let value = output.downcast_ref::<i64>().unwrap();
            assert_eq!(*value, (result.index as i64) * 2);
        }
    }
}
