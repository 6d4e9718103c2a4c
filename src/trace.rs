//! Profiling trace records and their export.
//!
//! A collector accumulates per-partition timing records during a run, then
//! either prints a human-readable summary (`print_profile_trace`) or exports
//! them in a row-oriented tabular form (`export_csv`, feature `profiling`).

use std::time::Duration;

/// Timing breakdown for a single partition's round trip through the
/// controller: generation, the worker task itself, and (for the partition
/// that happened to finish the combine step) the combine call.
#[derive(Debug, Clone, Copy)]
pub struct PartitionedTaskTrace {
    pub partition_index: usize,
    pub partition_size: usize,
    pub partition_duration: Duration,
    pub task_duration: Duration,
    pub combine_duration: Option<Duration>,
}

impl PartitionedTaskTrace {
    pub fn new(partition_index: usize, partition_size: usize, partition_duration: Duration) -> Self {
        Self {
            partition_index,
            partition_size,
            partition_duration,
            task_duration: Duration::ZERO,
            combine_duration: None,
        }
    }
}

/// The full trace for one `invoke` call: every partition's
/// [`PartitionedTaskTrace`], plus the estimator's final fitted parameters
/// if one was in use.
#[derive(Debug, Clone, Default)]
pub struct TaskTrace {
    pub partitions: Vec<PartitionedTaskTrace>,
    pub estimator_state: Option<crate::estimator::EstimatorState>,
    pub total_duration: Duration,
}

impl TaskTrace {
    pub fn record(&mut self, trace: PartitionedTaskTrace) {
        self.partitions.push(trace);
    }
}

/// Prints a human-readable summary of `trace` to stderr: a banner, one line
/// per partition, and a closing totals line.
pub fn print_profile_trace(name: &str, trace: &TaskTrace) {
    eprintln!("=== parafn profile: {name} ===");
    eprintln!(
        "{:>6}  {:>10}  {:>14}  {:>14}  {:>16}",
        "part#", "size", "partition(ms)", "task(ms)", "combine(ms)"
    );
    for partition in &trace.partitions {
        eprintln!(
            "{:>6}  {:>10}  {:>14.3}  {:>14.3}  {:>16}",
            partition.partition_index,
            partition.partition_size,
            partition.partition_duration.as_secs_f64() * 1000.0,
            partition.task_duration.as_secs_f64() * 1000.0,
            partition
                .combine_duration
                .map(|d| format!("{:.3}", d.as_secs_f64() * 1000.0))
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    if let Some(state) = trace.estimator_state {
        eprintln!(
            "estimator: alpha={:.6} beta={:.6} r_squared={:.3} samples={}",
            state.alpha, state.beta, state.r_squared, state.sample_count
        );
    }
    eprintln!(
        "total: {:.3} ms across {} partition(s)",
        trace.total_duration.as_secs_f64() * 1000.0,
        trace.partitions.len()
    );
}

/// Exports `trace` as the documented row-oriented tabular form:
/// `partition_index, size, partition_duration_ms, task_duration_ms, combine_duration_ms`.
#[cfg(feature = "profiling")]
pub fn export_csv<W: std::io::Write>(trace: &TaskTrace, writer: W) -> anyhow::Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        "partition_index",
        "size",
        "partition_duration_ms",
        "task_duration_ms",
        "combine_duration_ms",
    ])?;
    for partition in &trace.partitions {
        csv_writer.write_record(&[
            partition.partition_index.to_string(),
            partition.partition_size.to_string(),
            (partition.partition_duration.as_secs_f64() * 1000.0).to_string(),
            (partition.task_duration.as_secs_f64() * 1000.0).to_string(),
            partition
                .combine_duration
                .map(|d| (d.as_secs_f64() * 1000.0).to_string())
                .unwrap_or_default(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(all(test, feature = "profiling"))]
mod tests {
    use super::*;

    #[test]
    fn export_csv_writes_header_and_rows() {
        let mut trace = TaskTrace::default();
        trace.record(PartitionedTaskTrace {
            partition_index: 0,
            partition_size: 4,
            partition_duration: Duration::from_millis(1),
            task_duration: Duration::from_millis(5),
            combine_duration: Some(Duration::from_millis(1)),
        });

        let mut buffer = Vec::new();
        export_csv(&trace, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("partition_index,size,"));
        assert!(text.contains("0,4,"));
    }
}
