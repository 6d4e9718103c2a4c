// Integration tests driven entirely through the public API, against both the
// deterministic `TestBackend` and the real `rayon`-backed `ThreadPoolBackend`.

#![cfg(feature = "local-backend")]

use anyhow::{bail, Result};
use parafn::backend::ambient;
use parafn::local_backend::ThreadPoolBackend;
use parafn::splitters::{by_row, by_row2};
use parafn::testing::{assert_partition_cover, assert_partition_sizes, TestBackend};
use parafn::{FunctionSignature, NamedArguments, Parameter, ParallelFunction, Value};
use std::collections::HashMap;
use std::sync::Arc;

fn values_signature() -> Arc<FunctionSignature> {
    Arc::new(FunctionSignature::new(vec![Parameter::positional("values")]).unwrap())
}

fn sum_fn() -> ParallelFunction<i64> {
    ParallelFunction::new(
        "sum",
        values_signature(),
        |args: NamedArguments| -> Result<i64> {
            Ok(args.get::<Vec<i64>>("values").unwrap().iter().sum())
        },
        |a: i64, b: i64| Ok(a + b),
        || 0i64,
        by_row::<i64>("values"),
    )
}

fn call(f: &ParallelFunction<i64>, values: Vec<i64>) -> Result<i64> {
    f.invoke(vec![Arc::new(values) as Value], HashMap::new())
}

// Row-partitioned sum, fixed size 10, 100 items -> 10 partitions.
#[test]
fn row_partitioned_sum_fixed_size() -> Result<()> {
    let backend = Arc::new(TestBackend::new());
    let _guard = ambient::with_backend(backend);

    let f = sum_fn().with_fixed_partition_size(10usize)?;
    let (result, trace) = f.invoke_with_trace(
        vec![Arc::new((1..=100i64).collect::<Vec<i64>>()) as Value],
        HashMap::new(),
    )?;

    assert_eq!(result, 5050);
    assert_eq!(trace.partitions.len(), 10);
    assert_partition_cover(&trace, 100);
    Ok(())
}

// Two co-partitioned 7-row inputs, per-partition row count, size 3 ->
// partitions of 3, 3, 1; combiner sums to 7.
#[test]
fn co_partitioned_inputs_combine_row_count() -> Result<()> {
    let signature = Arc::new(FunctionSignature::new(vec![
        Parameter::positional("left"),
        Parameter::positional("right"),
    ])?);

    let row_count = ParallelFunction::new(
        "row_count",
        signature,
        |args: NamedArguments| -> Result<i64> {
            Ok(args.get::<Vec<i64>>("left").unwrap().len() as i64)
        },
        |a: i64, b: i64| Ok(a + b),
        || 0i64,
        by_row2::<i64, i64>("left", "right"),
    )
    .with_fixed_partition_size(3usize)?;

    let backend = Arc::new(TestBackend::new());
    let _guard = ambient::with_backend(backend);

    let left: Vec<i64> = (0..7).collect();
    let right: Vec<i64> = (100..107).collect();
    let (result, trace) = row_count.invoke_with_trace(
        vec![Arc::new(left) as Value, Arc::new(right) as Value],
        HashMap::new(),
    )?;

    assert_eq!(result, 7);
    assert_partition_sizes(&trace, &[3, 3, 1]);
    Ok(())
}

// Empty input -> combiner's identity element, zero trace rows.
#[test]
fn empty_input_yields_identity() -> Result<()> {
    let backend = Arc::new(TestBackend::new());
    let _guard = ambient::with_backend(backend);

    let f = sum_fn();
    let (result, trace) = f.invoke_with_trace(vec![Arc::new(Vec::<i64>::new()) as Value], HashMap::new())?;

    assert_eq!(result, 0);
    assert!(trace.partitions.is_empty());
    Ok(())
}

// Mismatched co-partition lengths -> InvalidInput at split time.
#[test]
fn mismatched_co_partition_is_invalid_input() {
    let signature = Arc::new(
        FunctionSignature::new(vec![
            Parameter::positional("left"),
            Parameter::positional("right"),
        ])
        .unwrap(),
    );

    let row_count = ParallelFunction::new(
        "row_count",
        signature,
        |args: NamedArguments| -> Result<i64> {
            Ok(args.get::<Vec<i64>>("left").unwrap().len() as i64)
        },
        |a: i64, b: i64| Ok(a + b),
        || 0i64,
        by_row2::<i64, i64>("left", "right"),
    );

    let backend = Arc::new(TestBackend::new());
    let _guard = ambient::with_backend(backend);

    let left: Vec<i64> = (0..7).collect();
    let right: Vec<i64> = (0..8).collect();
    let err = row_count
        .invoke(vec![Arc::new(left) as Value, Arc::new(right) as Value], HashMap::new())
        .unwrap_err();
    assert!(format!("{err:#}").contains("mismatched"));
}

// Both size options set -> ConfigurationError at construction.
#[test]
fn both_size_options_is_configuration_error() {
    let err = sum_fn()
        .with_initial_partition_size(10usize)
        .unwrap()
        .with_fixed_partition_size(20usize)
        .unwrap_err();
    assert!(format!("{err:#}").contains("mutually exclusive"));
}

// A nested call under a non-nesting backend runs the inner call
// sequentially while the outer call still parallelizes; overall result
// matches a fully-sequential reference computation.
#[test]
fn nested_call_degrades_to_sequential() -> Result<()> {
    let backend = Arc::new(ThreadPoolBackend::new(4, 4)?);
    let _guard = ambient::with_backend(backend);

    let inner = Arc::new(sum_fn().with_fixed_partition_size(2usize)?);
    let inner_for_task = Arc::clone(&inner);

    let outer = ParallelFunction::new(
        "outer",
        values_signature(),
        move |args: NamedArguments| -> Result<i64> {
            let values = args.get::<Vec<i64>>("values").unwrap().clone();
            inner_for_task.invoke(vec![Arc::new(values) as Value], HashMap::new())
        },
        |a: i64, b: i64| Ok(a + b),
        || 0i64,
        by_row::<i64>("values"),
    )
    .with_fixed_partition_size(5usize)?;

    let values: Vec<i64> = (1..=50).collect();
    let result = call(&outer, values.clone())?;
    let reference: i64 = values.iter().sum();
    assert_eq!(result, reference);
    Ok(())
}

// Nesting-allowed complement: when the backend opts in, the inner call stays
// parallel instead of degrading to sequential.
#[test]
fn nested_call_stays_parallel_under_nesting_backend() -> Result<()> {
    let backend = Arc::new(TestBackend::new().allowing_nested_tasks());
    let _guard = ambient::with_backend(backend);

    let inner = Arc::new(sum_fn().with_fixed_partition_size(2usize)?);
    let inner_for_task = Arc::clone(&inner);

    let outer = ParallelFunction::new(
        "outer",
        values_signature(),
        move |args: NamedArguments| -> Result<i64> {
            let values = args.get::<Vec<i64>>("values").unwrap().clone();
            assert!(ambient::is_nested_parallelism());
            inner_for_task.invoke(vec![Arc::new(values) as Value], HashMap::new())
        },
        |a: i64, b: i64| Ok(a + b),
        || 0i64,
        by_row::<i64>("values"),
    )
    .with_fixed_partition_size(5usize)?;

    let result = call(&outer, (1..=20).collect())?;
    assert_eq!(result, 210);
    Ok(())
}

// A worker exception aborts the invocation after session close; the error
// surfaces as a WorkerFailure wrapping the partition index.
#[test]
fn worker_failure_surfaces_after_close() -> Result<()> {
    let backend = Arc::new(ThreadPoolBackend::new(4, 4)?);
    let _guard = ambient::with_backend(backend);

    let f = ParallelFunction::new(
        "maybe_fails",
        values_signature(),
        |args: NamedArguments| -> Result<i64> {
            let values = args.get::<Vec<i64>>("values").unwrap();
            if values.iter().any(|v| *v == 42) {
                bail!("partition hit the poisoned value");
            }
            Ok(values.iter().sum())
        },
        |a: i64, b: i64| Ok(a + b),
        || 0i64,
        by_row::<i64>("values"),
    )
    .with_fixed_partition_size(5usize)?;

    let err = call(&f, (1..=100).collect()).unwrap_err();
    let engine_err = err
        .downcast_ref::<parafn::EngineError>()
        .expect("a worker failure should preserve EngineError in the chain");
    assert!(matches!(
        engine_err,
        parafn::EngineError::WorkerFailure { .. }
    ));
    Ok(())
}

// Fixed-size obedience: every partition has `actual_size = k` except
// possibly the last.
#[test]
fn fixed_size_obedience() -> Result<()> {
    let backend = Arc::new(TestBackend::new());
    let _guard = ambient::with_backend(backend);

    let f = sum_fn().with_fixed_partition_size(7usize)?;
    let (_result, trace) = f.invoke_with_trace(
        vec![Arc::new((0..23i64).collect::<Vec<i64>>()) as Value],
        HashMap::new(),
    )?;

    assert_partition_sizes(&trace, &[7, 7, 7, 2]);
    Ok(())
}
