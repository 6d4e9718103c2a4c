//! Reference, non-tabular partition generators.
//!
//! Concrete partitioners for tabular data (dataframe-style splitters tied to
//! a specific columnar library) are out of scope for this crate. What's
//! provided here is the generic shape underneath them: prime, then
//! repeatedly slice a contiguous run of rows off the front of one or more
//! equal-length collections. That shape is useful for any plain `Vec<T>`, so
//! `by_row`/`by_row2` provide it directly.

use crate::error::EngineError;
use crate::named_args::{NamedArguments, Value};
use crate::partition::{PartitionFunction, PartitionGenerator, PartitionStep};
use anyhow::{Result, bail};
use std::sync::Arc;

/// Values that a row-oriented splitter can slice: cheap to clone per-row
/// subrange, and shareable across worker threads.
pub trait RowElement: 'static + Send + Sync + Clone {}
impl<T: 'static + Send + Sync + Clone> RowElement for T {}

struct RowGenerator<T: RowElement> {
    names: Vec<String>,
    rows: Vec<Vec<T>>,
    len: usize,
    position: usize,
    signature: Arc<crate::named_args::FunctionSignature>,
}

impl<T: RowElement> PartitionGenerator for RowGenerator<T> {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn next(&mut self, requested_size: usize) -> Result<PartitionStep> {
        if self.position >= self.len {
            return Ok(PartitionStep::End);
        }
        let requested = requested_size.max(1);
        let end = (self.position + requested).min(self.len);
        let actual_size = end - self.position;

        let mut payload = NamedArguments::empty(Arc::clone(&self.signature));
        for (name, column) in self.names.iter().zip(self.rows.iter()) {
            let slice: Vec<T> = column[self.position..end].to_vec();
            payload.insert(name.clone(), slice)?;
        }
        self.position = end;

        Ok(PartitionStep::Item {
            actual_size,
            payload,
        })
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.len - self.position)
    }
}

fn take_vec<T: RowElement>(named: &mut NamedArguments, name: &str) -> Result<Vec<T>> {
    let value: Value = named.remove_raw(name).ok_or_else(|| {
        EngineError::InvalidInput(format!("splitter expected a `{name}` argument"))
    })?;
    match value.downcast::<Vec<T>>() {
        Ok(v) => Ok((*v).clone()),
        Err(_) => bail!(EngineError::InvalidInput(format!(
            "`{name}` is not partitionable by row: wrong type"
        ))),
    }
}

/// A splitter that partitions a single named `Vec<T>` argument by
/// contiguous row ranges, leaving every other declared argument
/// non-partitioned.
///
/// An empty `Vec` is a valid input: the returned generator ends immediately
/// on its first `next` call, zero partitions are submitted, and the
/// controller falls back to the combiner's identity element. This is not the
/// same as a missing or mistyped argument, which still errors below.
///
/// # Errors
///
/// The returned [`PartitionFunction`] fails with [`EngineError::InvalidInput`]
/// if `name` is missing or not a `Vec<T>`.
pub fn by_row<T: RowElement>(name: impl Into<String>) -> PartitionFunction {
    let name = name.into();
    Box::new(move |mut named: NamedArguments| {
        let rows = take_vec::<T>(&mut named, &name)?;
        let len = rows.len();
        let signature = Arc::clone(named.signature());
        let generator = RowGenerator {
            names: vec![name.clone()],
            rows: vec![rows],
            len,
            position: 0,
            signature,
        };
        Ok((named, Box::new(generator) as Box<dyn PartitionGenerator>))
    })
}

/// A splitter that co-partitions two named `Vec<T1>`/`Vec<T2>` arguments by
/// row, requiring them to have equal length. A length mismatch is reported
/// as an `InvalidInput` error rather than a panic.
pub fn by_row2<T1: RowElement, T2: RowElement>(
    name1: impl Into<String>,
    name2: impl Into<String>,
) -> PartitionFunction {
    let name1 = name1.into();
    let name2 = name2.into();
    Box::new(move |mut named: NamedArguments| {
        let rows1 = take_vec::<T1>(&mut named, &name1)?;
        let rows2 = take_vec::<T2>(&mut named, &name2)?;
        if rows1.len() != rows2.len() {
            bail!(EngineError::InvalidInput(format!(
                "co-partitioned arguments `{name1}` ({}) and `{name2}` ({}) have mismatched \
                 lengths",
                rows1.len(),
                rows2.len()
            )));
        }
        let len = rows1.len();
        let signature = Arc::clone(named.signature());

        // Two distinct element types can't share one `Vec<Vec<T>>`, so the
        // generator for the 2-ary case is a small bespoke type rather than a
        // second `RowGenerator` instantiation.
        struct Row2Generator<A: RowElement, B: RowElement> {
            name1: String,
            name2: String,
            col1: Vec<A>,
            col2: Vec<B>,
            len: usize,
            position: usize,
            signature: Arc<crate::named_args::FunctionSignature>,
        }

        impl<A: RowElement, B: RowElement> PartitionGenerator for Row2Generator<A, B> {
            fn start(&mut self) -> Result<()> {
                Ok(())
            }

            fn next(&mut self, requested_size: usize) -> Result<PartitionStep> {
                if self.position >= self.len {
                    return Ok(PartitionStep::End);
                }
                let requested = requested_size.max(1);
                let end = (self.position + requested).min(self.len);
                let actual_size = end - self.position;

                let mut payload = NamedArguments::empty(Arc::clone(&self.signature));
                payload.insert(self.name1.clone(), self.col1[self.position..end].to_vec())?;
                payload.insert(self.name2.clone(), self.col2[self.position..end].to_vec())?;
                self.position = end;

                Ok(PartitionStep::Item {
                    actual_size,
                    payload,
                })
            }

            fn remaining(&self) -> Option<usize> {
                Some(self.len - self.position)
            }
        }

        let generator = Row2Generator {
            name1: name1.clone(),
            name2: name2.clone(),
            col1: rows1,
            col2: rows2,
            len,
            position: 0,
            signature,
        };
        Ok((named, Box::new(generator) as Box<dyn PartitionGenerator>))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::named_args::{FunctionSignature, Parameter};

    fn make_named(values: i64) -> NamedArguments {
        let signature = Arc::new(
            FunctionSignature::new(vec![Parameter::positional("values")]).unwrap(),
        );
        let mut named = NamedArguments::empty(signature);
        named.insert("values", (0..values).collect::<Vec<i64>>()).unwrap();
        named
    }

    #[test]
    fn by_row_splits_into_contiguous_chunks() {
        let split = by_row::<i64>("values");
        let (non_partitioned, mut generator) = split(make_named(10)).unwrap();
        assert!(non_partitioned.get::<Vec<i64>>("values").is_none());

        generator.start().unwrap();
        let mut total = 0;
        loop {
            match generator.next(3).unwrap() {
                PartitionStep::Item { actual_size, payload } => {
                    let chunk = payload.get::<Vec<i64>>("values").unwrap();
                    assert_eq!(chunk.len(), actual_size);
                    total += chunk.len();
                }
                PartitionStep::End => break,
            }
        }
        assert_eq!(total, 10);
    }

    #[test]
    fn by_row_yields_zero_partitions_for_empty_input() {
        let split = by_row::<i64>("values");
        let (_non_partitioned, mut generator) = split(make_named(0)).unwrap();
        generator.start().unwrap();
        assert!(matches!(generator.next(4).unwrap(), PartitionStep::End));
    }

    #[test]
    fn by_row2_rejects_mismatched_lengths() {
        let signature = Arc::new(
            FunctionSignature::new(vec![Parameter::positional("a"), Parameter::positional("b")])
                .unwrap(),
        );
        let mut named = NamedArguments::empty(signature);
        named.insert("a", vec![1i64, 2, 3]).unwrap();
        named.insert("b", vec![1i64, 2]).unwrap();

        let split = by_row2::<i64, i64>("a", "b");
        assert!(split(named).is_err());
    }
}
