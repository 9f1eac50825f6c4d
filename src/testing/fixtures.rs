//! Deterministic fixtures: seeded random tables and execution counters.

use crate::node::PNode;
use crate::operators::make_transform;
use crate::table::{Column, Table};
use crate::value::Value;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A table of `num_columns` random integer columns in `0..100`, reproducible
/// from `seed`.
///
/// # Errors
///
/// Never fails for consistent arguments; the `Result` comes from [`Table::new`].
pub fn random_table(seed: u64, num_rows: usize, num_columns: usize) -> Result<Table> {
    let mut rng = StdRng::seed_from_u64(seed);
    let columns = (0..num_columns)
        .map(|_| {
            Column::new(
                (0..num_rows)
                    .map(|_| Value::Integer(rng.gen_range(0..100)))
                    .collect(),
            )
        })
        .collect();
    Table::from_columns(columns)
}

/// A random 0/1 column of `num_rows` values, reproducible from `seed`.
#[must_use]
pub fn random_mask(seed: u64, num_rows: usize) -> Column {
    let mut rng = StdRng::seed_from_u64(seed);
    Column::new(
        (0..num_rows)
            .map(|_| Value::Integer(i64::from(rng.gen_bool(0.5))))
            .collect(),
    )
}

/// Shared call counter for instrumenting operator functions.
#[derive(Clone, Debug, Default)]
pub struct ExecutionCounter {
    count: Arc<AtomicUsize>,
}

impl ExecutionCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

/// A transform applying `f` to every row of `input`, counting each call.
pub fn counting_transform<F>(input: &PNode, counter: &ExecutionCounter, f: F) -> PNode
where
    F: Fn(&[Value]) -> Value + Send + Sync + 'static,
{
    let counter = counter.clone();
    make_transform(input, move |row| {
        counter.increment();
        f(row)
    })
}
