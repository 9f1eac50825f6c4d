//! Builders for test tables.

use crate::table::{Column, Table};
use crate::value::Value;
use anyhow::Result;

/// A fluent builder for named test tables.
///
/// # Example
///
/// ```
/// use sframe_query::testing::TableBuilder;
///
/// # fn main() -> anyhow::Result<()> {
/// let table = TableBuilder::new()
///     .int_column("id", 0..3)
///     .str_column("name", ["a", "b", "c"])
///     .build()?;
/// assert_eq!(table.num_rows(), 3);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct TableBuilder {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl TableBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn column(mut self, name: &str, values: Vec<Value>) -> Self {
        self.names.push(name.to_string());
        self.columns.push(Column::new(values));
        self
    }

    #[must_use]
    pub fn int_column(self, name: &str, values: impl IntoIterator<Item = i64>) -> Self {
        self.column(name, values.into_iter().map(Value::Integer).collect())
    }

    #[must_use]
    pub fn float_column(self, name: &str, values: impl IntoIterator<Item = f64>) -> Self {
        self.column(name, values.into_iter().map(Value::Float).collect())
    }

    #[must_use]
    pub fn str_column<S: Into<String>>(self, name: &str, values: impl IntoIterator<Item = S>) -> Self {
        self.column(
            name,
            values.into_iter().map(|s| Value::String(s.into())).collect(),
        )
    }

    /// # Errors
    ///
    /// Fails if the columns have different lengths.
    pub fn build(self) -> Result<Table> {
        Table::new(self.names, self.columns)
    }
}

/// Integer column `start..end`.
#[must_use]
pub fn int_column(start: i64, end: i64) -> Column {
    Column::new((start..end).map(Value::Integer).collect())
}

/// A table of `num_columns` integer columns where column `c` holds
/// `row * num_columns + c`, named `X1..Xn`.
///
/// # Errors
///
/// Never fails for consistent arguments; the `Result` comes from [`Table::new`].
pub fn sequential_table(num_rows: usize, num_columns: usize) -> Result<Table> {
    let columns = (0..num_columns)
        .map(|c| {
            Column::new(
                (0..num_rows)
                    .map(|r| Value::Integer(i64::try_from(r * num_columns + c).unwrap_or(i64::MAX)))
                    .collect(),
            )
        })
        .collect();
    Table::from_columns(columns)
}

/// Integers of `column` as `i64`, skipping non-integers.
#[must_use]
pub fn int_values(column: &Column) -> Vec<i64> {
    column
        .values()
        .iter()
        .filter_map(|v| match v {
            Value::Integer(i) => Some(*i),
            _ => None,
        })
        .collect()
}
