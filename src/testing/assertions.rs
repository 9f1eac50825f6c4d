//! Assertion functions for materialized tables.

use crate::table::{Column, Table};
use crate::value::Value;

/// Assert that two tables have the same names and the same values in the same
/// row order.
///
/// # Panics
///
/// Panics with the first differing column or row.
pub fn assert_tables_equal(actual: &Table, expected: &Table) {
    assert_eq!(
        actual.column_names(),
        expected.column_names(),
        "Column name mismatch"
    );
    assert_table_values_equal(actual, expected);
}

/// Assert that two tables hold the same values, ignoring column names.
///
/// # Panics
///
/// Panics with the first differing column or row.
pub fn assert_table_values_equal(actual: &Table, expected: &Table) {
    assert_eq!(
        actual.num_columns(),
        expected.num_columns(),
        "Column count mismatch:\n  Expected: {}\n  Actual: {}",
        expected.num_columns(),
        actual.num_columns()
    );
    assert_eq!(
        actual.num_rows(),
        expected.num_rows(),
        "Row count mismatch:\n  Expected: {}\n  Actual: {}",
        expected.num_rows(),
        actual.num_rows()
    );
    for c in 0..actual.num_columns() {
        let (a, e) = (&actual.columns()[c], &expected.columns()[c]);
        if let Some(r) = (0..a.size()).find(|&r| a.get(r) != e.get(r)) {
            panic!(
                "Value mismatch in column {c} ({}) at row {r}:\n  Expected: {:?}\n  Actual: {:?}",
                actual.column_names()[c],
                e.get(r),
                a.get(r)
            );
        }
    }
}

/// Assert the row-major contents of a table.
///
/// # Panics
///
/// Panics if the rows differ.
pub fn assert_table_rows(table: &Table, expected: &[Vec<Value>]) {
    let rows = table.rows(0, table.num_rows());
    assert_eq!(
        rows.len(),
        expected.len(),
        "Row count mismatch:\n  Expected: {expected:?}\n  Actual: {rows:?}"
    );
    for (i, (a, e)) in rows.iter().zip(expected).enumerate() {
        assert_eq!(a, e, "Row mismatch at index {i}");
    }
}

/// Assert the values of one column.
///
/// # Panics
///
/// Panics if the column is missing or its values differ.
pub fn assert_column_values(table: &Table, column: usize, expected: &[Value]) {
    assert!(
        column < table.num_columns(),
        "Column {column} missing from a table of {} columns",
        table.num_columns()
    );
    assert_eq!(
        table.columns()[column].values(),
        expected,
        "Values of column {column} ({}) differ",
        table.column_names()[column]
    );
}

/// Assert that two handles share storage, i.e. a column was reused rather
/// than recomputed or copied.
///
/// # Panics
///
/// Panics if the columns are distinct allocations.
pub fn assert_same_column(actual: &Column, expected: &Column) {
    assert!(
        actual.ptr_eq(expected),
        "Expected a reused column, got a separate copy"
    );
}
