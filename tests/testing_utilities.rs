//! Integration tests demonstrating the testing utilities.

use anyhow::Result;
use sframe_query::prelude::*;
use sframe_query::testing::*;

#[test]
fn table_builder_and_assertions() -> Result<()> {
    let planner = TestPlanner::new()?;
    let table = TableBuilder::new()
        .int_column("id", 0..3)
        .float_column("score", [0.5, 1.5, 2.5])
        .str_column("name", ["a", "b", "c"])
        .build()?;

    let out = planner.materialize(&make_sframe_source(table.clone()), &MaterializeOptions::default())?;
    assert_tables_equal(&out, &table);
    assert_table_rows(
        &out,
        &[
            vec![Value::Integer(0), Value::Float(0.5), Value::String("a".into())],
            vec![Value::Integer(1), Value::Float(1.5), Value::String("b".into())],
            vec![Value::Integer(2), Value::Float(2.5), Value::String("c".into())],
        ],
    );
    Ok(())
}

#[test]
fn table_builder_rejects_ragged_columns() {
    let result = TableBuilder::new()
        .int_column("a", 0..3)
        .int_column("b", 0..2)
        .build();
    assert!(result.is_err());
}

#[test]
fn sequential_table_layout() -> Result<()> {
    let table = sequential_table(3, 2)?;
    assert_eq!(table.column_names(), ["X1", "X2"]);
    assert_eq!(int_values(&table.select_column(0)?), vec![0, 2, 4]);
    assert_eq!(int_values(&table.select_column(1)?), vec![1, 3, 5]);
    Ok(())
}

#[test]
fn fixtures_are_reproducible() -> Result<()> {
    let a = random_table(7, 50, 3)?;
    let b = random_table(7, 50, 3)?;
    assert_tables_equal(&a, &b);
    assert_ne!(random_table(8, 50, 3)?.rows(0, 50), a.rows(0, 50));

    let mask = random_mask(7, 50);
    assert_eq!(mask.values(), random_mask(7, 50).values());
    assert!(mask.values().iter().all(|v| matches!(v, Value::Integer(0 | 1))));
    Ok(())
}

#[test]
fn execution_counter() -> Result<()> {
    let planner = TestPlanner::with_threads(2)?;
    let counter = ExecutionCounter::new();
    let node = counting_transform(&make_range(0, 12)?, &counter, |row| row[0].clone());

    planner.materialize(&node, &MaterializeOptions::default())?;
    assert_eq!(counter.get(), 12);
    counter.reset();
    assert_eq!(counter.get(), 0);
    Ok(())
}

#[test]
fn same_column_assertion() -> Result<()> {
    let column = int_column(0, 4);
    assert_same_column(&column.clone(), &column);
    Ok(())
}

#[test]
#[should_panic(expected = "Value mismatch")]
fn value_mismatch_is_reported() {
    let a = Table::from_columns(vec![int_column(0, 3)]).unwrap();
    let b = Table::from_columns(vec![int_column(1, 4)]).unwrap();
    assert_table_values_equal(&a, &b);
}

#[test]
#[should_panic(expected = "reused column")]
fn copied_column_is_not_the_same() {
    assert_same_column(&int_column(0, 4), &int_column(0, 4));
}

#[test]
fn debug_print_plan_renders() -> Result<()> {
    let planner = TestPlanner::new()?;
    let node = make_union(vec![make_range(0, 3)?, make_range(3, 6)?])?;
    planner.debug_print_plan(&node)?;
    Ok(())
}
