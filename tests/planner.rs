use anyhow::{Result, anyhow};
use sframe_query::prelude::*;
use sframe_query::testing::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn doubled(input: &PNode) -> PNode {
    make_transform(input, |row| row[0].add(&row[0]))
}

fn evens_mask(n: usize) -> PNode {
    make_sarray_source(Column::new(
        (0..n).map(|i| Value::Integer(i64::from(i % 2 == 0))).collect(),
    ))
}

fn is_contract_error(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<QueryError>(), Some(QueryError::Contract(_)))
}

#[test]
fn materialize_realizes_node_in_place() -> Result<()> {
    let planner = TestPlanner::new()?;
    let node = doubled(&make_range(0, 10)?);

    let out = planner.materialize(&node, &MaterializeOptions::default())?;
    assert_eq!(
        int_values(&out.select_column(0)?),
        (0..10).map(|i| 2 * i).collect::<Vec<i64>>()
    );
    assert_eq!(node.operator_type(), OperatorType::SframeSource);
    assert_eq!(node.num_inputs(), 0);

    // A realized node is served straight from its table.
    let before = planner.context().metrics().snapshot();
    let again = planner.materialize(&node, &MaterializeOptions::default())?;
    let after = planner.context().metrics().snapshot();
    assert_tables_equal(&again, &out);
    assert_eq!(after.fast_path_table, before.fast_path_table + 1);
    Ok(())
}

#[test]
fn materialize_as_planner_node_leaves_a_source() -> Result<()> {
    let planner = TestPlanner::new()?;
    let node = make_union(vec![make_range(0, 6)?, doubled(&make_range(0, 6)?)])?;

    let source = planner.materialize_as_planner_node(&node, &MaterializeOptions::default())?;
    assert_eq!(source.operator_type(), OperatorType::SframeSource);
    assert_eq!(infer_length(&source), Some(6));
    assert_eq!(infer_num_columns(&source)?, 2);
    Ok(())
}

#[test]
fn shared_subgraph_is_computed_once() -> Result<()> {
    let planner = TestPlanner::new()?;
    let counter = ExecutionCounter::new();
    let shared = counting_transform(&make_range(0, 100)?, &counter, |row| row[0].clone());

    planner.materialize(&shared, &MaterializeOptions::default())?;
    assert_eq!(counter.get(), 100);

    let left = make_union(vec![PNode::clone(&shared), make_range(0, 100)?])?;
    let right = doubled(&shared);
    let a = planner.materialize(&left, &MaterializeOptions::default())?;
    let b = planner.materialize(&right, &MaterializeOptions::default())?;

    assert_eq!(counter.get(), 100);
    assert_eq!(a.num_columns(), 2);
    assert_eq!(b.num_rows(), 100);
    Ok(())
}

#[test]
fn multi_consumer_node_runs_once_per_row() -> Result<()> {
    let planner = TestPlanner::new()?;
    let counter = ExecutionCounter::new();
    let shared = counting_transform(&make_range(0, 50)?, &counter, |row| row[0].clone());
    let both = make_union(vec![PNode::clone(&shared), doubled(&shared)])?;

    let out = planner.materialize(&both, &MaterializeOptions::default().with_num_segments(3))?;
    assert_eq!(out.num_rows(), 50);
    assert_eq!(counter.get(), 50);
    assert_column_values(&out, 1, &(0..50).map(|i| Value::Integer(2 * i)).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn slice_of_linear_graph_stays_lazy() -> Result<()> {
    let planner = TestPlanner::new()?;
    let node = doubled(&make_range(0, 20)?);

    let sliced = planner.slice(&node, 5, 12)?;
    assert!(is_linear_graph(&sliced));
    assert_eq!(infer_length(&sliced), Some(7));
    assert_eq!(node.operator_type(), OperatorType::Transform);

    let out = planner.materialize(&sliced, &MaterializeOptions::default())?;
    assert_eq!(
        int_values(&out.select_column(0)?),
        (5..12).map(|i| 2 * i).collect::<Vec<i64>>()
    );
    Ok(())
}

#[test]
fn slice_of_filtered_graph_materializes_first() -> Result<()> {
    let planner = TestPlanner::new()?;
    let filtered = make_logical_filter(&make_range(0, 20)?, &evens_mask(20))?;

    let sliced = planner.slice(&filtered, 2, 5)?;
    assert!(is_linear_graph(&sliced));
    let out = planner.materialize(&sliced, &MaterializeOptions::default())?;
    assert_eq!(int_values(&out.select_column(0)?), vec![4, 6, 8]);
    Ok(())
}

#[test]
fn slice_of_union_matches_materialized_rows() -> Result<()> {
    let planner = TestPlanner::new()?;
    let table = sequential_table(30, 2)?;
    let node = make_union(vec![
        make_sframe_source(table.clone()),
        doubled(&make_range(0, 30)?),
    ])?;

    let sliced = planner.slice(&node, 10, 13)?;
    let out = planner.materialize(&sliced, &MaterializeOptions::default())?;
    assert_table_rows(
        &out,
        &[
            vec![Value::Integer(20), Value::Integer(21), Value::Integer(20)],
            vec![Value::Integer(22), Value::Integer(23), Value::Integer(22)],
            vec![Value::Integer(24), Value::Integer(25), Value::Integer(24)],
        ],
    );
    Ok(())
}

#[test]
fn slice_bounds_are_checked() -> Result<()> {
    let planner = TestPlanner::new()?;
    let node = doubled(&make_range(0, 10)?);

    let err = planner.slice(&node, 0, 11).err();
    assert!(err.as_ref().is_some_and(is_contract_error));
    let err = planner.slice(&node, 6, 5).err();
    assert!(err.as_ref().is_some_and(is_contract_error));

    let empty = planner.slice(&node, 10, 10)?;
    assert_eq!(infer_length(&empty), Some(0));
    Ok(())
}

#[test]
fn equal_length_is_proven_without_execution() -> Result<()> {
    let planner = TestPlanner::new()?;
    let counter = ExecutionCounter::new();
    let base = make_range(0, 40)?;
    let mask = evens_mask(40);
    let a = counting_transform(&make_logical_filter(&base, &mask)?, &counter, |r| r[0].clone());
    let b = make_project(&make_logical_filter(&base, &mask)?, &[0])?;

    assert!(planner.test_equal_length(&a, &b)?);
    assert!(planner.test_equal_length(&doubled(&base), &base)?);
    assert!(!planner.test_equal_length(&make_range(0, 3)?, &make_range(0, 4)?)?);
    assert_eq!(counter.get(), 0);
    assert_eq!(planner.context().metrics().snapshot().materialize_calls, 0);
    Ok(())
}

#[test]
fn equal_length_falls_back_to_materialization() -> Result<()> {
    let planner = TestPlanner::new()?;
    let data = make_range(0, 12)?;
    let first_half = make_sarray_source(Column::new(
        (0..12).map(|i| Value::Integer(i64::from(i < 6))).collect(),
    ));
    let evens = make_logical_filter(&data, &evens_mask(12))?;
    let firsts = make_logical_filter(&data, &first_half)?;
    assert!(planner.test_equal_length(&evens, &firsts)?);
    assert_eq!(evens.operator_type(), OperatorType::SframeSource);
    assert_eq!(firsts.operator_type(), OperatorType::SframeSource);

    let fewer = make_logical_filter(
        &data,
        &make_sarray_source(Column::new(
            (0..12).map(|i| Value::Integer(i64::from(i < 2))).collect(),
        )),
    )?;
    assert!(!planner.test_equal_length(&doubled(&data), &fewer)?);
    Ok(())
}

#[test]
fn lazy_node_threshold_recommends_materialization() -> Result<()> {
    let planner = TestPlanner::new()?;
    let mut node = make_range(0, 5)?;
    for _ in 0..4 {
        node = make_union(vec![PNode::clone(&node), doubled(&node)])?;
    }
    assert!(!planner.online_materialization_recommended(&node));

    planner.context().set_max_lazy_node_size(8);
    assert!(planner.online_materialization_recommended(&node));
    assert!(!planner.online_materialization_recommended(&make_range(0, 5)?));

    planner.materialize(&node, &MaterializeOptions::default())?;
    assert!(!planner.online_materialization_recommended(&node));
    Ok(())
}

#[test]
fn materialize_is_reentrant_under_the_query_lock() -> Result<()> {
    let planner = TestPlanner::new()?;
    let node = make_union(vec![make_range(0, 8)?, doubled(&make_range(0, 8)?)])?;

    let _guard = planner.context().lock();
    let sliced = planner.slice(&node, 2, 4)?;
    let out = planner.materialize(&sliced, &MaterializeOptions::default())?;
    assert_eq!(out.num_rows(), 2);
    Ok(())
}

#[test]
fn write_callback_receives_every_row() -> Result<()> {
    let planner = TestPlanner::new()?;
    let node = doubled(&make_range(0, 25)?);
    let rows = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&rows);
    let options = MaterializeOptions::default()
        .with_num_segments(3)
        .with_write_callback(move |_segment, block| {
            seen.fetch_add(block.num_rows(), Ordering::SeqCst);
            false
        });

    let out = planner.materialize(&node, &options)?;
    assert_eq!(out.num_rows(), 0);
    assert_eq!(rows.load(Ordering::SeqCst), 25);
    assert_eq!(node.operator_type(), OperatorType::Transform);
    Ok(())
}

#[test]
fn write_callback_can_stop_a_segment() -> Result<()> {
    let planner = TestPlanner::new()?;
    let node = doubled(&make_range(0, 40)?);
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let options = MaterializeOptions::default()
        .with_num_segments(1)
        .with_write_callback(move |segment, _block| {
            assert_eq!(segment, 0);
            seen.fetch_add(1, Ordering::SeqCst);
            true
        });

    planner.materialize(&node, &options)?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn output_names_and_index_file() -> Result<()> {
    let planner = TestPlanner::new()?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("result.json");
    let node = make_union(vec![make_range(0, 4)?, doubled(&make_range(0, 4)?)])?;
    let options = MaterializeOptions::default()
        .with_output_column_names(["id", "twice"])
        .with_output_index_file(&path);

    let out = planner.materialize(&node, &options)?;
    assert_eq!(out.column_names(), ["id", "twice"]);
    assert_tables_equal(&Table::load(&path)?, &out);

    // The realized node keeps its own names.
    assert_eq!(infer_column_names(&node)?, ["X1", "X1"]);
    Ok(())
}

#[test]
fn wrong_output_name_count_is_rejected() -> Result<()> {
    let planner = TestPlanner::new()?;
    let node = doubled(&make_range(0, 4)?);
    let options = MaterializeOptions::default().with_output_column_names(["a", "b"]);

    let err = planner.materialize(&node, &options).err();
    assert!(err.as_ref().is_some_and(is_contract_error));
    assert_eq!(node.operator_type(), OperatorType::Transform);
    Ok(())
}

#[test]
fn write_callback_cannot_be_combined_with_index_file() -> Result<()> {
    let planner = TestPlanner::new()?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("streamed.json");
    let node = doubled(&make_range(0, 5)?);
    let options = MaterializeOptions::default()
        .with_output_index_file(&path)
        .with_write_callback(|_segment, _block| false);

    let err = planner.materialize(&node, &options).err();
    assert!(err.as_ref().is_some_and(is_contract_error));
    assert!(!path.exists());
    assert_eq!(node.operator_type(), OperatorType::Transform);
    Ok(())
}

#[test]
fn only_the_requested_node_is_realized() -> Result<()> {
    let planner = TestPlanner::new()?;
    let total = make_reduce(&make_range(0, 10)?, Aggregate::Sum);
    let node = doubled(&total);

    let out = planner.materialize(&node, &MaterializeOptions::default())?;
    assert_eq!(int_values(&out.select_column(0)?), vec![90]);
    assert_eq!(node.operator_type(), OperatorType::SframeSource);
    assert_eq!(total.operator_type(), OperatorType::Reduce);
    assert_eq!(total.num_inputs(), 1);
    Ok(())
}

#[test]
fn failed_materialize_leaves_barriers_lazy() -> Result<()> {
    let planner = TestPlanner::new()?;
    let total = make_reduce(&make_range(0, 10)?, Aggregate::Sum);
    let node = doubled(&total);
    let options = MaterializeOptions::default().with_output_column_names(["a", "b"]);

    let err = planner.materialize(&node, &options).err();
    assert!(err.as_ref().is_some_and(is_contract_error));
    assert_eq!(node.operator_type(), OperatorType::Transform);
    assert_eq!(total.operator_type(), OperatorType::Reduce);
    assert_eq!(planner.context().metrics().snapshot().realized_nodes, 0);
    Ok(())
}

#[test]
fn concurrent_callers_share_a_realized_node() -> Result<()> {
    let planner = TestPlanner::new()?;
    let counter = ExecutionCounter::new();
    let shared = counting_transform(&make_range(0, 100)?, &counter, |row| row[0].clone());
    let parents = [
        make_union(vec![PNode::clone(&shared), make_range(0, 100)?])?,
        doubled(&shared),
        make_logical_filter(&shared, &evens_mask(100))?,
    ];

    let outputs = thread::scope(|scope| {
        let handles: Vec<_> = parents
            .iter()
            .map(|parent| {
                let planner = planner.clone();
                let shared = PNode::clone(&shared);
                scope.spawn(move || -> Result<Table> {
                    planner.materialize(&shared, &MaterializeOptions::default())?;
                    planner.materialize(parent, &MaterializeOptions::default())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| anyhow!("materialize thread panicked"))?)
            .collect::<Result<Vec<_>>>()
    })?;

    assert_eq!(counter.get(), 100);
    assert_eq!(shared.operator_type(), OperatorType::SframeSource);
    assert_eq!(outputs[0].num_columns(), 2);
    assert_eq!(
        int_values(&outputs[1].select_column(0)?),
        (0..100).map(|i| 2 * i).collect::<Vec<i64>>()
    );
    assert_eq!(outputs[2].num_rows(), 50);
    Ok(())
}

#[test]
fn failed_materialize_releases_the_query_lock() -> Result<()> {
    let planner = TestPlanner::new()?;
    let failing = make_custom("explode", vec![make_range(0, 3)?], 1, |_| Err(anyhow!("boom")))?;

    let failed = thread::scope(|scope| {
        scope
            .spawn(|| planner.materialize(&failing, &MaterializeOptions::default()).is_err())
            .join()
    })
    .map_err(|_| anyhow!("materialize thread panicked"))?;
    assert!(failed);

    // A different thread must be able to take the lock afterwards.
    let (tx, rx) = mpsc::channel();
    let worker = planner.clone();
    let node = doubled(&make_range(0, 5)?);
    let handle = thread::spawn(move || {
        let rows = worker
            .materialize(&node, &MaterializeOptions::default())
            .map(|t| t.num_rows());
        let _ = tx.send(rows);
    });
    let rows = rx
        .recv_timeout(Duration::from_secs(30))
        .map_err(|_| anyhow!("query lock still held after a failed call"))??;
    assert_eq!(rows, 5);
    handle.join().map_err(|_| anyhow!("materialize thread panicked"))?;
    Ok(())
}

#[test]
fn partial_materialize_realizes_barriers_only() -> Result<()> {
    let planner = TestPlanner::new()?;
    let total = make_reduce(&make_range(0, 10)?, Aggregate::Sum);
    let node = doubled(&total);

    let partial = planner.partial_materialize(&node, &MaterializeOptions::default())?;
    assert_eq!(partial.operator_type(), OperatorType::Transform);
    assert_eq!(partial.input(0).operator_type(), OperatorType::SframeSource);
    assert!(is_linear_graph(&partial));
    assert_eq!(node.input(0).operator_type(), OperatorType::Reduce);

    let out = planner.materialize(&partial, &MaterializeOptions::default())?;
    assert_eq!(int_values(&out.select_column(0)?), vec![90]);
    Ok(())
}

#[test]
fn append_stays_lazy_over_its_inputs() -> Result<()> {
    let planner = TestPlanner::new()?;
    let top = doubled(&make_range(0, 3)?);
    let node = make_append(&top, &make_range(10, 12)?)?;

    let partial = planner.partial_materialize(&node, &MaterializeOptions::default())?;
    assert_eq!(partial.operator_type(), OperatorType::Append);
    assert_eq!(partial.input(0).operator_type(), OperatorType::SframeSource);
    assert_eq!(partial.input(1).operator_type(), OperatorType::Range);

    let out = planner.materialize(&partial, &MaterializeOptions::default())?;
    assert_eq!(int_values(&out.select_column(0)?), vec![0, 2, 4, 10, 11]);
    Ok(())
}
