use anyhow::Result;
use sframe_query::node::{NodeState, keys};
use sframe_query::prelude::*;
use sframe_query::testing::*;
use sframe_query::OperatorAttributes;

fn is_contract_error(result: Result<PNode>) -> bool {
    matches!(
        result.err().as_ref().and_then(|e| e.downcast_ref::<QueryError>()),
        Some(QueryError::Contract(_))
    )
}

#[test]
fn source_parameters() -> Result<()> {
    let table = sequential_table(10, 2)?;
    let node = make_sframe_source_range(table, 2, 7)?;

    assert_eq!(node.operator_type(), OperatorType::SframeSource);
    assert_eq!(node.param_usize(keys::BEGIN_INDEX)?, 2);
    assert_eq!(node.param_usize(keys::END_INDEX)?, 7);
    assert!(node.has_any_param(keys::TABLE));
    assert_eq!(node.num_inputs(), 0);
    assert_eq!(infer_length(&node), Some(5));
    Ok(())
}

#[test]
fn factories_validate_arguments() -> Result<()> {
    let range = make_range(0, 5)?;
    let pair = make_union(vec![range.clone(), range.clone()])?;

    assert!(is_contract_error(make_range(5, 4)));
    assert!(is_contract_error(make_sframe_source_range(sequential_table(3, 1)?, 0, 4)));
    assert!(is_contract_error(make_sarray_source_range(int_column(0, 3), 2, 1)));
    assert!(is_contract_error(make_project(&range, &[])));
    assert!(is_contract_error(make_project(&range, &[1])));
    assert!(is_contract_error(make_union(Vec::new())));
    assert!(is_contract_error(make_logical_filter(&range, &pair)));
    assert!(is_contract_error(make_append(&range, &pair)));
    assert!(is_contract_error(make_generalized_transform(&range, |r| r.to_vec(), 0)));
    assert!(is_contract_error(make_custom("none", vec![range], 0, |t| Ok(t[0].clone()))));
    Ok(())
}

#[test]
fn missing_parameter_is_reported() -> Result<()> {
    let node = make_range(0, 5)?;
    let err = node.param_indices(keys::INDICES).err();
    assert!(matches!(
        err.as_ref().and_then(|e| e.downcast_ref::<QueryError>()),
        Some(QueryError::MissingParameter { key: "indices", .. })
    ));

    let err = make_sframe_source(sequential_table(2, 1)?)
        .require_any::<Column>(keys::TABLE)
        .err();
    assert!(matches!(
        err.as_ref().and_then(|e| e.downcast_ref::<QueryError>()),
        Some(QueryError::ParameterType { key: "table", .. })
    ));
    Ok(())
}

#[test]
fn operator_attributes() {
    let source = OperatorType::Range.attributes();
    assert!(source.contains(OperatorAttributes::SOURCE));
    assert!(source.contains(OperatorAttributes::SLICEABLE));

    let filter = OperatorType::LogicalFilter.attributes();
    assert!(filter.contains(OperatorAttributes::SUBLINEAR));
    assert!(!filter.contains(OperatorAttributes::LINEAR));

    assert!(OperatorType::Union.attributes().contains(OperatorAttributes::LINEAR));
    assert!(!OperatorType::Append.attributes().contains(OperatorAttributes::RATE_MATCHED));
    assert_eq!(OperatorType::Transform.to_string(), "transform");
}

#[test]
fn graph_shape_queries() -> Result<()> {
    let range = make_range(0, 8)?;
    let doubled = make_transform(&range, |row| row[0].add(&row[0]));
    let wide = make_union(vec![range.clone(), doubled.clone()])?;
    let filtered = make_logical_filter(&wide, &make_sarray_source(int_column(0, 8)))?;
    let both = make_union(vec![filtered.clone(), filtered.clone()])?;
    let filtered_pair = make_union(vec![
        filtered.clone(),
        make_transform(&make_logical_filter(&range, &range)?, |row| row[0].clone()),
    ])?;

    assert!(is_linear_graph(&doubled));
    assert!(!is_linear_graph(&wide));
    assert!(is_parallel_slicable(&wide));
    assert!(is_parallel_slicable(&filtered));
    assert!(!is_parallel_slicable(&both));
    assert!(!is_parallel_slicable(&filtered_pair));
    assert!(!is_parallel_slicable(&make_append(&range, &doubled)?));
    Ok(())
}

#[test]
fn inferred_shape() -> Result<()> {
    let table = TableBuilder::new()
        .int_column("id", 0..4)
        .str_column("name", ["a", "b", "c", "d"])
        .build()?;
    let source = make_sframe_source(table);
    let spread = make_generalized_transform(&source, |row| vec![row[0].clone(); 3], 3)?;
    let node = make_union(vec![make_project(&source, &[1])?, spread])?;

    assert_eq!(infer_num_columns(&node)?, 4);
    assert_eq!(infer_column_names(&node)?, ["name", "X1", "X2", "X3"]);
    assert_eq!(infer_length(&node), Some(4));

    let appended = make_append(&node, &node)?;
    assert_eq!(infer_length(&appended), Some(8));
    assert_eq!(infer_length(&make_reduce(&appended, Aggregate::Min)), Some(1));
    Ok(())
}

#[test]
fn realized_node_is_visible_to_every_holder() -> Result<()> {
    let planner = TestPlanner::new()?;
    let shared = make_transform(&make_range(0, 4)?, |row| row[0].clone());
    let parent = make_union(vec![shared.clone(), make_range(0, 4)?])?;

    planner.materialize(&shared, &MaterializeOptions::default())?;
    assert_eq!(parent.input(0).operator_type(), OperatorType::SframeSource);
    assert_eq!(parent.input(0).id(), shared.id());
    Ok(())
}

#[test]
fn malformed_access_is_an_error() -> Result<()> {
    let is_contract = |err: Option<anyhow::Error>| {
        matches!(
            err.as_ref().and_then(|e| e.downcast_ref::<QueryError>()),
            Some(QueryError::Contract(_))
        )
    };

    let mut table = sequential_table(3, 2)?;
    assert!(is_contract(table.select_column(2).err()));
    assert!(is_contract(table.column_name(5).err()));
    assert!(is_contract(table.set_column_name(2, "z").err()));
    table.set_column_name(1, "z")?;
    assert_eq!(table.column_name(1)?, "z");

    let orphan = NodeState::new(OperatorType::Project)
        .param(keys::INDICES, &[0usize][..])
        .into_node();
    assert!(is_contract(infer_column_names(&orphan).err()));
    Ok(())
}
