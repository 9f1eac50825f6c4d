//! Tests for engine configuration.

use anyhow::Result;
use sframe_query::config::{ENV_BLOCK_SIZE, ENV_MAX_LAZY_NODE_SIZE, ENV_NUM_THREADS};
use sframe_query::prelude::*;

#[test]
fn defaults() {
    let config = QueryConfig::default();
    assert_eq!(config.max_lazy_node_size, 10_000);
    assert_eq!(config.num_threads, None);
    assert_eq!(config.block_size, 1024);

    let options = MaterializeOptions::default();
    assert_eq!(options.num_segments, 0);
    assert!(!options.disable_optimization);
    assert!(options.partial_materialize);
    assert!(!options.naive_mode);
    assert!(options.output_index_file.is_none());
    assert!(options.write_callback.is_none());
}

#[test]
fn builders_clamp_to_one() {
    let config = QueryConfig::default().with_num_threads(0).with_block_size(0);
    assert_eq!(config.num_threads, Some(1));
    assert_eq!(config.block_size, 1);
}

#[test]
fn serde_fills_missing_fields() -> Result<()> {
    let config: QueryConfig = serde_json::from_str(r#"{ "block_size": 16 }"#)?;
    assert_eq!(config.block_size, 16);
    assert_eq!(config.max_lazy_node_size, QueryConfig::default().max_lazy_node_size);

    let round: QueryConfig = serde_json::from_str(&serde_json::to_string(&config)?)?;
    assert_eq!(round, config);
    Ok(())
}

#[test]
fn context_follows_config() -> Result<()> {
    let ctx = QueryContext::new(QueryConfig::default().with_num_threads(3).with_max_lazy_node_size(7))?;
    assert_eq!(ctx.num_threads(), 3);
    assert_eq!(ctx.max_lazy_node_size(), 7);
    ctx.set_max_lazy_node_size(9);
    assert_eq!(ctx.max_lazy_node_size(), 9);
    assert_eq!(ctx.config().max_lazy_node_size, 7);
    Ok(())
}

// The only test in this binary touching the environment.
#[test]
fn from_env_reads_variables() -> Result<()> {
    // SAFETY: no other test in this binary reads or writes these variables.
    unsafe {
        std::env::set_var(ENV_MAX_LAZY_NODE_SIZE, "12");
        std::env::set_var(ENV_NUM_THREADS, "0");
        std::env::set_var(ENV_BLOCK_SIZE, " 64 ");
    }
    let config = QueryConfig::from_env()?;
    assert_eq!(config.max_lazy_node_size, 12);
    assert_eq!(config.num_threads, None);
    assert_eq!(config.block_size, 64);

    unsafe {
        std::env::set_var(ENV_BLOCK_SIZE, "lots");
    }
    let err = QueryConfig::from_env().err();
    assert!(err.is_some_and(|e| e.to_string().contains(ENV_BLOCK_SIZE)));

    unsafe {
        std::env::remove_var(ENV_MAX_LAZY_NODE_SIZE);
        std::env::remove_var(ENV_NUM_THREADS);
        std::env::remove_var(ENV_BLOCK_SIZE);
    }
    assert_eq!(QueryConfig::from_env()?, QueryConfig::default());
    Ok(())
}
