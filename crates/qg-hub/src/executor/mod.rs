//! # Query Executors
//!
//! The database side of the real-time path. [`memory::MemoryExecutor`] serves
//! fixture tables; [`pool::PooledExecutor`] bounds concurrency and applies a
//! per-call timeout around any other executor.

pub mod memory;
pub mod pool;

use async_trait::async_trait;
use qg_core::Row;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("malformed query: {0}")]
    Malformed(String),

    #[error("unsupported query: {0}")]
    Unsupported(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str) -> Result<Vec<Row>, ExecutionError>;
}
