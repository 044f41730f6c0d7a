//! Session seam to the underlying wide-column store.
//!
//! The document layer depends only on `prepare(statement) → handle` and
//! `execute(handle, bound values) → rows | applied flag`. Any store that
//! speaks the statement dialect in [`crate::cql`] can sit behind it.

pub mod wide_column;

pub use wide_column::WideColumnStore;

use crate::cql::{CqlValue, Operation, ResultSet, Statement};
use crate::error::DocResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// A statement the store has accepted and can execute repeatedly.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Store-assigned handle
    pub id: u64,

    pub statement: Statement,
}

impl PreparedStatement {
    pub fn cql(&self) -> &str {
        &self.statement.cql
    }

    /// Validate that the correct number of values are bound
    pub fn validate_params(&self, values: &[CqlValue]) -> DocResult<()> {
        self.statement.validate_params(values.len())
    }
}

/// Connection to a wide-column store.
#[async_trait]
pub trait Session: Send + Sync {
    /// Parse and register a statement.
    async fn prepare(&self, statement: &Statement) -> DocResult<Arc<PreparedStatement>>;

    /// Execute a prepared statement with positional values.
    async fn execute(
        &self,
        prepared: &PreparedStatement,
        values: Vec<CqlValue>,
    ) -> DocResult<ResultSet>;

    /// Prepare and execute once (schema statements).
    async fn execute_statement(
        &self,
        statement: &Statement,
        values: Vec<CqlValue>,
    ) -> DocResult<ResultSet> {
        let prepared = self.prepare(statement).await?;
        self.execute(&prepared, values).await
    }
}

/// Per-repository prepared statements, keyed by operation.
///
/// Populated lazily; two callers racing on first use may both prepare, and
/// the first insert wins.
#[derive(Debug, Default)]
pub struct StatementCache {
    entries: DashMap<Operation, Arc<PreparedStatement>>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_prepare<F>(
        &self,
        session: &dyn Session,
        operation: Operation,
        build: F,
    ) -> DocResult<Arc<PreparedStatement>>
    where
        F: FnOnce() -> Statement + Send,
    {
        let cached = self.entries.get(&operation).map(|e| Arc::clone(e.value()));
        if let Some(prepared) = cached {
            return Ok(prepared);
        }

        let statement = build();
        debug!(operation = operation.name(), cql = %statement.cql, "preparing statement");
        let prepared = session.prepare(&statement).await?;
        Ok(Arc::clone(
            self.entries.entry(operation).or_insert(prepared).value(),
        ))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
