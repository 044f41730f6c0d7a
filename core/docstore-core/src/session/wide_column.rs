//! Embedded wide-column store: sled-backed [`Session`] implementation.
//!
//! Each `keyspace.table` maps to a separate sled `Tree`. Table layouts are
//! persisted as JSON in the `__catalog__` tree and restored on open.
//!
//! Row keys are the tagged encoding of the partition values followed by the
//! clustering values. The encoding is prefix-free, so a partition (or any
//! longer key prefix) is a byte prefix of its rows and scans use
//! `scan_prefix`. Rows are bincode-encoded column maps with an optional
//! expiry instant derived from the table's default TTL; expired rows read
//! as absent.

use crate::cql::{ColumnType, CqlValue, ResultSet, Row, Statement, StatementPlan, TableLayout};
use crate::error::{DocError, DocResult};
use crate::key::{ScalarValue, SortOrder};
use crate::session::{PreparedStatement, Session};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tracing::{debug, info};

const CATALOG_TREE: &str = "__catalog__";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRow {
    columns: BTreeMap<String, CqlValue>,
    /// Epoch milliseconds
    expires_at: Option<i64>,
}

impl StoredRow {
    fn is_live(&self, now_millis: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now_millis)
    }

    fn project(&self, columns: &[String]) -> Row {
        Row::new(
            columns
                .iter()
                .map(|c| {
                    let value = self.columns.get(c).cloned().unwrap_or(CqlValue::Null);
                    (c.clone(), value)
                })
                .collect(),
        )
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// sled-backed wide-column store.
pub struct WideColumnStore {
    db: sled::Db,
    catalog: sled::Tree,
    tables: DashMap<String, Arc<TableLayout>>,
    ddl: Mutex<()>,
    next_statement_id: AtomicU64,
    prepares: AtomicU64,
}

impl WideColumnStore {
    /// Open the store at the given directory path, restoring the table catalog.
    pub fn open(path: &Path) -> DocResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Open a temporary store (for testing). Data is deleted on drop.
    pub fn open_temporary() -> DocResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> DocResult<Self> {
        let catalog = db.open_tree(CATALOG_TREE)?;
        let tables = DashMap::new();
        for item in catalog.iter() {
            let (name, layout) = item?;
            let name = String::from_utf8(name.to_vec())
                .map_err(|e| DocError::Storage(format!("corrupt catalog entry: {e}")))?;
            let layout: TableLayout = serde_json::from_slice(&layout)?;
            tables.insert(name, Arc::new(layout));
        }
        info!(tables = tables.len(), "wide-column store opened");
        Ok(Self {
            db,
            catalog,
            tables,
            ddl: Mutex::new(()),
            next_statement_id: AtomicU64::new(1),
            prepares: AtomicU64::new(0),
        })
    }

    /// Number of statements prepared since open.
    pub fn prepare_count(&self) -> u64 {
        self.prepares.load(AtomicOrdering::Relaxed)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Qualified names of all tables, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn flush(&self) -> DocResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn layout(&self, table: &str) -> DocResult<Arc<TableLayout>> {
        self.tables
            .get(table)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| DocError::Storage(format!("table {table} does not exist")))
    }

    fn tree(&self, table: &str) -> DocResult<sled::Tree> {
        Ok(self.db.open_tree(table)?)
    }

    // ════════════════════════════════════════════
    // Statement validation
    // ════════════════════════════════════════════

    fn check_statement(&self, statement: &Statement) -> DocResult<()> {
        let fail = |message: String| DocError::Statement {
            message,
            cql: statement.cql.clone(),
        };
        let plan = &statement.plan;
        if plan.is_ddl() {
            return Ok(());
        }
        let layout = self
            .tables
            .get(plan.table())
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| fail(format!("unconfigured table {}", plan.table())))?;
        let key_names = layout.key_names();

        let referenced: Vec<&String> = match plan {
            StatementPlan::Insert { columns, .. } => {
                for name in &key_names {
                    if !columns.iter().any(|c| c == name) {
                        return Err(fail(format!("missing primary key column {name}")));
                    }
                }
                columns.iter().collect()
            }
            StatementPlan::Update { set, key, .. } => {
                if *key != key_names {
                    return Err(fail("update must bind the full primary key".to_string()));
                }
                if let Some(c) = set.iter().find(|c| key_names.contains(&c.as_str())) {
                    return Err(fail(format!("primary key column {c} cannot be updated")));
                }
                set.iter().collect()
            }
            StatementPlan::Delete { key, .. } => {
                if *key != key_names {
                    return Err(fail("delete must bind the full primary key".to_string()));
                }
                Vec::new()
            }
            StatementPlan::Select { columns, key, .. } => {
                if key.iter().zip(&key_names).any(|(a, b)| a != b) || key.len() > key_names.len()
                {
                    return Err(fail("restriction must be a primary key prefix".to_string()));
                }
                if key.len() < layout.partition.len() {
                    return Err(fail(
                        "partition key must be fully restricted".to_string(),
                    ));
                }
                columns.iter().collect()
            }
            StatementPlan::CreateTable { .. } | StatementPlan::DropTable { .. } => Vec::new(),
        };
        if let Some(c) = referenced.iter().find(|c| layout.column_type(c).is_none()) {
            return Err(fail(format!("undefined column {c}")));
        }
        Ok(())
    }

    // ════════════════════════════════════════════
    // Execution
    // ════════════════════════════════════════════

    fn create_table(&self, table: &str, layout: &TableLayout) -> DocResult<ResultSet> {
        let _guard = self.ddl.lock();
        if self.tables.contains_key(table) {
            return Ok(ResultSet::not_applied(None));
        }
        self.catalog
            .insert(table.as_bytes(), serde_json::to_vec(layout)?)?;
        self.tree(table)?;
        self.tables.insert(table.to_string(), Arc::new(layout.clone()));
        info!(table, "table created");
        Ok(ResultSet::applied())
    }

    fn drop_table(&self, table: &str) -> DocResult<ResultSet> {
        let _guard = self.ddl.lock();
        if self.tables.remove(table).is_none() {
            return Ok(ResultSet::not_applied(None));
        }
        self.catalog.remove(table.as_bytes())?;
        self.db.drop_tree(table)?;
        info!(table, "table dropped");
        Ok(ResultSet::applied())
    }

    fn insert(
        &self,
        statement: &Statement,
        table: &str,
        columns: &[String],
        values: Vec<CqlValue>,
        if_not_exists: bool,
    ) -> DocResult<ResultSet> {
        let layout = self.layout(table)?;
        let mut row = BTreeMap::new();
        for (name, value) in columns.iter().zip(values) {
            check_value(statement, &layout, name, &value)?;
            row.insert(name.clone(), value);
        }
        let key = encode_key(statement, &layout, &row, layout.primary_key_len())?;
        let now = now_millis();
        let stored = StoredRow {
            columns: row,
            expires_at: expiry(&layout, now),
        };
        let bytes = bincode::serialize(&stored)?;
        let tree = self.tree(table)?;

        if !if_not_exists {
            tree.insert(key, bytes)?;
            return Ok(ResultSet::applied());
        }

        loop {
            let current = tree.get(&key)?;
            if let Some(existing) = decode_live(current.as_deref(), now)? {
                return Ok(ResultSet::not_applied(Some(
                    existing.project(&layout_columns(&layout)),
                )));
            }
            match tree.compare_and_swap(&key, current.as_ref(), Some(bytes.clone()))? {
                Ok(()) => return Ok(ResultSet::applied()),
                Err(_) => continue,
            }
        }
    }

    fn update(
        &self,
        statement: &Statement,
        table: &str,
        set: &[String],
        key_columns: &[String],
        mut values: Vec<CqlValue>,
        if_exists: bool,
    ) -> DocResult<ResultSet> {
        let layout = self.layout(table)?;
        let key_values = values.split_off(set.len());
        let mut assignments = BTreeMap::new();
        for (name, value) in set.iter().zip(values) {
            check_value(statement, &layout, name, &value)?;
            assignments.insert(name.clone(), value);
        }
        let mut key_row = BTreeMap::new();
        for (name, value) in key_columns.iter().zip(key_values) {
            check_value(statement, &layout, name, &value)?;
            key_row.insert(name.clone(), value);
        }
        let key = encode_key(statement, &layout, &key_row, key_columns.len())?;
        let tree = self.tree(table)?;

        loop {
            let now = now_millis();
            let current = tree.get(&key)?;
            let mut columns = match decode_live(current.as_deref(), now)? {
                Some(existing) => existing.columns,
                None if if_exists => return Ok(ResultSet::not_applied(None)),
                None => key_row.clone(),
            };
            columns.extend(assignments.clone());
            let bytes = bincode::serialize(&StoredRow {
                columns,
                expires_at: expiry(&layout, now),
            })?;
            match tree.compare_and_swap(&key, current.as_ref(), Some(bytes))? {
                Ok(()) => return Ok(ResultSet::applied()),
                Err(_) => continue,
            }
        }
    }

    fn delete(
        &self,
        statement: &Statement,
        table: &str,
        key_columns: &[String],
        values: Vec<CqlValue>,
    ) -> DocResult<ResultSet> {
        let layout = self.layout(table)?;
        let key_row: BTreeMap<String, CqlValue> =
            key_columns.iter().cloned().zip(values).collect();
        let key = encode_key(statement, &layout, &key_row, key_columns.len())?;
        self.tree(table)?.remove(key)?;
        Ok(ResultSet::applied())
    }

    fn select(
        &self,
        statement: &Statement,
        table: &str,
        columns: &[String],
        key_columns: &[String],
        values: Vec<CqlValue>,
        limit: Option<u32>,
    ) -> DocResult<ResultSet> {
        let layout = self.layout(table)?;
        let key_row: BTreeMap<String, CqlValue> =
            key_columns.iter().cloned().zip(values).collect();
        let prefix = encode_key(statement, &layout, &key_row, key_columns.len())?;
        let tree = self.tree(table)?;
        let now = now_millis();

        let mut rows = Vec::new();
        if key_columns.len() == layout.primary_key_len() {
            if let Some(row) = decode_live(tree.get(&prefix)?.as_deref(), now)? {
                rows.push(row);
            }
        } else {
            for item in tree.scan_prefix(&prefix) {
                let (_, bytes) = item?;
                if let Some(row) = decode_live(Some(&bytes[..]), now)? {
                    rows.push(row);
                }
            }
            rows.sort_by(|a, b| compare_rows(&layout, a, b));
        }

        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }
        debug!(table, rows = rows.len(), "select");
        Ok(ResultSet::with_rows(
            rows.iter().map(|r| r.project(columns)).collect(),
        ))
    }
}

#[async_trait]
impl Session for WideColumnStore {
    async fn prepare(&self, statement: &Statement) -> DocResult<Arc<PreparedStatement>> {
        self.check_statement(statement)?;
        self.prepares.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(Arc::new(PreparedStatement {
            id: self.next_statement_id.fetch_add(1, AtomicOrdering::Relaxed),
            statement: statement.clone(),
        }))
    }

    async fn execute(
        &self,
        prepared: &PreparedStatement,
        values: Vec<CqlValue>,
    ) -> DocResult<ResultSet> {
        prepared.validate_params(&values)?;
        let statement = &prepared.statement;
        match &statement.plan {
            StatementPlan::CreateTable { table, layout } => self.create_table(table, layout),
            StatementPlan::DropTable { table } => self.drop_table(table),
            StatementPlan::Insert {
                table,
                columns,
                if_not_exists,
            } => self.insert(statement, table, columns, values, *if_not_exists),
            StatementPlan::Update {
                table,
                set,
                key,
                if_exists,
            } => self.update(statement, table, set, key, values, *if_exists),
            StatementPlan::Delete { table, key } => self.delete(statement, table, key, values),
            StatementPlan::Select {
                table,
                columns,
                key,
                limit,
            } => self.select(statement, table, columns, key, values, *limit),
        }
    }
}

fn layout_columns(layout: &TableLayout) -> Vec<String> {
    layout
        .key_names()
        .into_iter()
        .map(str::to_string)
        .chain(layout.regular.iter().map(|c| c.name.clone()))
        .collect()
}

fn expiry(layout: &TableLayout, now_millis: i64) -> Option<i64> {
    layout
        .default_ttl
        .filter(|ttl| *ttl > 0)
        .map(|ttl| now_millis + i64::from(ttl) * 1000)
}

fn decode_live(bytes: Option<&[u8]>, now_millis: i64) -> DocResult<Option<StoredRow>> {
    match bytes {
        None => Ok(None),
        Some(bytes) => {
            let row: StoredRow = bincode::deserialize(bytes)?;
            Ok(row.is_live(now_millis).then_some(row))
        }
    }
}

fn check_value(
    statement: &Statement,
    layout: &TableLayout,
    column: &str,
    value: &CqlValue,
) -> DocResult<()> {
    let column_type = layout.column_type(column).ok_or_else(|| DocError::Statement {
        message: format!("undefined column {column}"),
        cql: statement.cql.clone(),
    })?;
    let ok = match (column_type, value) {
        (_, CqlValue::Null) => true,
        (ColumnType::Scalar(ty), CqlValue::Scalar(v)) => v.scalar_type() == ty,
        (ColumnType::Blob, CqlValue::Blob(_)) => true,
        (ColumnType::Boolean, CqlValue::Boolean(_)) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(DocError::Statement {
            message: format!(
                "invalid value for column {column} of type {}",
                column_type.cql_name()
            ),
            cql: statement.cql.clone(),
        })
    }
}

/// Tagged encoding of the first `n` key columns.
fn encode_key(
    statement: &Statement,
    layout: &TableLayout,
    row: &BTreeMap<String, CqlValue>,
    n: usize,
) -> DocResult<Vec<u8>> {
    let mut out = Vec::new();
    for name in layout.key_names().into_iter().take(n) {
        match row.get(name) {
            Some(CqlValue::Scalar(value)) if Some(value.scalar_type()) == layout.key_type(name) => {
                value.encode_tagged(&mut out)
            }
            _ => {
                return Err(DocError::Statement {
                    message: format!("invalid or null primary key value for column {name}"),
                    cql: statement.cql.clone(),
                });
            }
        }
    }
    Ok(out)
}

fn key_scalar<'a>(row: &'a StoredRow, name: &str) -> Option<&'a ScalarValue> {
    match row.columns.get(name) {
        Some(CqlValue::Scalar(v)) => Some(v),
        _ => None,
    }
}

/// Partition columns ascending, then clustering columns in their declared order.
fn compare_rows(layout: &TableLayout, a: &StoredRow, b: &StoredRow) -> Ordering {
    for column in &layout.partition {
        let ord = key_scalar(a, &column.name).cmp(&key_scalar(b, &column.name));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    for column in &layout.clustering {
        let ord = key_scalar(a, &column.name).cmp(&key_scalar(b, &column.name));
        let ord = match column.order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cql::{Operation, RowLayout, compile};
    use crate::key::KeyDefinition;

    fn layout(dsl: &str) -> RowLayout {
        RowLayout::document(Arc::new(KeyDefinition::parse(dsl).unwrap()))
    }

    async fn create(store: &WideColumnStore, layout: &RowLayout) {
        let result = store
            .execute_statement(&compile(Operation::CreateTable, layout, "ks", "t"), vec![])
            .await
            .unwrap();
        assert!(result.applied);
    }

    fn doc_values(key: Vec<ScalarValue>, object: &[u8]) -> Vec<CqlValue> {
        let mut values: Vec<CqlValue> = key.into_iter().map(CqlValue::Scalar).collect();
        values.push(CqlValue::Blob(object.to_vec()));
        values.push(CqlValue::Null);
        values.push(CqlValue::Null);
        values
    }

    #[tokio::test]
    async fn insert_if_not_exists_applies_once() {
        let store = WideColumnStore::open_temporary().unwrap();
        let l = layout("id:int");
        create(&store, &l).await;
        let insert = compile(Operation::Insert, &l, "ks", "t");

        let first = store
            .execute_statement(&insert, doc_values(vec![ScalarValue::Int(1)], b"a"))
            .await
            .unwrap();
        assert!(first.applied);

        let second = store
            .execute_statement(&insert, doc_values(vec![ScalarValue::Int(1)], b"b"))
            .await
            .unwrap();
        assert!(!second.applied);
        assert_eq!(second.first().unwrap().blob("object").unwrap(), Some(&b"a"[..]));
    }

    #[tokio::test]
    async fn update_if_exists_requires_row() {
        let store = WideColumnStore::open_temporary().unwrap();
        let l = layout("id:int");
        create(&store, &l).await;
        let update = compile(Operation::Update, &l, "ks", "t");
        let values = vec![
            CqlValue::Blob(b"x".to_vec()),
            CqlValue::Null,
            CqlValue::Scalar(ScalarValue::Int(9)),
        ];
        let result = store.execute_statement(&update, values.clone()).await.unwrap();
        assert!(!result.applied);

        store
            .execute_statement(
                &compile(Operation::Upsert, &l, "ks", "t"),
                doc_values(vec![ScalarValue::Int(9)], b"old"),
            )
            .await
            .unwrap();
        assert!(store.execute_statement(&update, values).await.unwrap().applied);

        let read = store
            .execute_statement(
                &compile(Operation::Select, &l, "ks", "t"),
                vec![CqlValue::Scalar(ScalarValue::Int(9))],
            )
            .await
            .unwrap();
        assert_eq!(read.first().unwrap().blob("object").unwrap(), Some(&b"x"[..]));
    }

    #[tokio::test]
    async fn partition_scan_follows_clustering_order() {
        let store = WideColumnStore::open_temporary().unwrap();
        let l = layout("(p:text), -c:int");
        create(&store, &l).await;
        let upsert = compile(Operation::Upsert, &l, "ks", "t");
        for c in [2, 7, 4] {
            store
                .execute_statement(
                    &upsert,
                    doc_values(vec![ScalarValue::from("a"), ScalarValue::Int(c)], b""),
                )
                .await
                .unwrap();
        }
        store
            .execute_statement(
                &upsert,
                doc_values(vec![ScalarValue::from("b"), ScalarValue::Int(1)], b""),
            )
            .await
            .unwrap();

        let scan = compile(
            Operation::SelectPrefix {
                components: 1,
                limit: None,
            },
            &l,
            "ks",
            "t",
        );
        let rows = store
            .execute_statement(&scan, vec![CqlValue::Scalar(ScalarValue::from("a"))])
            .await
            .unwrap()
            .rows;
        let order: Vec<&ScalarValue> = rows.iter().map(|r| r.scalar("c").unwrap()).collect();
        assert_eq!(
            order,
            vec![&ScalarValue::Int(7), &ScalarValue::Int(4), &ScalarValue::Int(2)]
        );
    }

    #[tokio::test]
    async fn partial_partition_restriction_is_rejected() {
        let store = WideColumnStore::open_temporary().unwrap();
        let l = layout("(a:int, b:int), c:int");
        create(&store, &l).await;
        let scan = compile(
            Operation::SelectPrefix {
                components: 1,
                limit: None,
            },
            &l,
            "ks",
            "t",
        );
        assert!(matches!(
            store.prepare(&scan).await,
            Err(DocError::Statement { .. })
        ));
        let unrestricted = compile(
            Operation::SelectPrefix {
                components: 0,
                limit: None,
            },
            &l,
            "ks",
            "t",
        );
        assert!(matches!(
            store.prepare(&unrestricted).await,
            Err(DocError::Statement { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_table_and_wrong_types_fail() {
        let store = WideColumnStore::open_temporary().unwrap();
        let l = layout("id:int");
        assert!(store
            .prepare(&compile(Operation::Select, &l, "ks", "t"))
            .await
            .is_err());

        create(&store, &l).await;
        let err = store
            .execute_statement(
                &compile(Operation::Upsert, &l, "ks", "t"),
                doc_values(vec![ScalarValue::from("nope")], b""),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocError::Statement { .. }));
    }

    #[tokio::test]
    async fn create_and_drop_report_applied() {
        let store = WideColumnStore::open_temporary().unwrap();
        let l = layout("id:int");
        create(&store, &l).await;
        let again = store
            .execute_statement(&compile(Operation::CreateTable, &l, "ks", "t"), vec![])
            .await
            .unwrap();
        assert!(!again.applied);

        let drop = compile(Operation::DropTable, &l, "ks", "t");
        assert!(store.execute_statement(&drop, vec![]).await.unwrap().applied);
        assert!(!store.execute_statement(&drop, vec![]).await.unwrap().applied);
        assert!(!store.has_table("ks.t"));
    }

    #[tokio::test]
    async fn catalog_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let l = layout("id:int");
        {
            let store = WideColumnStore::open(dir.path()).unwrap();
            create(&store, &l).await;
            store
                .execute_statement(
                    &compile(Operation::Upsert, &l, "ks", "t"),
                    doc_values(vec![ScalarValue::Int(3)], b"kept"),
                )
                .await
                .unwrap();
            store.flush().unwrap();
        }
        let store = WideColumnStore::open(dir.path()).unwrap();
        assert_eq!(store.table_names(), vec!["ks.t".to_string()]);
        let read = store
            .execute_statement(
                &compile(Operation::Select, &l, "ks", "t"),
                vec![CqlValue::Scalar(ScalarValue::Int(3))],
            )
            .await
            .unwrap();
        assert_eq!(read.first().unwrap().blob("object").unwrap(), Some(&b"kept"[..]));
    }

    #[test]
    fn expired_rows_are_not_live() {
        let row = StoredRow {
            columns: BTreeMap::new(),
            expires_at: Some(1_000),
        };
        assert!(row.is_live(999));
        assert!(!row.is_live(1_000));
        let forever = StoredRow {
            columns: BTreeMap::new(),
            expires_at: None,
        };
        assert!(forever.is_live(i64::MAX));
    }
}
