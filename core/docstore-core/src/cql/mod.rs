//! Statement dialect of the underlying wide-column store.

pub mod compiler;
pub mod statement;
pub mod value;

pub use compiler::{
    CREATED_AT_COLUMN, OBJECT_COLUMN, Operation, RowLayout, UPDATED_AT_COLUMN, compile,
    drop_table_statement,
};
pub use statement::{
    ClusteringColumn, ColumnSpec, ColumnType, Statement, StatementPlan, TableLayout,
};
pub use value::{CqlValue, ResultSet, Row};
