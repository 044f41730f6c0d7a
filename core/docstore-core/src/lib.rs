//! # docstore: multi-tenant document store over a wide-column store
//!
//! Schema-less documents live in logical tables, each keyed by a composite
//! key described in a small DSL (`"(tenant:text), -at:timestamp, id:uuid"`).
//! Every table is backed by one wide-row table; views project the same
//! documents under another key and bucketed indexes shard secondary-index
//! entries over a fixed number of partitions.
//!
//! ## Quick start
//!
//! ```rust
//! use docstore_core::{Document, DocumentService, Identifier, StoreConfig, Table};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> docstore_core::DocResult<()> {
//! let service = DocumentService::open(&StoreConfig::default()).await?;
//! let users = Table::new("acme", "users", "id:int");
//! service.create_table(&users).await?;
//!
//! let doc = Document::from_json(Identifier::of(1), &json!({"name": "Alice"}))?;
//! service.create(&users.id(), &doc).await?;
//! assert!(service.exists(&users.id(), &Identifier::of(1)).await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`key`]: scalar types, identifiers, key definitions and the key DSL
//! - [`cql`]: statement model and the statement compiler
//! - [`session`]: the store seam and the embedded sled-backed store
//! - [`document`]: documents, payload codec and repositories
//! - [`index`]: bucket partitioner and bucketed secondary indexes
//! - [`schema`]: Table/View/Index metadata and their physical tables
//! - [`service`]: [`DocumentService`] with view and index fan-out

pub mod config;
pub mod cql;
pub mod document;
pub mod error;
pub mod index;
pub mod key;
pub mod schema;
pub mod service;
pub mod session;

// Logging utilities
pub mod logging;

pub use config::StoreConfig;
pub use document::{Document, DocumentRepository, HistoricalDocument, HistoricalRepository};
pub use error::{DocError, DocResult};
pub use index::{BucketPartitioner, BucketedViewIndex};
pub use key::{Identifier, KeyDefinition, ScalarType, ScalarValue};
pub use schema::{Index, IndexEngine, SchemaCatalog, Table, TableId, View};
pub use service::{DocumentService, FanoutStatus, WriteOutcome};
pub use session::{Session, WideColumnStore};
