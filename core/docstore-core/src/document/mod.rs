//! Documents and the repositories that store them.

pub mod codec;
pub mod entity;
pub mod historical;
pub mod repository;

pub use codec::{DocumentFields, NoopValidator, PayloadCodec, PayloadValidator, Validator};
pub use entity::{Document, HistoricalDocument, now_millis};
pub use historical::HistoricalRepository;
pub use repository::{Capabilities, DocumentRepository};
