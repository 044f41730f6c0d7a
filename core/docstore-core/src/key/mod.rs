//! Key model: scalar values, identifiers, key definitions and the key DSL.

pub mod definition;
pub mod identifier;
pub mod parser;
pub mod timeuuid;
pub mod types;

pub use definition::{
    ClusteringKeyComponent, FieldSource, FieldValue, KeyComponent, KeyDefinition, SortOrder,
};
pub use identifier::Identifier;
pub use parser::KeyDefinitionParser;
pub use timeuuid::TimeUuidGenerator;
pub use types::{ScalarType, ScalarValue};
