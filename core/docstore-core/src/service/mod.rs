//! Table-addressed document service with view and index fan-out.

pub mod cache;
pub mod document_service;

pub use cache::{ServiceCache, ViewBinding};
pub use document_service::{
    DeleteOutcome, DocumentService, FanoutStatus, FanoutWrite, WriteOutcome,
};
