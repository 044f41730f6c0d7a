//! Bucketed secondary indexes.

pub mod bucket;
pub mod bucketed;

pub use bucket::{BucketPartitioner, DEFAULT_BUCKET_COUNT};
pub use bucketed::BucketedViewIndex;
