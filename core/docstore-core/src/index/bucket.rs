//! Hash-range bucket partitioner.
//!
//! The non-negative 64-bit hash range is split into `B` contiguous segments
//! of width `i64::MAX / B`. A key lands in the segment whose upper bound is
//! the smallest boundary ≥ its hash; hashes above the last boundary wrap to
//! bucket 0.

use crate::error::{DocError, DocResult};
use crate::key::ScalarValue;

pub const DEFAULT_BUCKET_COUNT: u32 = 100;

/// Padding byte for canonical encodings shorter than 8 bytes (the minimum
/// signed byte value, `i8::MIN`).
const PAD_BYTE: u8 = i8::MIN as u8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPartitioner {
    boundaries: Vec<i64>,
}

impl BucketPartitioner {
    pub fn new(bucket_count: u32) -> DocResult<Self> {
        if bucket_count == 0 {
            return Err(DocError::Validation(
                "bucket count must be at least 1".to_string(),
            ));
        }
        let width = i64::MAX / i64::from(bucket_count);
        let boundaries = (1..=i64::from(bucket_count)).map(|i| width * i).collect();
        Ok(Self { boundaries })
    }

    pub fn bucket_count(&self) -> u32 {
        self.boundaries.len() as u32
    }

    /// Sorted upper bounds of the segments.
    pub fn boundaries(&self) -> &[i64] {
        &self.boundaries
    }

    /// First 8 bytes, right-padded, big-endian, absolute value.
    pub fn hash_bytes(bytes: &[u8]) -> i64 {
        let mut head = [PAD_BYTE; 8];
        let n = bytes.len().min(8);
        head[..n].copy_from_slice(&bytes[..n]);
        i64::from_be_bytes(head).checked_abs().unwrap_or(i64::MAX)
    }

    pub fn hash(value: &ScalarValue) -> i64 {
        Self::hash_bytes(&value.canonical_bytes())
    }

    /// Bucket id in `0..B` for a hash.
    pub fn bucket_for_hash(&self, hash: i64) -> i64 {
        let position = self.boundaries.partition_point(|b| *b < hash);
        (position % self.boundaries.len()) as i64
    }

    pub fn bucket_for(&self, value: &ScalarValue) -> i64 {
        self.bucket_for_hash(Self::hash(value))
    }
}

impl Default for BucketPartitioner {
    fn default() -> Self {
        let width = i64::MAX / i64::from(DEFAULT_BUCKET_COUNT);
        Self {
            boundaries: (1..=i64::from(DEFAULT_BUCKET_COUNT))
                .map(|i| width * i)
                .collect(),
        }
    }
}
