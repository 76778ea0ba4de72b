//! Common Schema Primitives
//!
//! Shared types used across all schemas

use serde::{Deserialize, Serialize};

/// ISO 8601 timestamp string, opaque to the gateway
pub type Timestamp = String;

/// A 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u64,
    pub size: u64,
}

impl Page {
    /// Builds a page; numbers below 1 are treated as the first page and
    /// sizes below 1 as a single item.
    pub fn new(number: i64, size: u64) -> Self {
        Self {
            number: number.max(1) as u64,
            size: size.max(1),
        }
    }

    /// Number of items to skip before this page starts
    pub fn offset(&self) -> u64 {
        (self.number - 1).saturating_mul(self.size)
    }

    /// Slices an ordered collection down to this page.
    pub fn slice<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.offset() as usize)
            .take(self.size as usize)
            .collect()
    }
}
