//! Shared Schemas
//!
//! All structs use `serde(rename_all = "camelCase")` for JSON compatibility
//! with existing API clients.

pub mod api_key;
pub mod common;
pub mod video;

pub use api_key::*;
pub use common::*;
pub use video::*;
