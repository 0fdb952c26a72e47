//! Bank statement ingest, matching and the reconciliation statement

pub mod brs;
pub mod engine;
pub mod ingest;

pub use brs::*;
pub use engine::*;
pub use ingest::*;
