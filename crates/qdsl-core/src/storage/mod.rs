//! Storage layer for QDSL.
//!
//! This module provides the in-memory store the executor runs against,
//! with identity tables and an inverse index for derived collections.

mod inverse;
mod memory;
mod record;
mod table;

pub use inverse::InverseIndex;
pub use memory::{MemoryStore, NewRecord};
pub use record::EntityRecord;
pub use table::{Table, Tables};
