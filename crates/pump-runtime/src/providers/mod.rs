//! Entity client implementations.
//!
//! Only the in-memory provider lives here; real transports implement the
//! [`crate::client::EntityClient`] traits in their own crates.

pub mod memory;

pub use memory::{InMemoryEntity, InMemoryEntityConfig};
