//! Shared types for the quorum coordination node
//!
//! This crate holds the error taxonomy and the small set of domain types
//! that cross crate boundaries: node identities, lock modes, and the
//! commands replicated through the consensus log.

pub mod error;
pub mod types;

pub use error::{CoordinationError, Result};
pub use types::{LockCommand, LockMode, NodeId};
