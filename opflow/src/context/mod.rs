//! Data contexts and context registration.
//!
//! This module provides:
//! - A key-value data context operations share information through
//! - The context manager contract the scheduler notifies
//! - An in-memory registry implementing that contract

mod data;
mod registry;

pub use data::{DataConflictError, DataContext};
pub use registry::{ContextManager, ContextRegistry, NoOpContextManager};

#[cfg(test)]
pub(crate) use registry::MockContextManager;
