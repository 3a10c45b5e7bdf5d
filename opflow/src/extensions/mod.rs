//! Static extension model.
//!
//! This module provides:
//! - The catalog of declared extensions (and its JSON manifest form)
//! - The arena-backed table built from it for one operation tree

mod catalog;
mod table;

pub use catalog::{
    ExtensionCatalog, ExtensionDeclaration, ExtensionDescriptor, ExtensionManifest,
    ExtensionPosition, OperationFactories, OperationFactory,
};
pub use table::{EntryId, ExtensionEntry, ExtensionTable};
