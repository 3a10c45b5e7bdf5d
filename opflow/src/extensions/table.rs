//! Arena-backed extension table.

use super::{ExtensionCatalog, ExtensionPosition};
use crate::errors::{CycleDetectedError, OpflowError};
use crate::operations::OperationRef;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Index of an entry in the [`ExtensionTable`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

impl EntryId {
    /// Returns the raw arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One occurrence of an operation in the tree, with the extensions that run
/// around it.
#[derive(Debug, Clone)]
pub struct ExtensionEntry {
    operation: OperationRef,
    parent: Option<EntryId>,
    pre_extensions: Vec<EntryId>,
    post_extensions: Vec<EntryId>,
    pre_children: Vec<EntryId>,
    post_children: Vec<EntryId>,
}

impl ExtensionEntry {
    fn new(operation: OperationRef, parent: Option<EntryId>) -> Self {
        Self {
            operation,
            parent,
            pre_extensions: Vec::new(),
            post_extensions: Vec::new(),
            pre_children: Vec::new(),
            post_children: Vec::new(),
        }
    }

    /// The operation.
    #[must_use]
    pub fn operation(&self) -> &OperationRef {
        &self.operation
    }

    /// The entry this one extends or was declared by. `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    /// Pre-extensions, in execution order.
    #[must_use]
    pub fn pre_extensions(&self) -> &[EntryId] {
        &self.pre_extensions
    }

    /// Post-extensions, in execution order.
    #[must_use]
    pub fn post_extensions(&self) -> &[EntryId] {
        &self.post_extensions
    }

    /// Every dynamic child ever registered at `position`, in registration
    /// order.
    #[must_use]
    pub fn dynamic_children(&self, position: ExtensionPosition) -> &[EntryId] {
        match position {
            ExtensionPosition::Pre => &self.pre_children,
            ExtensionPosition::Post => &self.post_children,
        }
    }
}

/// Registry mapping operations to the extensions that run around them.
///
/// Entries live in an arena and reference each other by [`EntryId`], so
/// traversal state can be cloned cheaply. Operation ids index the arena;
/// when several entries share an id, lookups resolve to the most recently
/// registered or reused one. Dynamic children are reused per parent and id,
/// so re-traversing a tree does not grow the arena.
#[derive(Debug)]
pub struct ExtensionTable {
    entries: Vec<ExtensionEntry>,
    index: HashMap<String, Vec<EntryId>>,
    catalog: ExtensionCatalog,
    root: EntryId,
}

impl ExtensionTable {
    /// Builds the table for `root`, resolving every catalog extension
    /// reachable from it.
    ///
    /// # Errors
    ///
    /// Returns `CycleDetectedError` if the catalog makes an operation its
    /// own ancestor.
    pub fn build(root: OperationRef, catalog: ExtensionCatalog) -> Result<Self, CycleDetectedError> {
        let mut table = Self {
            entries: Vec::new(),
            index: HashMap::new(),
            catalog,
            root: EntryId(0),
        };
        table.root = table.insert_resolved(root, None)?;
        debug!(entries = table.entries.len(), "Extension table built");
        Ok(table)
    }

    /// The root entry.
    #[must_use]
    pub fn root(&self) -> EntryId {
        self.root
    }

    /// Returns the entry for `id`.
    ///
    /// Entry ids are only handed out by this table, so they are always valid.
    #[must_use]
    pub fn entry(&self, id: EntryId) -> &ExtensionEntry {
        &self.entries[id.0]
    }

    /// The operation stored at `id`.
    #[must_use]
    pub fn operation(&self, id: EntryId) -> &OperationRef {
        &self.entries[id.0].operation
    }

    /// Resolves an operation id to its most recent entry.
    #[must_use]
    pub fn lookup(&self, operation_id: &str) -> Option<EntryId> {
        self.index.get(operation_id).and_then(|ids| ids.last().copied())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false: a table has at least its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The catalog extensions are resolved from.
    #[must_use]
    pub fn catalog(&self) -> &ExtensionCatalog {
        &self.catalog
    }

    /// Operation ids from the root down to `id`, inclusive.
    #[must_use]
    pub fn ancestry(&self, id: EntryId) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let entry = &self.entries[current.0];
            path.push(entry.operation.id().to_string());
            cursor = entry.parent;
        }
        path.reverse();
        path
    }

    /// Registers `operation` to run immediately before `target_id`.
    ///
    /// Extensions the catalog declares for `operation` itself are resolved
    /// too. Registering the same pair twice runs the extension twice.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTarget` for an unknown id, or `CycleDetected` if the
    /// registration would make an operation its own ancestor. The table is
    /// unchanged on error.
    pub fn register_pre_extension(
        &mut self,
        target_id: &str,
        operation: OperationRef,
    ) -> Result<EntryId, OpflowError> {
        self.register_extension(target_id, ExtensionPosition::Pre, operation)
    }

    /// Registers `operation` to run immediately after `target_id`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::register_pre_extension`].
    pub fn register_post_extension(
        &mut self,
        target_id: &str,
        operation: OperationRef,
    ) -> Result<EntryId, OpflowError> {
        self.register_extension(target_id, ExtensionPosition::Post, operation)
    }

    /// Registers an extension at `position`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::register_pre_extension`].
    pub fn register_extension(
        &mut self,
        target_id: &str,
        position: ExtensionPosition,
        operation: OperationRef,
    ) -> Result<EntryId, OpflowError> {
        let target = self
            .lookup(target_id)
            .ok_or_else(|| OpflowError::unknown_target(target_id))?;

        let child = self.transactional(|table| table.insert_resolved(operation, Some(target)))?;
        self.attach(target, position, child);
        Ok(child)
    }

    /// Registers a dynamic child declared by the operation at `parent`.
    ///
    /// The child gets its own entry, so catalog extensions apply to it. An
    /// entry an earlier fetch registered at the same `position` with the
    /// same operation id is reused unless it is in `taken`, which holds the
    /// children already registered by the current fetch. A reused entry
    /// keeps its extensions and takes the new operation instance.
    ///
    /// # Errors
    ///
    /// Returns `CycleDetectedError` if the child is one of its ancestors.
    pub fn register_child(
        &mut self,
        parent: EntryId,
        position: ExtensionPosition,
        operation: OperationRef,
        taken: &[EntryId],
    ) -> Result<EntryId, CycleDetectedError> {
        let reusable = self.entries[parent.0]
            .dynamic_children(position)
            .iter()
            .copied()
            .find(|child| {
                !taken.contains(child) && self.entries[child.0].operation.id() == operation.id()
            });
        if let Some(child) = reusable {
            self.entries[child.0].operation = operation;
            self.promote(child);
            return Ok(child);
        }

        let child = self.transactional(|table| table.insert_resolved(operation, Some(parent)))?;
        let entry = &mut self.entries[parent.0];
        match position {
            ExtensionPosition::Pre => entry.pre_children.push(child),
            ExtensionPosition::Post => entry.post_children.push(child),
        }
        Ok(child)
    }

    fn promote(&mut self, id: EntryId) {
        let operation_id = self.entries[id.0].operation.id().to_string();
        let ids = self.index.entry(operation_id).or_default();
        ids.retain(|existing| *existing != id);
        ids.push(id);
    }

    fn attach(&mut self, target: EntryId, position: ExtensionPosition, child: EntryId) {
        let entry = &mut self.entries[target.0];
        match position {
            ExtensionPosition::Pre => entry.pre_extensions.push(child),
            ExtensionPosition::Post => entry.post_extensions.push(child),
        }
    }

    fn transactional<F>(&mut self, f: F) -> Result<EntryId, CycleDetectedError>
    where
        F: FnOnce(&mut Self) -> Result<EntryId, CycleDetectedError>,
    {
        let mark = self.entries.len();
        f(self).map_err(|err| {
            self.rollback(mark);
            err
        })
    }

    fn rollback(&mut self, mark: usize) {
        self.entries.truncate(mark);
        self.index.retain(|_, ids| {
            ids.retain(|id| id.0 < mark);
            !ids.is_empty()
        });
    }

    fn insert_resolved(
        &mut self,
        operation: OperationRef,
        parent: Option<EntryId>,
    ) -> Result<EntryId, CycleDetectedError> {
        let operation_id = operation.id().to_string();

        if let Some(parent) = parent {
            let mut path = self.ancestry(parent);
            if let Some(start) = path.iter().position(|id| *id == operation_id) {
                let mut cycle = path.split_off(start);
                cycle.push(operation_id);
                return Err(CycleDetectedError::new(cycle));
            }
        }

        let id = EntryId(self.entries.len());
        self.entries.push(ExtensionEntry::new(operation, parent));
        self.index.entry(operation_id.clone()).or_default().push(id);

        let declarations = self.catalog.declarations_for(&operation_id).to_vec();
        for descriptor in declarations {
            let extension = descriptor.instantiate();
            if extension.id() != descriptor.extension_id {
                warn!(
                    declared = %descriptor.extension_id,
                    actual = %extension.id(),
                    target = %operation_id,
                    "Extension factory produced an operation with a different id"
                );
            }
            let child = self.insert_resolved(extension, Some(id))?;
            self.attach(id, descriptor.position, child);
        }

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::{NullOperation, OperationRef};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn op(id: &str) -> OperationRef {
        Arc::new(NullOperation::new(id))
    }

    fn ids(table: &ExtensionTable, entries: &[EntryId]) -> Vec<String> {
        entries
            .iter()
            .map(|e| table.operation(*e).id().to_string())
            .collect()
    }

    #[test]
    fn test_build_resolves_extensions_of_extensions() {
        let catalog = ExtensionCatalog::new()
            .with_pre("root", "a", || op("a"))
            .with_post("root", "b", || op("b"))
            .with_pre("a", "a.pre", || op("a.pre"));

        let table = ExtensionTable::build(op("root"), catalog).unwrap();
        let root = table.entry(table.root());

        assert_eq!(ids(&table, root.pre_extensions()), vec!["a"]);
        assert_eq!(ids(&table, root.post_extensions()), vec!["b"]);

        let a = table.lookup("a").unwrap();
        assert_eq!(ids(&table, table.entry(a).pre_extensions()), vec!["a.pre"]);
        assert_eq!(table.ancestry(table.lookup("a.pre").unwrap()), vec!["root", "a", "a.pre"]);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_build_detects_catalog_cycle() {
        let catalog = ExtensionCatalog::new()
            .with_pre("root", "a", || op("a"))
            .with_pre("a", "b", || op("b"))
            .with_post("b", "a", || op("a"));

        let err = ExtensionTable::build(op("root"), catalog).unwrap_err();
        assert_eq!(err.cycle_path, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_register_unknown_target() {
        let mut table = ExtensionTable::build(op("root"), ExtensionCatalog::new()).unwrap();
        let err = table.register_pre_extension("nope", op("x")).unwrap_err();
        assert!(matches!(err, OpflowError::UnknownTarget { .. }));
    }

    #[test]
    fn test_duplicate_registration_is_kept() {
        let mut table = ExtensionTable::build(op("root"), ExtensionCatalog::new()).unwrap();
        table.register_post_extension("root", op("x")).unwrap();
        table.register_post_extension("root", op("x")).unwrap();

        let root = table.entry(table.root());
        assert_eq!(ids(&table, root.post_extensions()), vec!["x", "x"]);
    }

    #[test]
    fn test_register_self_is_cycle() {
        let mut table = ExtensionTable::build(op("root"), ExtensionCatalog::new()).unwrap();
        let err = table.register_pre_extension("root", op("root")).unwrap_err();
        assert!(matches!(err, OpflowError::CycleDetected(_)));
    }

    #[test]
    fn test_failed_registration_rolls_back() {
        let catalog = ExtensionCatalog::new().with_pre("x", "root", || op("root"));
        let mut table = ExtensionTable::build(op("root"), catalog).unwrap();
        let before = table.len();

        assert!(table.register_pre_extension("root", op("x")).is_err());
        assert_eq!(table.len(), before);
        assert!(table.lookup("x").is_none());
        assert!(table.entry(table.root()).pre_extensions().is_empty());
    }

    #[test]
    fn test_register_child_applies_catalog() {
        let catalog = ExtensionCatalog::new().with_post("child", "child.post", || op("child.post"));
        let mut table = ExtensionTable::build(op("root"), catalog).unwrap();

        let child = table
            .register_child(table.root(), ExtensionPosition::Pre, op("child"), &[])
            .unwrap();
        assert_eq!(ids(&table, table.entry(child).post_extensions()), vec!["child.post"]);
        assert_eq!(table.entry(child).parent(), Some(table.root()));
    }

    #[test]
    fn test_lookup_is_last_write_wins() {
        let mut table = ExtensionTable::build(op("root"), ExtensionCatalog::new()).unwrap();
        let root = table.root();
        let first = table
            .register_child(root, ExtensionPosition::Pre, op("shared"), &[])
            .unwrap();
        let second = table
            .register_child(root, ExtensionPosition::Pre, op("shared"), &[first])
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(table.lookup("shared"), Some(second));
    }

    #[test]
    fn test_refetched_children_reuse_entries() {
        let catalog = ExtensionCatalog::new().with_post("child", "child.post", || op("child.post"));
        let mut table = ExtensionTable::build(op("root"), catalog).unwrap();
        let root = table.root();

        let first = table
            .register_child(root, ExtensionPosition::Pre, op("child"), &[])
            .unwrap();
        let other = table
            .register_child(root, ExtensionPosition::Pre, op("other"), &[first])
            .unwrap();
        let len = table.len();

        let again = table
            .register_child(root, ExtensionPosition::Pre, op("child"), &[])
            .unwrap();
        assert_eq!(again, first);
        assert_eq!(table.len(), len);

        let post = table
            .register_child(root, ExtensionPosition::Post, op("child"), &[])
            .unwrap();
        assert_ne!(post, first);
        assert_eq!(table.entry(root).dynamic_children(ExtensionPosition::Pre), &[first, other]);

        table
            .register_child(root, ExtensionPosition::Pre, op("child"), &[])
            .unwrap();
        assert_eq!(table.lookup("child"), Some(first));
    }
}
