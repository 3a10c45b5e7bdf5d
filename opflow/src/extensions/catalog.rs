//! Static extension declarations, discovered once at startup.

use crate::errors::OpflowError;
use crate::operations::OperationRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Where an extension runs relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionPosition {
    /// Immediately before the target (and its dynamic pre-children).
    Pre,
    /// Immediately after the target (and its dynamic post-children).
    Post,
}

impl fmt::Display for ExtensionPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "pre"),
            Self::Post => write!(f, "post"),
        }
    }
}

/// Creates a fresh operation instance for every occurrence of an extension.
pub type OperationFactory = Arc<dyn Fn() -> OperationRef + Send + Sync>;

/// One declared extension of a target operation.
#[derive(Clone)]
pub struct ExtensionDescriptor {
    /// Id of the extension operation.
    pub extension_id: String,
    /// Pre or post.
    pub position: ExtensionPosition,
    factory: OperationFactory,
}

impl ExtensionDescriptor {
    /// Creates a new descriptor.
    pub fn new(
        extension_id: impl Into<String>,
        position: ExtensionPosition,
        factory: OperationFactory,
    ) -> Self {
        Self {
            extension_id: extension_id.into(),
            position,
            factory,
        }
    }

    /// Creates a new operation instance for this extension.
    #[must_use]
    pub fn instantiate(&self) -> OperationRef {
        (self.factory)()
    }
}

impl fmt::Debug for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDescriptor")
            .field("extension_id", &self.extension_id)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

/// Declared extensions, keyed by target operation id, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ExtensionCatalog {
    declarations: HashMap<String, Vec<ExtensionDescriptor>>,
}

impl ExtensionCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an extension of `target_id`.
    pub fn declare(&mut self, target_id: impl Into<String>, descriptor: ExtensionDescriptor) {
        self.declarations
            .entry(target_id.into())
            .or_default()
            .push(descriptor);
    }

    /// Declares a pre-extension built by `factory`.
    #[must_use]
    pub fn with_pre<F>(mut self, target_id: impl Into<String>, extension_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> OperationRef + Send + Sync + 'static,
    {
        self.declare(
            target_id,
            ExtensionDescriptor::new(extension_id, ExtensionPosition::Pre, Arc::new(factory)),
        );
        self
    }

    /// Declares a post-extension built by `factory`.
    #[must_use]
    pub fn with_post<F>(mut self, target_id: impl Into<String>, extension_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> OperationRef + Send + Sync + 'static,
    {
        self.declare(
            target_id,
            ExtensionDescriptor::new(extension_id, ExtensionPosition::Post, Arc::new(factory)),
        );
        self
    }

    /// Extensions declared for `target_id`, in declaration order.
    #[must_use]
    pub fn declarations_for(&self, target_id: &str) -> &[ExtensionDescriptor] {
        self.declarations
            .get(target_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of declarations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.declarations.values().map(Vec::len).sum()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds a catalog from a manifest, resolving each extension id to a
    /// registered factory.
    ///
    /// # Errors
    ///
    /// Returns `OpflowError::UnknownFactory` if a declaration names an
    /// extension with no factory.
    pub fn from_manifest(
        manifest: &ExtensionManifest,
        factories: &OperationFactories,
    ) -> Result<Self, OpflowError> {
        let mut catalog = Self::new();
        for decl in &manifest.extensions {
            let factory = factories
                .get(&decl.extension)
                .ok_or_else(|| OpflowError::unknown_factory(&decl.extension))?;
            catalog.declare(
                decl.target.clone(),
                ExtensionDescriptor::new(decl.extension.clone(), decl.position, factory),
            );
        }
        Ok(catalog)
    }
}

/// Registry of operation factories by id, used to resolve manifests.
#[derive(Clone, Default)]
pub struct OperationFactories {
    factories: HashMap<String, OperationFactory>,
}

impl OperationFactories {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory. A later registration under the same id wins.
    #[must_use]
    pub fn with<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> OperationRef + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    /// Looks up a factory.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<OperationFactory> {
        self.factories.get(id).cloned()
    }
}

impl fmt::Debug for OperationFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("OperationFactories").field("ids", &ids).finish()
    }
}

/// One manifest line: `extension` runs at `position` around `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionDeclaration {
    /// Target operation id.
    pub target: String,
    /// Extension operation id (also the factory id).
    pub extension: String,
    /// Pre or post.
    pub position: ExtensionPosition,
}

/// Serializable list of extension declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Declarations, in order.
    #[serde(default)]
    pub extensions: Vec<ExtensionDeclaration>,
}

impl ExtensionManifest {
    /// Parses a manifest from JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error on malformed input.
    pub fn from_json_str(json: &str) -> Result<Self, OpflowError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a manifest from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OpflowError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::NullOperation;

    fn null(id: &'static str) -> impl Fn() -> OperationRef + Send + Sync + 'static {
        move || Arc::new(NullOperation::new(id)) as OperationRef
    }

    #[test]
    fn test_declarations_keep_order() {
        let catalog = ExtensionCatalog::new()
            .with_pre("target", "first", null("first"))
            .with_post("target", "after", null("after"))
            .with_pre("target", "second", null("second"));

        let ids: Vec<_> = catalog
            .declarations_for("target")
            .iter()
            .map(|d| d.extension_id.as_str())
            .collect();
        assert_eq!(ids, vec!["first", "after", "second"]);
        assert_eq!(catalog.len(), 3);
        assert!(catalog.declarations_for("other").is_empty());
    }

    #[test]
    fn test_descriptor_instantiates_fresh() {
        let catalog = ExtensionCatalog::new().with_pre("t", "e", null("e"));
        let descriptor = &catalog.declarations_for("t")[0];

        let a = descriptor.instantiate();
        let b = descriptor.instantiate();
        assert_eq!(a.id(), "e");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_manifest_parse_and_resolve() {
        let manifest = ExtensionManifest::from_json_str(
            r#"{"extensions": [
                {"target": "project.create", "extension": "git.init", "position": "post"},
                {"target": "project.create", "extension": "license.check", "position": "pre"}
            ]}"#,
        )
        .unwrap();

        let factories = OperationFactories::new()
            .with("git.init", null("git.init"))
            .with("license.check", null("license.check"));

        let catalog = ExtensionCatalog::from_manifest(&manifest, &factories).unwrap();
        let decls = catalog.declarations_for("project.create");
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].position, ExtensionPosition::Post);
        assert_eq!(decls[1].extension_id, "license.check");
    }

    #[test]
    fn test_manifest_unknown_factory() {
        let manifest = ExtensionManifest {
            extensions: vec![ExtensionDeclaration {
                target: "t".into(),
                extension: "missing".into(),
                position: ExtensionPosition::Pre,
            }],
        };

        let err = ExtensionCatalog::from_manifest(&manifest, &OperationFactories::new()).unwrap_err();
        assert!(matches!(err, OpflowError::UnknownFactory { .. }));
    }

    #[test]
    fn test_manifest_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{"extensions": [{"target": "a", "extension": "b", "position": "pre"}]}"#,
        )
        .unwrap();

        let manifest = ExtensionManifest::from_file(file.path()).unwrap();
        assert_eq!(manifest.extensions.len(), 1);
    }

    #[test]
    fn test_manifest_malformed() {
        let err = ExtensionManifest::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, OpflowError::Serialization(_)));
    }
}
