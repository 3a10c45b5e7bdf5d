//! Registration of secondary data contexts.

use super::DataContext;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Collaborator notified when operations register and unregister the
/// contexts they own.
///
/// The scheduler calls `register` right before an operation executes and
/// `unregister` while undoing it, so undo also reverses context
/// registration.
#[cfg_attr(test, mockall::automock)]
pub trait ContextManager: Send + Sync {
    /// Registers a context id.
    fn register(&self, context_id: &str);

    /// Unregisters a context id.
    fn unregister(&self, context_id: &str);
}

/// A context manager that ignores every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpContextManager;

impl ContextManager for NoOpContextManager {
    fn register(&self, _context_id: &str) {}

    fn unregister(&self, _context_id: &str) {}
}

#[derive(Debug)]
struct Registration {
    context: Arc<DataContext>,
    count: usize,
}

/// In-memory context manager that hands out one [`DataContext`] per
/// registered id.
///
/// Registrations are counted: a context registered twice stays available
/// until it has been unregistered twice.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: RwLock<HashMap<String, Registration>>,
    order: RwLock<Vec<String>>,
}

impl ContextRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Gets a registered context.
    #[must_use]
    pub fn get(&self, context_id: &str) -> Option<Arc<DataContext>> {
        self.contexts
            .read()
            .get(context_id)
            .map(|r| Arc::clone(&r.context))
    }

    /// Returns true if the context is registered.
    #[must_use]
    pub fn is_registered(&self, context_id: &str) -> bool {
        self.contexts.read().contains_key(context_id)
    }

    /// Registered ids in registration order.
    #[must_use]
    pub fn registered_ids(&self) -> Vec<String> {
        self.order.read().clone()
    }
}

impl ContextManager for ContextRegistry {
    fn register(&self, context_id: &str) {
        let mut contexts = self.contexts.write();
        if let Some(existing) = contexts.get_mut(context_id) {
            existing.count += 1;
            return;
        }

        debug!(context_id, "Context registered");
        contexts.insert(
            context_id.to_string(),
            Registration {
                context: Arc::new(DataContext::new(context_id)),
                count: 1,
            },
        );
        self.order.write().push(context_id.to_string());
    }

    fn unregister(&self, context_id: &str) {
        let mut contexts = self.contexts.write();
        let Some(existing) = contexts.get_mut(context_id) else {
            return;
        };

        existing.count -= 1;
        if existing.count == 0 {
            contexts.remove(context_id);
            self.order.write().retain(|id| id != context_id);
            debug!(context_id, "Context unregistered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_creates_context() {
        let registry = ContextRegistry::new();
        registry.register("project.model");

        let ctx = registry.get("project.model").unwrap();
        assert_eq!(ctx.id(), "project.model");
        assert!(registry.is_registered("project.model"));
        assert_eq!(registry.registered_ids(), vec!["project.model".to_string()]);
    }

    #[test]
    fn test_registration_is_counted() {
        let registry = ContextRegistry::new();
        registry.register("c");
        registry.register("c");

        registry.unregister("c");
        assert!(registry.is_registered("c"));

        registry.unregister("c");
        assert!(!registry.is_registered("c"));
        assert!(registry.registered_ids().is_empty());
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let registry = ContextRegistry::new();
        registry.unregister("never");
        assert!(registry.registered_ids().is_empty());
    }

    #[test]
    fn test_data_survives_while_registered() {
        let registry = ContextRegistry::new();
        registry.register("c");
        registry
            .get("c")
            .unwrap()
            .set("k", serde_json::json!(true))
            .unwrap();

        assert_eq!(registry.get("c").unwrap().get("k"), Some(serde_json::json!(true)));
    }

    #[test]
    fn test_mock_context_manager() {
        let mut mock = MockContextManager::new();
        mock.expect_register()
            .withf(|id| id.to_string() == "x")
            .times(1)
            .return_const(());

        let manager: &dyn ContextManager = &mock;
        manager.register("x");
    }
}
