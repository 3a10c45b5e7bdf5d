//! Key-value data context shared between operations.

use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

/// Raised when writing a key that already holds a value.
#[derive(Debug, Clone, Error)]
#[error("Data conflict in context '{context_id}': key '{key}' already exists")]
pub struct DataConflictError {
    /// The context written to.
    pub context_id: String,
    /// The conflicting key.
    pub key: String,
}

/// A thread-safe bag of values used to pass information between operations.
///
/// Writing to an existing key is rejected unless forced.
#[derive(Debug, Default)]
pub struct DataContext {
    id: String,
    data: RwLock<HashMap<String, serde_json::Value>>,
}

impl DataContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the context id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.read().get(key).cloned()
    }

    /// Gets a value and deserializes it.
    #[must_use]
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Sets a value.
    ///
    /// # Errors
    ///
    /// Returns `DataConflictError` if the key already exists.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) -> Result<(), DataConflictError> {
        let key = key.into();
        let mut data = self.data.write();

        if data.contains_key(&key) {
            return Err(DataConflictError {
                context_id: self.id.clone(),
                key,
            });
        }

        data.insert(key, value);
        Ok(())
    }

    /// Sets a value, allowing overwrites. Returns the previous value.
    pub fn set_force(&self, key: impl Into<String>, value: serde_json::Value) -> Option<serde_json::Value> {
        self.data.write().insert(key.into(), value)
    }

    /// Removes a value, typically while undoing the operation that wrote it.
    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        self.data.write().remove(key)
    }

    /// Returns a copy of all data.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        self.data.read().clone()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let ctx = DataContext::new("wizard");
        ctx.set("name", serde_json::json!("demo")).unwrap();

        assert_eq!(ctx.id(), "wizard");
        assert_eq!(ctx.get("name"), Some(serde_json::json!("demo")));
        assert_eq!(ctx.get_as::<String>("name").as_deref(), Some("demo"));
        assert!(ctx.contains_key("name"));
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_conflict() {
        let ctx = DataContext::new("wizard");
        ctx.set("k", serde_json::json!(1)).unwrap();

        let err = ctx.set("k", serde_json::json!(2)).unwrap_err();
        assert_eq!(err.key, "k");
        assert_eq!(err.context_id, "wizard");
        assert_eq!(ctx.get("k"), Some(serde_json::json!(1)));
    }

    #[test]
    fn test_force_and_remove() {
        let ctx = DataContext::new("c");
        ctx.set("k", serde_json::json!(1)).unwrap();

        assert_eq!(ctx.set_force("k", serde_json::json!(2)), Some(serde_json::json!(1)));
        assert_eq!(ctx.remove("k"), Some(serde_json::json!(2)));
        assert!(ctx.is_empty());
    }
}
