//! Mutual-exclusion resources.
//!
//! A [`ResourceToken`] names a shared resource as a path. Two tokens
//! conflict when one path is a prefix of the other, so holding `/project`
//! fences out `/project/src` and vice versa. [`ResourceLocks`] is the table
//! every actor acquires tokens from; the scheduler uses it to wrap each
//! operation, and other subsystems may share the same instance.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::debug;

/// An opaque, hierarchical resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceToken {
    segments: Vec<String>,
}

impl ResourceToken {
    /// Creates a token from a `/`-separated path. Empty segments are ignored.
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    /// The token covering every resource.
    #[must_use]
    pub fn global() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Returns a token for a child resource.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Returns true if `self` contains `other`.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Returns true if the two tokens may not be held at the same time.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.contains(other) || other.contains(self)
    }
}

impl fmt::Display for ResourceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

/// Raised when a resource could not be acquired before the deadline.
#[derive(Debug, Clone, Error)]
#[error("Timed out after {waited:?} waiting for resource '{resource}'")]
pub struct ResourceTimeoutError {
    /// The resource requested.
    pub resource: ResourceToken,
    /// How long the caller waited.
    pub waited: Duration,
}

/// Table of currently held resources.
#[derive(Debug, Default)]
pub struct ResourceLocks {
    held: Mutex<Vec<(u64, ResourceToken)>>,
    next_ticket: AtomicU64,
    released: Notify,
}

impl ResourceLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquires `token` if nothing conflicting is held.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>, token: &ResourceToken) -> Option<ResourceGuard> {
        let mut held = self.held.lock();
        if held.iter().any(|(_, t)| t.conflicts_with(token)) {
            return None;
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        held.push((ticket, token.clone()));
        debug!(resource = %token, ticket, "Resource acquired");

        Some(ResourceGuard {
            locks: Arc::clone(self),
            ticket,
            token: token.clone(),
        })
    }

    /// Waits until `token` can be acquired.
    pub async fn acquire(self: &Arc<Self>, token: &ResourceToken) -> ResourceGuard {
        loop {
            // Registered before the check so a release in between is not missed.
            let released = self.released.notified();
            if let Some(guard) = self.try_acquire(token) {
                return guard;
            }
            released.await;
        }
    }

    /// Waits for `token`, giving up after `deadline` when one is set.
    pub async fn acquire_within(
        self: &Arc<Self>,
        token: &ResourceToken,
        deadline: Option<Duration>,
    ) -> Result<ResourceGuard, ResourceTimeoutError> {
        match deadline {
            None => Ok(self.acquire(token).await),
            Some(limit) => tokio::time::timeout(limit, self.acquire(token))
                .await
                .map_err(|_| ResourceTimeoutError {
                    resource: token.clone(),
                    waited: limit,
                }),
        }
    }

    /// Returns true if something conflicting with `token` is held.
    #[must_use]
    pub fn is_locked(&self, token: &ResourceToken) -> bool {
        self.held.lock().iter().any(|(_, t)| t.conflicts_with(token))
    }

    /// Returns the number of held resources.
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }

    fn release(&self, ticket: u64) {
        self.held.lock().retain(|(t, _)| *t != ticket);
        self.released.notify_waiters();
    }
}

/// Scoped hold on a resource. Released on drop.
#[derive(Debug)]
pub struct ResourceGuard {
    locks: Arc<ResourceLocks>,
    ticket: u64,
    token: ResourceToken,
}

impl ResourceGuard {
    /// The held resource.
    #[must_use]
    pub fn token(&self) -> &ResourceToken {
        &self.token
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        debug!(resource = %self.token, ticket = self.ticket, "Resource released");
        self.locks.release(self.ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_paths() {
        let project = ResourceToken::new("/project");
        let src = project.child("src");

        assert_eq!(src.to_string(), "/project/src");
        assert_eq!(ResourceToken::new("project//src/"), src);
        assert!(project.contains(&src));
        assert!(!src.contains(&project));
        assert!(ResourceToken::global().contains(&project));
    }

    #[test]
    fn test_conflicts() {
        let a = ResourceToken::new("/workspace/a");
        let b = ResourceToken::new("/workspace/b");
        let workspace = ResourceToken::new("/workspace");

        assert!(!a.conflicts_with(&b));
        assert!(a.conflicts_with(&workspace));
        assert!(workspace.conflicts_with(&b));
    }

    #[test]
    fn test_try_acquire_and_release() {
        let locks = ResourceLocks::new();
        let project = ResourceToken::new("/project");

        let guard = locks.try_acquire(&project).unwrap();
        assert!(locks.is_locked(&project.child("file")));
        assert!(locks.try_acquire(&project.child("file")).is_none());
        assert!(locks.try_acquire(&ResourceToken::new("/other")).is_some());

        drop(guard);
        assert!(!locks.is_locked(&project));
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn test_acquire_blocking_helper() {
        let locks = ResourceLocks::new();
        let token = ResourceToken::new("/index");
        let guard = tokio_test::block_on(locks.acquire(&token));
        assert_eq!(guard.token(), &token);
        assert_eq!(locks.held_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let locks = ResourceLocks::new();
        let token = ResourceToken::new("/project");
        let guard = locks.try_acquire(&token).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            let token = token.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&token).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_within_times_out() {
        let locks = ResourceLocks::new();
        let token = ResourceToken::new("/busy");
        let _guard = locks.try_acquire(&token).unwrap();

        let result = locks
            .acquire_within(&token.child("x"), Some(Duration::from_millis(10)))
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.resource, token.child("x"));
    }
}
