//! Resumable per-node traversal state.

use crate::extensions::{EntryId, ExtensionEntry};

/// What the scheduler must do next for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeAction {
    /// Push the given entry as a new node.
    Push(EntryId),
    /// Query and register the operation's dynamic pre-children.
    FetchPreChildren,
    /// Run the operation itself.
    Execute,
    /// Query and register the operation's dynamic post-children.
    FetchPostChildren,
    /// Every phase is complete.
    Pop,
}

/// Cursor state for one occurrence of an entry on the traversal stack.
///
/// A node walks five phases in order: pre-extensions, dynamic
/// pre-children, the operation itself, dynamic post-children and
/// post-extensions. Cursors only move forward, so a node cloned into a new
/// run resumes exactly where the previous run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalNode {
    entry: EntryId,
    pre_extension_cursor: usize,
    pre_children: Option<Vec<EntryId>>,
    pre_child_cursor: usize,
    executed: bool,
    post_children: Option<Vec<EntryId>>,
    post_child_cursor: usize,
    post_extension_cursor: usize,
}

impl TraversalNode {
    /// Creates a node with every phase pending.
    #[must_use]
    pub fn new(entry: EntryId) -> Self {
        Self {
            entry,
            pre_extension_cursor: 0,
            pre_children: None,
            pre_child_cursor: 0,
            executed: false,
            post_children: None,
            post_child_cursor: 0,
            post_extension_cursor: 0,
        }
    }

    /// The entry this node traverses.
    #[must_use]
    pub fn entry(&self) -> EntryId {
        self.entry
    }

    /// Whether the operation itself has executed.
    #[must_use]
    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Whether dynamic pre-children were fetched.
    #[must_use]
    pub fn pre_children_fetched(&self) -> bool {
        self.pre_children.is_some()
    }

    /// Whether dynamic post-children were fetched.
    #[must_use]
    pub fn post_children_fetched(&self) -> bool {
        self.post_children.is_some()
    }

    /// Decides the next action, advancing the cursor when a child is pushed.
    ///
    /// Extensions registered on `entry` after the node started are picked up
    /// as long as the node has not moved past that phase. Pre-extensions
    /// registered once the pre-children were fetched wait for the next
    /// occurrence of the entry.
    pub(crate) fn next_action(&mut self, entry: &ExtensionEntry) -> NodeAction {
        let Some(pre_children) = &self.pre_children else {
            if let Some(next) = entry.pre_extensions().get(self.pre_extension_cursor) {
                self.pre_extension_cursor += 1;
                return NodeAction::Push(*next);
            }
            return NodeAction::FetchPreChildren;
        };
        if let Some(next) = pre_children.get(self.pre_child_cursor) {
            self.pre_child_cursor += 1;
            return NodeAction::Push(*next);
        }

        if !self.executed {
            return NodeAction::Execute;
        }

        let Some(post_children) = &self.post_children else {
            return NodeAction::FetchPostChildren;
        };
        if let Some(next) = post_children.get(self.post_child_cursor) {
            self.post_child_cursor += 1;
            return NodeAction::Push(*next);
        }

        if let Some(next) = entry.post_extensions().get(self.post_extension_cursor) {
            self.post_extension_cursor += 1;
            return NodeAction::Push(*next);
        }

        NodeAction::Pop
    }

    pub(crate) fn set_pre_children(&mut self, children: Vec<EntryId>) {
        self.pre_children = Some(children);
    }

    pub(crate) fn set_post_children(&mut self, children: Vec<EntryId>) {
        self.post_children = Some(children);
    }

    pub(crate) fn mark_executed(&mut self) {
        self.executed = true;
    }
}
