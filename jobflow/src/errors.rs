//! Keyed, hierarchical error collection.
//!
//! Independent jobs report failures into one [`ErrorAccumulator`] per
//! invocation instead of short-circuiting the flow. Only the terminal job
//! (see [`crate::terminal`]) turns a non-empty tree into a failed outcome.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

use crate::context::ContextError;

/// One entry under an [`ErrorTree`] key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorNode {
    Message(String),
    Nested(ErrorTree),
}

/// Error value with multiple named causes. Keys iterate in sorted order so
/// rendering is stable regardless of which job reported first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorTree {
    entries: BTreeMap<String, Vec<ErrorNode>>,
}

impl ErrorTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `err` under `key`, keeping earlier entries for the same key.
    ///
    /// Errors are rendered with the alternate formatter so `anyhow` context
    /// chains are preserved (`outer: inner: root cause`).
    pub fn add(&mut self, key: impl Into<String>, err: impl fmt::Display) {
        self.entries
            .entry(key.into())
            .or_default()
            .push(ErrorNode::Message(format!("{err:#}")));
    }

    /// Append `err` under a nested key path, creating intermediate subtrees.
    ///
    /// An empty path is treated as the key `"."`.
    pub fn add_at(&mut self, path: &[&str], err: impl fmt::Display) {
        match path {
            [] => self.add(".", err),
            [key] => self.add(*key, err),
            [head, rest @ ..] => self.subtree_mut(head).add_at(rest, err),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of leaf messages, counted through every nesting level.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .flatten()
            .map(|node| match node {
                ErrorNode::Message(_) => 1,
                ErrorNode::Nested(tree) => tree.len(),
            })
            .sum()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> &[ErrorNode] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Leaf messages directly under `key` (nested subtrees are skipped).
    pub fn messages(&self, key: &str) -> Vec<&str> {
        self.get(key)
            .iter()
            .filter_map(|node| match node {
                ErrorNode::Message(msg) => Some(msg.as_str()),
                ErrorNode::Nested(_) => None,
            })
            .collect()
    }

    fn subtree_mut(&mut self, key: &str) -> &mut ErrorTree {
        let nodes = self.entries.entry(key.to_string()).or_default();
        let idx = match nodes
            .iter()
            .rposition(|n| matches!(n, ErrorNode::Nested(_)))
        {
            Some(idx) => idx,
            None => {
                nodes.push(ErrorNode::Nested(ErrorTree::new()));
                nodes.len() - 1
            }
        };
        match &mut nodes[idx] {
            ErrorNode::Nested(tree) => tree,
            ErrorNode::Message(_) => unreachable!("index points at a nested node"),
        }
    }

    fn render_lines(&self, depth: usize, out: &mut Vec<String>) {
        let pad = "  ".repeat(depth);
        for (key, nodes) in &self.entries {
            if let [ErrorNode::Message(msg)] = nodes.as_slice() {
                out.push(format!("{pad}{key}: {msg}"));
                continue;
            }
            out.push(format!("{pad}{key}:"));
            for node in nodes {
                match node {
                    ErrorNode::Message(msg) => out.push(format!("{pad}  - {msg}")),
                    ErrorNode::Nested(tree) => tree.render_lines(depth + 1, out),
                }
            }
        }
    }
}

impl fmt::Display for ErrorTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::new();
        self.render_lines(0, &mut lines);
        f.write_str(&lines.join("\n"))
    }
}

impl std::error::Error for ErrorTree {}

/// Shared handle onto the invocation's [`ErrorTree`].
///
/// Cloning shares the same tree. The mutex makes concurrent `add` calls from
/// parallel jobs safe; a poisoned lock is recovered because a panicking
/// reporter must not hide the errors other jobs already recorded.
#[derive(Debug, Clone, Default)]
pub struct ErrorAccumulator {
    tree: Arc<Mutex<ErrorTree>>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: impl Into<String>, err: impl fmt::Display) {
        self.lock().add(key, err);
    }

    pub fn add_at(&self, path: &[&str], err: impl fmt::Display) {
        self.lock().add_at(path, err);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current tree.
    pub fn snapshot(&self) -> ErrorTree {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, ErrorTree> {
        self.tree
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reason attached to a failed flow.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// A context slot could not be read as the requested type.
    #[error("structural error: {0}")]
    Context(#[from] ContextError),

    /// Jobs reported errors into the accumulator.
    #[error("{0}")]
    Accumulated(ErrorTree),

    /// A timeout guard expired before its job reached a terminal state.
    #[error("timeout: {id} did not finish within {after:?}")]
    Timeout { id: String, after: Duration },
}

impl FlowError {
    /// The accumulated tree, if this failure carries one.
    pub fn tree(&self) -> Option<&ErrorTree> {
        match self {
            FlowError::Accumulated(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FlowError::Timeout { .. })
    }
}
