//! Boundary points and range surgery over an [`EditableTree`].
//!
//! Offsets follow DOM conventions: chars for a text container, child index
//! for an element container.

use std::cmp::Ordering;

use crate::error::{Result, TreeError};
use crate::tree::{EditableTree, NodeId};

/// A (container, offset) boundary point.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub struct Position {
    pub node: NodeId,
    pub offset: usize,
}

impl Position {
    pub fn new(node: NodeId, offset: usize) -> Self {
        Self { node, offset }
    }

    /// The point just before `node` in its parent.
    pub fn before(tree: &EditableTree, node: NodeId) -> Option<Self> {
        Some(Self::new(tree.parent(node)?, tree.index_in_parent(node)?))
    }

    /// The point just after `node` in its parent.
    pub fn after(tree: &EditableTree, node: NodeId) -> Option<Self> {
        Some(Self::new(tree.parent(node)?, tree.index_in_parent(node)? + 1))
    }

    /// Child-index path from the root followed by the offset. Lexicographic
    /// order on keys is document order on boundary points.
    fn key(&self, tree: &EditableTree) -> Option<Vec<usize>> {
        let mut key = tree.path(self.node)?;
        key.push(self.offset);
        Some(key)
    }
}

/// Compare two boundary points in document order. `None` when either lies
/// outside the document.
pub fn compare_positions(tree: &EditableTree, a: &Position, b: &Position) -> Option<Ordering> {
    Some(a.key(tree)?.cmp(&b.key(tree)?))
}

/// A contiguous range between two boundary points, `start <= end`.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A boundary expressed relative to a node, so it survives text splits.
#[derive(Clone, Copy)]
enum Boundary {
    Before(NodeId),
    EndOf(NodeId),
}

impl Boundary {
    fn resolve(self, tree: &EditableTree) -> Result<Position> {
        match self {
            Boundary::Before(node) => {
                Position::before(tree, node).ok_or(TreeError::Hierarchy("boundary node is detached"))
            }
            Boundary::EndOf(node) => Ok(Position::new(node, tree.node_length(node))),
        }
    }

    fn after(tree: &EditableTree, node: NodeId) -> Result<Self> {
        match tree.next_sibling(node) {
            Some(next) => Ok(Boundary::Before(next)),
            None => tree
                .parent(node)
                .map(Boundary::EndOf)
                .ok_or(TreeError::Hierarchy("boundary node is detached")),
        }
    }
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// A collapsed range at `pos`.
    pub fn caret(pos: Position) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    pub fn collapsed(&self) -> bool {
        self.start == self.end
    }

    pub fn collapse(&mut self, to_start: bool) {
        if to_start {
            self.end = self.start;
        } else {
            self.start = self.end;
        }
    }

    /// Range surrounding `node` within its parent.
    pub fn select_node(tree: &EditableTree, node: NodeId) -> Option<Self> {
        Some(Self::new(
            Position::before(tree, node)?,
            Position::after(tree, node)?,
        ))
    }

    /// Range covering all of `node`'s contents.
    pub fn select_node_contents(tree: &EditableTree, node: NodeId) -> Self {
        Self::new(
            Position::new(node, 0),
            Position::new(node, tree.node_length(node)),
        )
    }

    /// Whether both points lie inside `root`'s subtree with in-bounds
    /// offsets, in order.
    pub fn is_within(&self, tree: &EditableTree, root: NodeId) -> bool {
        let in_bounds = |pos: &Position| {
            tree.contains(root, pos.node) && pos.offset <= tree.node_length(pos.node)
        };
        in_bounds(&self.start)
            && in_bounds(&self.end)
            && compare_positions(tree, &self.start, &self.end) != Some(Ordering::Greater)
    }

    /// Deepest node containing both boundary points.
    pub fn common_ancestor(&self, tree: &EditableTree) -> Option<NodeId> {
        let mut current = Some(self.end.node);
        while let Some(node) = current {
            if tree.contains(node, self.start.node) {
                return Some(node);
            }
            current = tree.parent(node);
        }
        None
    }

    /// Remove the range's contents and collapse it to its start.
    ///
    /// Fully contained nodes are detached and reclaimed; text partially
    /// covered at either end is truncated. Partially covered elements are
    /// kept, as in the DOM.
    pub fn delete_contents(&mut self, tree: &mut EditableTree) -> Result<()> {
        if self.collapsed() {
            return Ok(());
        }

        if self.start.node == self.end.node && tree.is_text(self.start.node) {
            let node = self.start.node;
            let text = tree.text(node).ok_or(TreeError::NotText(node))?;
            let from = crate::tree::char_to_byte(text, self.start.offset);
            let to = crate::tree::char_to_byte(text, self.end.offset);
            let mut remaining = text[..from].to_string();
            remaining.push_str(&text[to..]);
            tree.set_text(node, remaining)?;
            self.collapse(true);
            return Ok(());
        }

        let ancestor = self
            .common_ancestor(tree)
            .ok_or(TreeError::Hierarchy("range endpoints share no ancestor"))?;

        // Split the end first; boundaries are node-relative, so the later
        // split at the start cannot shift it.
        let end = Self::boundary(tree, self.end)?;
        let start = Self::boundary(tree, self.start)?;
        let start = start.resolve(tree)?;
        let end = end.resolve(tree)?;

        let (Some(start_key), Some(end_key)) = (start.key(tree), end.key(tree)) else {
            return Err(TreeError::Hierarchy("range is outside the document"));
        };
        let Some(ancestor_path) = tree.path(ancestor) else {
            return Err(TreeError::Hierarchy("range is outside the document"));
        };

        let mut doomed = Vec::new();
        collect_contained(tree, ancestor, ancestor_path, &start_key, &end_key, &mut doomed);
        tracing::trace!(
            target: "quire::range",
            removed = doomed.len(),
            "delete_contents"
        );
        for node in doomed {
            tree.discard(node)?;
        }

        *self = Self::caret(start);
        Ok(())
    }

    /// Turn a point into a node-relative boundary, splitting text when the
    /// point falls strictly inside it.
    fn boundary(tree: &mut EditableTree, pos: Position) -> Result<Boundary> {
        if tree.is_text(pos.node) {
            let len = tree.node_length(pos.node);
            if pos.offset == 0 {
                return Ok(Boundary::Before(pos.node));
            }
            if pos.offset >= len {
                return Boundary::after(tree, pos.node);
            }
            let tail = tree.split_text(pos.node, pos.offset)?;
            return Ok(Boundary::Before(tail));
        }
        match tree.children(pos.node).get(pos.offset) {
            Some(&child) => Ok(Boundary::Before(child)),
            None => Ok(Boundary::EndOf(pos.node)),
        }
    }

    /// Insert `node` at the range's start. A text container is split and the
    /// node placed between the halves.
    pub fn insert_node(&self, tree: &mut EditableTree, node: NodeId) -> Result<()> {
        let start = self.start;
        if tree.is_text(start.node) {
            let parent = tree
                .parent(start.node)
                .ok_or(TreeError::Hierarchy("text container is detached"))?;
            let tail = tree.split_text(start.node, start.offset)?;
            tree.insert_before(parent, node, Some(tail))
        } else {
            tree.insert_at(start.node, start.offset, node)
        }
    }
}

fn collect_contained(
    tree: &EditableTree,
    parent: NodeId,
    parent_path: Vec<usize>,
    start_key: &[usize],
    end_key: &[usize],
    out: &mut Vec<NodeId>,
) {
    for (index, &child) in tree.children(parent).iter().enumerate() {
        let mut before = parent_path.clone();
        before.push(index);
        let mut after = parent_path.clone();
        after.push(index + 1);

        if start_key <= before.as_slice() && after.as_slice() <= end_key {
            out.push(child);
        } else if tree.is_element(child) {
            // `before` doubles as the child's own path.
            collect_contained(tree, child, before, start_key, end_key, out);
        }
    }
}
