//! Cursor-stable content insertion.
//!
//! Every insertion lands immediately before a caret-anchor marker: a text
//! node holding a single zero-width space. The caret is left just after the
//! marker's one character, so typing continues from a well-defined spot and
//! a following insertion at the same caret can find and reuse the marker
//! instead of splitting text again.

use smol_str::SmolStr;

use crate::error::{Result, TreeError};
use crate::range::{Position, Range};
use crate::selection::{SelectionFacade, SelectionHost};
use crate::tree::{EditableTree, NodeId};

/// Zero-width character held by caret-anchor marker nodes.
pub const CARET_MARKER: char = '\u{200B}';

const CARET_MARKER_STR: &str = "\u{200B}";

/// The single line-break marker element of an otherwise empty document, if
/// the tree is in that canonical state. Empty text nodes and bare markers
/// are ignored.
pub fn canonical_empty_marker(tree: &EditableTree, root: NodeId) -> Option<NodeId> {
    let mut meaningful = tree.children(root).iter().copied().filter(|&child| {
        tree.text(child)
            .is_none_or(|text| text.chars().any(|c| c != CARET_MARKER))
    });
    let only = meaningful.next()?;
    if meaningful.next().is_some() {
        return None;
    }
    (tree.has_tag(only, "br") && tree.children(only).is_empty()).then_some(only)
}

/// Splices new content into the tree at the current selection.
#[derive(Debug, Clone)]
pub struct InsertionEngine {
    line_break_tag: SmolStr,
}

impl Default for InsertionEngine {
    fn default() -> Self {
        Self {
            line_break_tag: SmolStr::new_static("br"),
        }
    }
}

impl InsertionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `nodes` (in order) at the selection and leave a collapsed
    /// caret right after them.
    ///
    /// Returns the resulting caret, or `None` when no selection could be
    /// established or the tree rejected the edit (logged, never raised).
    pub fn insert<H: SelectionHost>(
        &self,
        tree: &mut EditableTree,
        selection: &mut SelectionFacade<H>,
        nodes: &[NodeId],
        is_line_break: bool,
    ) -> Option<Range> {
        match self.try_insert(tree, selection, nodes, is_line_break) {
            Ok(caret) => caret,
            Err(error) => {
                tracing::warn!(target: "quire::insert", %error, "insertion abandoned");
                None
            }
        }
    }

    /// Insert a line break: a fresh empty text node, inserted with the
    /// line-break flag so consecutive breaks never fold into one text run.
    pub fn insert_line_break<H: SelectionHost>(
        &self,
        tree: &mut EditableTree,
        selection: &mut SelectionFacade<H>,
    ) -> Option<Range> {
        let spacer = tree.create_text("");
        self.insert(tree, selection, &[spacer], true)
    }

    fn try_insert<H: SelectionHost>(
        &self,
        tree: &mut EditableTree,
        selection: &mut SelectionFacade<H>,
        nodes: &[NodeId],
        is_line_break: bool,
    ) -> Result<Option<Range>> {
        let range = match selection.get(tree) {
            Some(range) => range,
            None => {
                selection.focus(tree);
                match selection.get(tree) {
                    Some(range) => range,
                    None => return Ok(None),
                }
            }
        };

        let mut in_text = range
            .common_ancestor(tree)
            .is_some_and(|node| tree.is_text(node));

        let anchor = match reusable_anchor(tree, &range) {
            Some(anchor) => {
                // Content replaces the empty-document line break even when
                // the anchor left by an earlier line break is reused.
                if !is_line_break {
                    if let Some(marker) = canonical_empty_marker(tree, selection.root()) {
                        tree.discard(marker)?;
                        in_text = false;
                    }
                }
                let mut pruned = 0usize;
                let mut prev = tree.prev_sibling(anchor);
                while let Some(node) = prev {
                    match tree.text(node).map(str::is_empty) {
                        Some(true) => {
                            prev = tree.prev_sibling(node);
                            tree.discard(node)?;
                            pruned += 1;
                        }
                        Some(false) => break,
                        None => {
                            if !is_line_break {
                                in_text = false;
                            }
                            break;
                        }
                    }
                }
                tracing::trace!(
                    target: "quire::insert",
                    ?anchor,
                    pruned,
                    in_text,
                    "reusing caret anchor"
                );
                anchor
            }
            None => {
                let mut range = range;
                if !in_text {
                    if let Some(marker) = canonical_empty_marker(tree, selection.root()) {
                        if let Some(around) = Range::select_node(tree, marker) {
                            range = around;
                        }
                    }
                }
                range.delete_contents(tree)?;
                let anchor = tree.create_text(CARET_MARKER_STR);
                range.insert_node(tree, anchor)?;
                tracing::trace!(target: "quire::insert", ?anchor, in_text, "placed caret anchor");
                anchor
            }
        };

        let parent = tree
            .parent(anchor)
            .ok_or(TreeError::Hierarchy("caret anchor is detached"))?;
        let mut reference = anchor;
        for &node in nodes.iter().rev() {
            tree.insert_before(parent, node, Some(reference))?;
            reference = node;
        }

        if in_text {
            let line_break = tree.create_element(self.line_break_tag.clone());
            tree.insert_before(parent, line_break, Some(reference))?;
        }

        let caret = Range::caret(Position::new(anchor, 1));
        selection.set(caret);
        tracing::debug!(
            target: "quire::insert",
            count = nodes.len(),
            is_line_break,
            split_line = in_text,
            "inserted content"
        );
        Ok(Some(caret))
    }
}

/// A collapsed selection sitting in a text node whose whole content is the
/// marker character.
fn reusable_anchor(tree: &EditableTree, range: &Range) -> Option<NodeId> {
    if !range.collapsed() {
        return None;
    }
    let node = range.start.node;
    (tree.text(node)? == CARET_MARKER_STR).then_some(node)
}
