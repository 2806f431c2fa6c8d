//! Selection façade scoped to the editor root.
//!
//! Every cursor read and write goes through [`SelectionFacade`], which wraps
//! the host's native selection primitive behind [`SelectionHost`]. Hosts
//! without a real display surface (tests, headless tools) use
//! [`SimulatedSelection`].

use crate::range::{Position, Range};
use crate::tree::{EditableTree, NodeId};

/// The host's native text-selection primitive.
///
/// Modeled on the DOM `Selection` interface: a list of ranges (browsers
/// expose at most one, some hosts accumulate several) plus focus handling
/// for the editable root.
pub trait SelectionHost {
    fn range_count(&self) -> usize;

    fn range_at(&self, index: usize) -> Option<Range>;

    fn remove_all_ranges(&mut self);

    fn add_range(&mut self, range: Range);

    /// Give native focus to the editable root.
    fn focus(&mut self) {}

    /// Remove native focus from the editable root.
    fn blur(&mut self) {}
}

/// In-memory selection host.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSelection {
    ranges: Vec<Range>,
    focused: bool,
    multi_range: bool,
}

impl SimulatedSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host that accumulates ranges on `add_range` instead of replacing.
    pub fn multi_range() -> Self {
        Self {
            multi_range: true,
            ..Self::default()
        }
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }
}

impl SelectionHost for SimulatedSelection {
    fn range_count(&self) -> usize {
        self.ranges.len()
    }

    fn range_at(&self, index: usize) -> Option<Range> {
        self.ranges.get(index).copied()
    }

    fn remove_all_ranges(&mut self) {
        self.ranges.clear();
    }

    fn add_range(&mut self, range: Range) {
        if !self.multi_range {
            self.ranges.clear();
        }
        self.ranges.push(range);
    }

    fn focus(&mut self) {
        self.focused = true;
    }

    fn blur(&mut self) {
        self.focused = false;
    }
}

/// Selection access constrained to one editor root, with a single saved
/// snapshot slot.
#[derive(Debug)]
pub struct SelectionFacade<H> {
    host: H,
    root: NodeId,
    saved: Option<Range>,
}

impl<H: SelectionHost> SelectionFacade<H> {
    pub fn new(host: H, root: NodeId) -> Self {
        Self {
            host,
            root,
            saved: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The primary native range, if it lies inside the editor root.
    pub fn get(&self, tree: &EditableTree) -> Option<Range> {
        if self.host.range_count() == 0 {
            return None;
        }
        let range = self.host.range_at(0)?;
        if range.is_within(tree, self.root) {
            Some(range)
        } else {
            tracing::trace!(
                target: "quire::selection",
                ?range,
                "ignoring selection outside editor root"
            );
            None
        }
    }

    /// Replace every native range with exactly `range`.
    pub fn set(&mut self, range: Range) {
        self.host.remove_all_ranges();
        self.host.add_range(range);
    }

    /// Snapshot the current selection. Last save wins.
    pub fn save(&mut self, tree: &EditableTree) {
        self.saved = self.get(tree);
    }

    /// Re-apply and clear the saved snapshot, returning it. A snapshot that
    /// no longer lies inside the root is discarded.
    pub fn restore(&mut self, tree: &EditableTree) -> Option<Range> {
        let saved = self.saved.take()?;
        if !saved.is_within(tree, self.root) {
            tracing::debug!(
                target: "quire::selection",
                ?saved,
                "discarding stale saved selection"
            );
            return None;
        }
        self.set(saved);
        Some(saved)
    }

    pub fn saved(&self) -> Option<Range> {
        self.saved
    }

    /// Drop the saved snapshot without applying it.
    pub fn forget(&mut self) {
        self.saved = None;
    }

    /// Whether the saved selection (or else the current one) exists and is
    /// collapsed.
    pub fn is_collapsed(&self, tree: &EditableTree) -> bool {
        self.saved
            .or_else(|| self.get(tree))
            .is_some_and(|range| range.collapsed())
    }

    /// Focus the root and place the caret after all of its content.
    pub fn focus(&mut self, tree: &EditableTree) {
        self.host.focus();
        let mut range = Range::select_node_contents(tree, self.root);
        range.collapse(false);
        self.set(range);
    }

    pub fn blur(&mut self) {
        self.host.blur();
    }

    /// Place a collapsed caret at `pos`.
    pub fn collapse_to(&mut self, pos: Position) {
        self.set(Range::caret(pos));
    }

    /// Drop every native range.
    pub fn clear(&mut self) {
        self.host.remove_all_ranges();
    }
}
