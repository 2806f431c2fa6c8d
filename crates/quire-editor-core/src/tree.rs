//! Arena-backed editable document tree.
//!
//! The tree mirrors the small slice of DOM node semantics the editing core
//! needs: elements with ordered attributes and children, text nodes, and
//! detach-not-destroy removal. Nodes removed from the tree stay addressable
//! (as they would in a DOM) but no longer count as part of the document,
//! until they are explicitly [reclaimed](EditableTree::reclaim). Reclaimed
//! slots are reused; the generation stored in every [`NodeId`] keeps stale
//! handles from resolving to the new occupant.

use smol_str::SmolStr;

use crate::error::{Result, TreeError};
use crate::markup::{self, Fragment};

/// Handle to a node in an [`EditableTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element {
        tag: SmolStr,
        attrs: Vec<(SmolStr, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Slot {
    generation: u32,
    data: Option<NodeData>,
}

/// The live content tree rooted at the editor element.
#[derive(Debug, Clone)]
pub struct EditableTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
}

impl EditableTree {
    /// Create a tree whose root is an empty element with the given tag.
    pub fn new(root_tag: impl Into<SmolStr>) -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId {
                index: 0,
                generation: 0,
            },
        };
        tree.root = tree.create_element(root_tag);
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let data = NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        };
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.data = Some(data);
            return NodeId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            data: Some(data),
        });
        NodeId {
            index,
            generation: 0,
        }
    }

    /// Number of live nodes, attached or not.
    pub fn node_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Free a detached node and its whole subtree, returning how many nodes
    /// were released. Their ids stop resolving immediately.
    pub fn reclaim(&mut self, id: NodeId) -> Result<usize> {
        if id == self.root {
            return Err(TreeError::Hierarchy("the root cannot be reclaimed"));
        }
        if self.data(id)?.parent.is_some() {
            return Err(TreeError::Hierarchy("only detached nodes can be reclaimed"));
        }
        let mut stack = vec![id];
        let mut released = 0;
        while let Some(node) = stack.pop() {
            let Some(slot) = self.slots.get_mut(node.index()) else {
                continue;
            };
            if slot.generation != node.generation {
                continue;
            }
            let Some(data) = slot.data.take() else {
                continue;
            };
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(node.index);
            stack.extend(data.children);
            released += 1;
        }
        tracing::trace!(target: "quire::tree", released, "reclaimed nodes");
        Ok(released)
    }

    /// Detach a node and free it along with its subtree.
    pub fn discard(&mut self, id: NodeId) -> Result<usize> {
        self.remove(id)?;
        self.reclaim(id)
    }

    /// Create a detached element.
    pub fn create_element(&mut self, tag: impl Into<SmolStr>) -> NodeId {
        let tag: SmolStr = tag.into();
        self.alloc(NodeKind::Element {
            tag: SmolStr::new(tag.to_ascii_lowercase()),
            attrs: Vec::new(),
        })
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Text(text.into()))
    }

    fn data(&self, id: NodeId) -> Result<&NodeData> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.data.as_ref())
            .ok_or(TreeError::UnknownNode(id))
    }

    fn data_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.data.as_mut())
            .ok_or(TreeError::UnknownNode(id))
    }

    /// Whether the id refers to a live node of this tree (attached or not).
    pub fn exists(&self, id: NodeId) -> bool {
        self.data(id).is_ok()
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.data(id).ok().map(|d| &d.kind)
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Text(_)))
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Element { .. }))
    }

    /// Tag name of an element.
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element { tag, .. } => Some(tag.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    /// Whether `id` is an element with the given tag.
    pub fn has_tag(&self, id: NodeId, tag: &str) -> bool {
        self.tag(id) == Some(tag)
    }

    /// Content of a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Text(text) => Some(text.as_str()),
            NodeKind::Element { .. } => None,
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) -> Result<()> {
        match &mut self.data_mut(id)?.kind {
            NodeKind::Text(existing) => {
                *existing = text.into();
                Ok(())
            }
            NodeKind::Element { .. } => Err(TreeError::NotText(id)),
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str()),
            NodeKind::Text(_) => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        match &mut self.data_mut(id)?.kind {
            NodeKind::Element { attrs, .. } => {
                match attrs.iter_mut().find(|(key, _)| key == name) {
                    Some((_, existing)) => *existing = value,
                    None => attrs.push((SmolStr::new(name), value)),
                }
                Ok(())
            }
            NodeKind::Text(_) => Err(TreeError::NotAnElement(id)),
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Result<()> {
        match &mut self.data_mut(id)?.kind {
            NodeKind::Element { attrs, .. } => {
                attrs.retain(|(key, _)| key != name);
                Ok(())
            }
            NodeKind::Text(_) => Err(TreeError::NotAnElement(id)),
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.data(id).ok()?.parent
    }

    /// Children of a node; empty for text and unknown ids.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.data(id).map(|d| d.children.as_slice()).unwrap_or(&[])
    }

    pub fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let index = self.index_in_parent(id)?;
        index
            .checked_sub(1)
            .and_then(|i| self.children(parent).get(i).copied())
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let index = self.index_in_parent(id)?;
        self.children(parent).get(index + 1).copied()
    }

    /// Boundary length: chars for text, child count for elements.
    pub fn node_length(&self, id: NodeId) -> usize {
        match self.data(id) {
            Ok(NodeData {
                kind: NodeKind::Text(text),
                ..
            }) => text.chars().count(),
            Ok(data) => data.children.len(),
            Err(_) => 0,
        }
    }

    /// Inclusive ancestry check.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        if !self.exists(node) {
            return false;
        }
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Whether the node is part of the document rooted at [`Self::root`].
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.contains(self.root, id)
    }

    /// Child-index path from the root to `id`, or `None` for detached nodes.
    pub fn path(&self, id: NodeId) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut current = id;
        while current != self.root {
            path.push(self.index_in_parent(current)?);
            current = self.parent(current)?;
        }
        path.reverse();
        Some(path)
    }

    /// Insert `child` into `parent` before `reference` (append when `None`).
    /// The child is detached from its previous parent first.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        if !self.is_element(parent) {
            return Err(TreeError::NotAnElement(parent));
        }
        self.data(child)?;
        if self.contains(child, parent) {
            return Err(TreeError::Hierarchy("node would become its own ancestor"));
        }
        if reference == Some(child) {
            return Ok(());
        }
        if let Some(reference) = reference {
            if self.parent(reference) != Some(parent) {
                return Err(TreeError::Hierarchy("reference is not a child of parent"));
            }
        }
        self.remove(child)?;
        let index = match reference {
            Some(reference) => self
                .index_in_parent(reference)
                .ok_or(TreeError::Hierarchy("reference is not a child of parent"))?,
            None => self.children(parent).len(),
        };
        self.data_mut(parent)?.children.insert(index, child);
        self.data_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Insert `child` at a child index of `parent`.
    pub fn insert_at(&mut self, parent: NodeId, index: usize, child: NodeId) -> Result<()> {
        let reference = self.children(parent).get(index).copied();
        self.insert_before(parent, child, reference)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    /// Detach a node from its parent. Detached nodes are a no-op.
    pub fn remove(&mut self, id: NodeId) -> Result<()> {
        let Some(parent) = self.data(id)?.parent else {
            return Ok(());
        };
        self.data_mut(parent)?.children.retain(|&c| c != id);
        self.data_mut(id)?.parent = None;
        Ok(())
    }

    /// Detach every child of `parent`.
    pub fn clear_children(&mut self, parent: NodeId) -> Result<()> {
        let children = std::mem::take(&mut self.data_mut(parent)?.children);
        for child in children {
            self.data_mut(child)?.parent = None;
        }
        Ok(())
    }

    /// Split a text node at a char offset. The node keeps `[0, offset)` and a
    /// new following sibling receives the rest, even when that is empty.
    pub fn split_text(&mut self, id: NodeId, offset: usize) -> Result<NodeId> {
        let text = self.text(id).ok_or(TreeError::NotText(id))?;
        let len = text.chars().count();
        if offset > len {
            return Err(TreeError::OffsetOutOfRange {
                node: id,
                offset,
                len,
            });
        }
        let byte = char_to_byte(text, offset);
        let tail = text[byte..].to_string();
        let head = text[..byte].to_string();
        self.set_text(id, head)?;
        let new = self.create_text(tail);
        if let Some(parent) = self.parent(id) {
            let reference = self.next_sibling(id);
            self.insert_before(parent, new, reference)?;
        }
        Ok(new)
    }

    /// Pre-order traversal of `id` and its descendants.
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        let stack = if self.exists(id) { vec![id] } else { Vec::new() };
        Descendants { tree: self, stack }
    }

    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .filter_map(|node| self.text(node))
            .collect()
    }

    /// First attached element with the given tag and attribute value.
    pub fn find_element(&self, tag: &str, attr: &str, value: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .find(|&node| self.has_tag(node, tag) && self.attr(node, attr) == Some(value))
    }

    /// Build detached nodes for a fragment and return the top node.
    pub fn import(&mut self, fragment: &Fragment) -> NodeId {
        match fragment {
            Fragment::Text(text) => self.create_text(text.clone()),
            Fragment::Element {
                tag,
                attrs,
                children,
            } => {
                let element = self.alloc(NodeKind::Element {
                    tag: tag.clone(),
                    attrs: attrs.clone(),
                });
                for child in children {
                    let child = self.import(child);
                    // Both nodes are fresh, so the hierarchy is always valid.
                    if let Ok(data) = self.data_mut(child) {
                        data.parent = Some(element);
                    }
                    if let Ok(data) = self.data_mut(element) {
                        data.children.push(child);
                    }
                }
                element
            }
        }
    }

    /// Replace all children of `parent` with freshly imported fragments.
    /// The old children are reclaimed.
    pub fn replace_children(&mut self, parent: NodeId, fragments: &[Fragment]) -> Result<()> {
        let old = self.children(parent).to_vec();
        self.clear_children(parent)?;
        for child in old {
            self.reclaim(child)?;
        }
        for fragment in fragments {
            let node = self.import(fragment);
            self.append_child(parent, node)?;
        }
        Ok(())
    }

    /// Owned copy of a node and its subtree.
    pub fn to_fragment(&self, id: NodeId) -> Option<Fragment> {
        match self.kind(id)? {
            NodeKind::Text(text) => Some(Fragment::Text(text.clone())),
            NodeKind::Element { tag, attrs } => Some(Fragment::Element {
                tag: tag.clone(),
                attrs: attrs.clone(),
                children: self
                    .children(id)
                    .iter()
                    .filter_map(|&child| self.to_fragment(child))
                    .collect(),
            }),
        }
    }

    /// Serialized markup of the children of `id`.
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            self.write_node(&mut out, child);
        }
        out
    }

    fn write_node(&self, out: &mut String, id: NodeId) {
        match self.kind(id) {
            Some(NodeKind::Text(text)) => markup::write_text(out, text),
            Some(NodeKind::Element { tag, attrs }) => {
                markup::write_start_tag(out, tag, attrs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
                if !markup::is_void_element(tag) {
                    for &child in self.children(id) {
                        self.write_node(out, child);
                    }
                    markup::write_end_tag(out, tag);
                }
            }
            None => {}
        }
    }
}

/// Convert a char offset into a byte offset, clamping to the end.
pub(crate) fn char_to_byte(text: &str, char_offset: usize) -> usize {
    text.char_indices()
        .nth(char_offset)
        .map_or(text.len(), |(byte, _)| byte)
}

pub struct Descendants<'a> {
    tree: &'a EditableTree,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.children(id).iter().rev().copied());
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::parse_fragment;

    fn tree_with(markup: &str) -> EditableTree {
        let mut tree = EditableTree::new("div");
        let root = tree.root();
        tree.replace_children(root, &parse_fragment(markup))
            .expect("root is an element");
        tree
    }

    #[test]
    fn test_import_and_serialize() {
        let tree = tree_with("<p>a<b>b</b></p><br>");
        assert_eq!(tree.inner_html(tree.root()), "<p>a<b>b</b></p><br>");
    }

    #[test]
    fn test_insert_before_moves_node() {
        let mut tree = tree_with("<p>a</p><p>b</p>");
        let root = tree.root();
        let first = tree.children(root)[0];
        let second = tree.children(root)[1];
        tree.insert_before(root, second, Some(first)).unwrap();
        assert_eq!(tree.inner_html(root), "<p>b</p><p>a</p>");
        assert_eq!(tree.children(root).len(), 2);
    }

    #[test]
    fn test_insert_rejects_cycles_and_text_parents() {
        let mut tree = tree_with("<p>a</p>");
        let root = tree.root();
        let p = tree.children(root)[0];
        let text = tree.children(p)[0];
        assert!(matches!(
            tree.append_child(p, root),
            Err(TreeError::Hierarchy(_))
        ));
        let stray = tree.create_text("x");
        assert_eq!(
            tree.append_child(text, stray),
            Err(TreeError::NotAnElement(text))
        );
    }

    #[test]
    fn test_split_text_keeps_empty_halves() {
        let mut tree = tree_with("héllo");
        let root = tree.root();
        let text = tree.children(root)[0];
        let tail = tree.split_text(text, 2).unwrap();
        assert_eq!(tree.text(text), Some("hé"));
        assert_eq!(tree.text(tail), Some("llo"));

        let empty = tree.split_text(tail, 3).unwrap();
        assert_eq!(tree.text(empty), Some(""));
        assert_eq!(tree.children(root), &[text, tail, empty]);

        assert!(matches!(
            tree.split_text(text, 9),
            Err(TreeError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn test_removed_nodes_are_detached() {
        let mut tree = tree_with("<p>a</p>");
        let root = tree.root();
        let p = tree.children(root)[0];
        let text = tree.children(p)[0];
        tree.remove(p).unwrap();
        assert!(!tree.is_attached(p));
        assert!(!tree.is_attached(text));
        assert!(tree.contains(p, text));
        assert_eq!(tree.inner_html(root), "");
    }

    #[test]
    fn test_replace_children_reuses_slots() {
        let mut tree = tree_with("<p>a</p><p>b</p>");
        let root = tree.root();
        let old = tree.children(root)[0];
        let baseline = tree.node_count();
        for _ in 0..1000 {
            tree.replace_children(root, &parse_fragment("<p>a</p><p>b</p>"))
                .unwrap();
        }
        assert_eq!(tree.node_count(), baseline);
        assert!(tree.create_text("x").index() <= baseline);

        // Old handles never resolve to whatever took their slot.
        assert!(!tree.exists(old));
        assert_eq!(tree.text(old), None);
        assert_eq!(tree.inner_html(root), "<p>a</p><p>b</p>");
    }

    #[test]
    fn test_reclaim_requires_detached_node() {
        let mut tree = tree_with("<p>a<b>b</b></p>");
        let root = tree.root();
        let p = tree.children(root)[0];
        assert!(matches!(tree.reclaim(p), Err(TreeError::Hierarchy(_))));
        assert!(matches!(tree.reclaim(root), Err(TreeError::Hierarchy(_))));

        let before = tree.node_count();
        assert_eq!(tree.discard(p), Ok(4));
        assert_eq!(tree.node_count(), before - 4);
        assert_eq!(tree.discard(p), Err(TreeError::UnknownNode(p)));
    }

    #[test]
    fn test_path_and_siblings() {
        let tree = tree_with("<p>a</p><p>b<i>c</i></p>");
        let root = tree.root();
        let second = tree.children(root)[1];
        let italic = tree.children(second)[1];
        assert_eq!(tree.path(italic), Some(vec![1, 1]));
        assert_eq!(tree.prev_sibling(second), Some(tree.children(root)[0]));
        assert_eq!(tree.next_sibling(second), None);
        assert_eq!(tree.text_content(root), "abc");
    }

    #[test]
    fn test_find_element_by_attribute() {
        let mut tree = tree_with(r#"<p><img id="a" src="x"></p>"#);
        let img = tree.find_element("img", "id", "a").unwrap();
        assert_eq!(tree.attr(img, "src"), Some("x"));
        tree.set_attr(img, "src", "y").unwrap();
        tree.remove_attr(img, "id").unwrap();
        assert_eq!(tree.inner_html(tree.root()), r#"<p><img src="y"></p>"#);
        assert_eq!(tree.find_element("img", "id", "a"), None);
    }
}
