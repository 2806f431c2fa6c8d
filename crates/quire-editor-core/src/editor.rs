//! The editor: content access, event handling and change notification
//! around one selection façade, one insertion engine and one paste
//! sanitizer.

use crate::actions::{Key, KeyEvent, KeyOutcome};
use crate::config::EditorConfig;
use crate::error::Result;
use crate::insert::{CARET_MARKER, InsertionEngine, canonical_empty_marker};
use crate::markup::{Fragment, is_void_element, parse_fragment, serialize};
use crate::paste::{
    CaptureOutcome, CaptureSurface, CaptureTask, ClipboardData, MemoryCaptureSurface, PasteRead,
    PasteSanitizer,
};
use crate::range::{Position, Range};
use crate::sanitize::{SanitizedFragment, Sanitizer};
use crate::selection::{SelectionFacade, SelectionHost, SimulatedSelection};
use crate::tree::{EditableTree, NodeId, char_to_byte};

/// Host callback fired after every content change.
pub type ChangeCallback = Box<dyn FnMut()>;

/// Construction input.
#[derive(Default)]
pub struct EditorOptions {
    /// Initial markup. Absent or empty means an empty document.
    pub content: Option<String>,
    pub placeholder: Option<String>,
    pub on_content_change: Option<ChangeCallback>,
}

/// What became of a paste event.
#[derive(Debug)]
pub enum PasteOutcome<S: CaptureSurface> {
    /// Content was inserted; the caret is after it.
    Inserted(Range),
    /// Nothing to insert, or the editor no longer listens.
    Ignored,
    /// Content is being captured. Drive the task and pass its outcome to
    /// [`Editor::finish_capture`].
    Capturing(CaptureTask<S>),
}

pub struct Editor<H = SimulatedSelection, S = MemoryCaptureSurface> {
    tree: EditableTree,
    selection: SelectionFacade<H>,
    engine: InsertionEngine,
    paste: PasteSanitizer<S>,
    config: EditorConfig,
    on_content_change: Option<ChangeCallback>,
    listening: bool,
}

impl Editor {
    /// An editor over the in-memory selection and capture surface.
    pub fn simulated(options: EditorOptions, config: EditorConfig) -> Self {
        Self::new(
            options,
            SimulatedSelection::new(),
            MemoryCaptureSurface::new(),
            config,
        )
    }
}

impl<H: SelectionHost, S: CaptureSurface> Editor<H, S> {
    pub fn new(options: EditorOptions, host: H, surface: S, config: EditorConfig) -> Self {
        let tree = EditableTree::new("div");
        let selection = SelectionFacade::new(host, tree.root());
        let sanitizer = Sanitizer::new(config.sanitize.clone());
        let paste = PasteSanitizer::new(surface, sanitizer, config.paste.clone());

        let mut editor = Self {
            tree,
            selection,
            engine: InsertionEngine::new(),
            paste,
            config,
            on_content_change: options.on_content_change,
            listening: true,
        };
        editor.set_content(options.content.as_deref().unwrap_or_default());
        if let Some(placeholder) = options.placeholder.filter(|p| !p.is_empty()) {
            editor.set_placeholder(&placeholder);
        }
        tracing::debug!(target: "quire::editor", "editor attached");
        editor
    }

    pub fn tree(&self) -> &EditableTree {
        &self.tree
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn selection(&self) -> &SelectionFacade<H> {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut SelectionFacade<H> {
        &mut self.selection
    }

    pub fn paste_sanitizer(&self) -> &PasteSanitizer<S> {
        &self.paste
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// The current selection, if it lies inside the editor.
    pub fn caret(&self) -> Option<Range> {
        self.selection.get(&self.tree)
    }

    pub fn save_selection(&mut self) {
        self.selection.save(&self.tree);
    }

    pub fn restore_selection(&mut self) -> Option<Range> {
        self.selection.restore(&self.tree)
    }

    // === Content ===

    /// Serialized content, without caret-anchor markers and (by default)
    /// without inline styles.
    pub fn content(&self) -> String {
        let nodes: Vec<Fragment> = self
            .tree
            .children(self.tree.root())
            .iter()
            .filter_map(|&child| self.tree.to_fragment(child))
            .filter_map(|node| self.scrub(node))
            .collect();
        serialize(&nodes)
    }

    fn scrub(&self, node: Fragment) -> Option<Fragment> {
        match node {
            Fragment::Text(text) => {
                let text: String = text.chars().filter(|&c| c != CARET_MARKER).collect();
                (!text.is_empty()).then_some(Fragment::Text(text))
            }
            Fragment::Element {
                tag,
                mut attrs,
                children,
            } => {
                if self.config.strip_styles_on_read {
                    attrs.retain(|(name, _)| name != "style");
                }
                let children = children
                    .into_iter()
                    .filter_map(|child| self.scrub(child))
                    .collect();
                Some(Fragment::Element {
                    tag,
                    attrs,
                    children,
                })
            }
        }
    }

    /// Replace the content. Empty input becomes the canonical single line
    /// break. Any selection (and saved snapshot) is dropped.
    pub fn set_content(&mut self, markup: &str) {
        let mut fragments = parse_fragment(markup);
        if fragments.is_empty() {
            fragments.push(Fragment::element("br", Vec::new()));
        }
        let root = self.tree.root();
        if let Err(error) = self.tree.replace_children(root, &fragments) {
            tracing::warn!(target: "quire::editor", %error, "failed to set content");
        }
        self.selection.clear();
        self.selection.forget();
        self.update_empty_flag();
    }

    /// Whether the content is `""` or the canonical `<br>`.
    pub fn is_empty(&self) -> bool {
        let content = self.content();
        content.is_empty() || content == "<br>"
    }

    pub fn placeholder(&self) -> &str {
        self.tree
            .attr(self.tree.root(), &self.config.placeholder_attribute)
            .unwrap_or_default()
    }

    pub fn set_placeholder(&mut self, placeholder: &str) {
        let root = self.tree.root();
        if let Err(error) = self
            .tree
            .set_attr(root, &self.config.placeholder_attribute, placeholder)
        {
            tracing::warn!(target: "quire::editor", %error, "failed to set placeholder");
        }
    }

    fn update_empty_flag(&mut self) {
        let flag = if self.is_empty() { "1" } else { "0" };
        let root = self.tree.root();
        if let Err(error) = self.tree.set_attr(root, &self.config.empty_attribute, flag) {
            tracing::warn!(target: "quire::editor", %error, "failed to update emptiness flag");
        }
    }

    /// Recompute the emptiness flag and tell the host.
    pub fn notify_change(&mut self) {
        self.update_empty_flag();
        tracing::trace!(target: "quire::editor", empty = self.is_empty(), "content changed");
        if let Some(callback) = self.on_content_change.as_mut() {
            callback();
        }
    }

    /// Put the canonical line break back when nothing visible is left.
    ///
    /// With no markup left at all the line break is added next to the
    /// caret anchor. Leftover empty containers (`<p></p>`) are replaced by
    /// it outright, and the caret moves in front of it.
    fn ensure_canonical(&mut self) {
        let root = self.tree.root();
        if self.content().is_empty() {
            let line_break = self.tree.create_element("br");
            if let Err(error) = self.tree.insert_at(root, 0, line_break) {
                tracing::warn!(target: "quire::editor", %error, "failed to restore empty marker");
            }
            return;
        }
        if !self.is_blank() {
            return;
        }
        tracing::debug!(target: "quire::editor", "resetting blank content");
        let canonical = [Fragment::element("br", Vec::new())];
        if let Err(error) = self.tree.replace_children(root, &canonical) {
            tracing::warn!(target: "quire::editor", %error, "failed to reset blank content");
            return;
        }
        self.selection.forget();
        self.selection.collapse_to(Position::new(root, 0));
    }

    /// No visible text and no void content (images, line breaks) anywhere
    /// under the root.
    fn is_blank(&self) -> bool {
        let root = self.tree.root();
        self.tree
            .descendants(root)
            .filter(|&node| node != root)
            .all(|node| match self.tree.tag(node) {
                Some(tag) => !is_void_element(tag),
                None => self
                    .tree
                    .text(node)
                    .is_none_or(|text| text.chars().all(|c| c == CARET_MARKER)),
            })
    }

    // === Focus ===

    pub fn focus(&mut self) {
        self.selection.focus(&self.tree);
    }

    pub fn blur(&mut self) {
        self.selection.blur();
    }

    // === Editing ===

    /// Insert tree nodes (created through [`tree_mut`](Self::tree_mut)) at
    /// the caret.
    pub fn insert_nodes(&mut self, nodes: &[NodeId]) -> Option<Range> {
        let caret = self
            .engine
            .insert(&mut self.tree, &mut self.selection, nodes, false)?;
        self.ensure_canonical();
        self.notify_change();
        Some(self.caret().unwrap_or(caret))
    }

    pub fn insert_fragment(&mut self, fragment: &SanitizedFragment) -> Option<Range> {
        if fragment.is_empty() {
            return None;
        }
        let nodes: Vec<NodeId> = fragment
            .nodes()
            .iter()
            .map(|node| self.tree.import(node))
            .collect();
        self.insert_nodes(&nodes)
    }

    pub fn insert_line_break(&mut self) -> Option<Range> {
        let caret = self
            .engine
            .insert_line_break(&mut self.tree, &mut self.selection)?;
        self.ensure_canonical();
        self.notify_change();
        Some(self.caret().unwrap_or(caret))
    }

    /// Mutable tree access for building nodes to insert.
    pub fn tree_mut(&mut self) -> &mut EditableTree {
        &mut self.tree
    }

    /// Native typing: replace the selection with `text` and fire input.
    pub fn type_text(&mut self, text: &str) -> Option<Range> {
        if text.is_empty() {
            return None;
        }
        match self.try_type_text(text) {
            Ok(caret) => {
                if caret.is_some() {
                    self.handle_input();
                }
                caret
            }
            Err(error) => {
                tracing::warn!(target: "quire::editor", %error, "typing abandoned");
                None
            }
        }
    }

    fn try_type_text(&mut self, text: &str) -> Result<Option<Range>> {
        let mut range = match self.selection.get(&self.tree) {
            Some(range) => range,
            None => {
                self.selection.focus(&self.tree);
                match self.selection.get(&self.tree) {
                    Some(range) => range,
                    None => return Ok(None),
                }
            }
        };
        range.delete_contents(&mut self.tree)?;
        let mut pos = range.start;

        // Typed text replaces the empty-document line break, wherever the
        // caret sits relative to it.
        let root = self.tree.root();
        if let Some(marker) = canonical_empty_marker(&self.tree, root) {
            let index = self.tree.index_in_parent(marker).unwrap_or_default();
            if pos.node == marker {
                pos = Position::new(root, index);
            } else if pos.node == root && index < pos.offset {
                pos.offset -= 1;
            }
            self.tree.discard(marker)?;
        }

        if !self.tree.is_text(pos.node) {
            let before = pos
                .offset
                .checked_sub(1)
                .and_then(|index| self.tree.children(pos.node).get(index).copied())
                .filter(|&node| self.tree.is_text(node));
            pos = match before {
                Some(node) => Position::new(node, self.tree.node_length(node)),
                None => {
                    let node = self.tree.create_text("");
                    self.tree.insert_at(pos.node, pos.offset, node)?;
                    Position::new(node, 0)
                }
            };
        }

        let mut updated = self.tree.text(pos.node).unwrap_or_default().to_string();
        updated.insert_str(char_to_byte(&updated, pos.offset), text);
        self.tree.set_text(pos.node, updated)?;

        let caret = Range::caret(Position::new(pos.node, pos.offset + text.chars().count()));
        self.selection.set(caret);
        Ok(Some(caret))
    }

    /// Select everything in the editor.
    pub fn select_all(&mut self) {
        let range = Range::select_node_contents(&self.tree, self.tree.root());
        self.selection.set(range);
    }

    /// Delete the selected content. Returns whether anything was selected.
    pub fn delete_selection(&mut self) -> bool {
        let Some(mut range) = self.selection.get(&self.tree) else {
            return false;
        };
        if range.collapsed() {
            return false;
        }
        if let Err(error) = range.delete_contents(&mut self.tree) {
            tracing::warn!(target: "quire::editor", %error, "delete abandoned");
            return false;
        }
        self.selection.set(range);
        self.ensure_canonical();
        self.notify_change();
        true
    }

    // === Images ===

    /// Insert a loading image tagged with `id`, to be resolved later.
    pub fn insert_loading_placeholder(&mut self, id: &str, url: &str) -> Option<Range> {
        let image = self.tree.create_element("img");
        let tagged = self
            .tree
            .set_attr(image, "id", id)
            .and_then(|()| self.tree.set_attr(image, "src", url));
        if let Err(error) = tagged {
            tracing::warn!(target: "quire::editor", %error, "failed to build loading image");
            return None;
        }
        self.insert_nodes(&[image])
    }

    /// Point the loading image `id` at its final address and drop the id.
    /// Returns whether such an image was found.
    pub fn resolve_image(
        &mut self,
        id: &str,
        url: &str,
        width: Option<u32>,
        height: Option<u32>,
    ) -> bool {
        let Some(image) = self.tree.find_element("img", "id", id) else {
            tracing::debug!(target: "quire::editor", id, "no loading image to resolve");
            return false;
        };
        let mut result = self
            .tree
            .set_attr(image, "src", url)
            .and_then(|()| self.tree.remove_attr(image, "id"));
        for (name, value) in [("data-width", width), ("data-height", height)] {
            if let Some(value) = value.filter(|&v| v > 0) {
                result = result.and_then(|()| self.tree.set_attr(image, name, value.to_string()));
            }
        }
        if let Err(error) = result {
            tracing::warn!(target: "quire::editor", %error, "failed to resolve image");
            return false;
        }
        self.notify_change();
        true
    }

    // === Events ===

    pub fn handle_keydown(&mut self, event: &KeyEvent) -> KeyOutcome {
        if !self.listening {
            return KeyOutcome::NotHandled;
        }
        if event.is_composing {
            return KeyOutcome::PassThrough;
        }
        match &event.key {
            // Every Enter goes through the insertion engine; native handling
            // would add unnormalized blocks.
            Key::Enter => {
                self.insert_line_break();
                KeyOutcome::Handled
            }
            key if key.is_navigation() || key.is_modifier() => KeyOutcome::PassThrough,
            _ => KeyOutcome::NotHandled,
        }
    }

    /// Intercept a paste. The selection is saved before anything can move
    /// focus to the capture surface.
    pub fn handle_paste(&mut self, clipboard: &dyn ClipboardData) -> PasteOutcome<S> {
        if !self.listening {
            return PasteOutcome::Ignored;
        }
        self.selection.save(&self.tree);
        match self.paste.on_paste(clipboard) {
            PasteRead::Ready(fragment) => match self.finish_paste(Some(fragment)) {
                Some(caret) => PasteOutcome::Inserted(caret),
                None => PasteOutcome::Ignored,
            },
            PasteRead::Empty => {
                self.selection.forget();
                PasteOutcome::Ignored
            }
            PasteRead::Capturing(task) => {
                self.selection.blur();
                PasteOutcome::Capturing(task)
            }
        }
    }

    /// Complete a capture started by [`handle_paste`](Self::handle_paste).
    /// A superseded capture is ignored; its successor owns the selection.
    pub fn finish_capture(&mut self, outcome: CaptureOutcome) -> Option<Range> {
        match outcome {
            CaptureOutcome::Ready(markup) => {
                let fragment = self.paste.sanitizer().sanitize_markup(&markup);
                self.finish_paste(Some(fragment))
            }
            CaptureOutcome::TimedOut => self.finish_paste(None),
            CaptureOutcome::Cancelled => None,
        }
    }

    /// Restore the saved selection and insert whatever was pasted.
    pub fn finish_paste(&mut self, fragment: Option<SanitizedFragment>) -> Option<Range> {
        if !self.listening {
            self.selection.forget();
            return None;
        }
        if self.selection.restore(&self.tree).is_some() {
            self.selection.host_mut().focus();
        }
        let fragment = fragment.filter(|fragment| !fragment.is_empty())?;
        self.insert_fragment(&fragment)
    }

    /// Handle a paste end to end, waiting for capture when needed.
    pub async fn paste(&mut self, clipboard: &dyn ClipboardData) -> Option<Range> {
        match self.handle_paste(clipboard) {
            PasteOutcome::Inserted(caret) => Some(caret),
            PasteOutcome::Ignored => None,
            PasteOutcome::Capturing(task) => {
                let outcome = task.wait().await;
                self.finish_capture(outcome)
            }
        }
    }

    /// Native input happened.
    pub fn handle_input(&mut self) {
        if self.listening {
            self.notify_change();
        }
    }

    /// Stop handling events. Safe to call more than once.
    pub fn teardown(&mut self) {
        if !self.listening {
            return;
        }
        self.listening = false;
        self.paste.cancel();
        tracing::debug!(target: "quire::editor", "editor detached");
    }
}
