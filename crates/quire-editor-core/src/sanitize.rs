//! Paste normalization: reduce arbitrary markup to the supported vocabulary.
//!
//! The pipeline is a tree walk over a parsed [`Fragment`] list. Each element
//! is classified once ([`TagAction`]), attributes are never carried over,
//! and a second pass tidies the block structure so that the output is a
//! fixed point: sanitizing it again changes nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::markup::{Fragment, parse_fragment, serialize};

fn tags(names: &[&'static str]) -> Vec<SmolStr> {
    names.iter().map(|name| SmolStr::new_static(name)).collect()
}

/// Tag vocabulary and coercion table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizeConfig {
    /// Elements removed together with everything inside them.
    pub complex_tags: Vec<SmolStr>,
    /// Inline elements that survive as-is.
    pub supported_tags: Vec<SmolStr>,
    /// The one block element the output may contain.
    pub block_tag: SmolStr,
    /// Structural elements coerced to `block_tag`.
    pub block_tags: Vec<SmolStr>,
    /// Inline spellings coerced to a supported tag.
    pub aliases: BTreeMap<SmolStr, SmolStr>,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            complex_tags: tags(&[
                "noscript", "script", "video", "audio", "object", "img", "style", "embed",
                "form", "iframe", "canvas", "svg", "template", "select", "button", "input",
                "textarea", "head", "title", "meta", "link", "base",
            ]),
            supported_tags: tags(&["br", "b", "i", "u", "strike"]),
            block_tag: SmolStr::new_static("p"),
            block_tags: tags(&[
                "div", "p", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article", "header",
                "footer", "aside", "nav", "main", "blockquote", "pre", "li", "dt", "dd",
                "figure", "figcaption", "address",
            ]),
            aliases: [
                ("strong", "b"),
                ("em", "i"),
                ("s", "strike"),
                ("del", "strike"),
                ("ins", "u"),
            ]
            .into_iter()
            .map(|(from, to)| (SmolStr::new_static(from), SmolStr::new_static(to)))
            .collect(),
        }
    }
}

/// What happens to an element during sanitization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagAction {
    /// Drop the element and its whole subtree.
    Remove,
    /// Coerce to the configured block tag.
    Block,
    /// Keep, under this (possibly aliased) name.
    Keep(SmolStr),
    /// Drop the wrapper, keep the content.
    Unwrap,
}

/// Sanitized paste content, restricted to the supported vocabulary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedFragment {
    nodes: Vec<Fragment>,
}

impl SanitizedFragment {
    pub fn nodes(&self) -> &[Fragment] {
        &self.nodes
    }

    pub fn into_nodes(self) -> Vec<Fragment> {
        self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn to_html(&self) -> String {
        serialize(&self.nodes)
    }
}

/// Markup sanitizer. Cheap to clone; the configuration is shared.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    config: Arc<SanitizeConfig>,
}

impl Sanitizer {
    pub fn new(config: SanitizeConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SanitizeConfig {
        &self.config
    }

    pub fn classify(&self, tag: &str) -> TagAction {
        let config = &*self.config;
        let listed = |list: &[SmolStr]| list.iter().any(|name| name.eq_ignore_ascii_case(tag));

        if listed(&config.complex_tags) {
            return TagAction::Remove;
        }
        if config.block_tag.eq_ignore_ascii_case(tag) || listed(&config.block_tags) {
            return TagAction::Block;
        }
        if let Some(known) = config
            .supported_tags
            .iter()
            .find(|name| name.eq_ignore_ascii_case(tag))
        {
            return TagAction::Keep(known.clone());
        }
        let alias = config
            .aliases
            .iter()
            .find(|(from, _)| from.eq_ignore_ascii_case(tag))
            .map(|(_, to)| to);
        match alias {
            Some(target) if self.is_supported(target) => TagAction::Keep(target.clone()),
            _ => TagAction::Unwrap,
        }
    }

    fn is_supported(&self, tag: &str) -> bool {
        self.config
            .supported_tags
            .iter()
            .any(|name| name.eq_ignore_ascii_case(tag))
    }

    fn is_block(&self, node: &Fragment) -> bool {
        node.tag() == Some(self.config.block_tag.as_str())
    }

    /// Sanitize raw markup.
    pub fn sanitize_markup(&self, markup: &str) -> SanitizedFragment {
        self.sanitize(parse_fragment(markup))
    }

    /// Sanitize an already parsed fragment list.
    pub fn sanitize(&self, nodes: Vec<Fragment>) -> SanitizedFragment {
        let mut cleaned = Vec::with_capacity(nodes.len());
        self.clean_into(nodes, &mut cleaned);
        let mut nodes = self.normalize(cleaned);
        if nodes.iter().all(is_blank_text) {
            nodes.clear();
        }
        tracing::debug!(target: "quire::sanitize", nodes = nodes.len(), "sanitized fragment");
        SanitizedFragment { nodes }
    }

    /// Turn plain text into text runs separated by line breaks.
    pub fn plain_text(&self, text: &str) -> SanitizedFragment {
        if text.trim().is_empty() {
            return SanitizedFragment::default();
        }
        let mut nodes = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if index > 0 {
                nodes.push(Fragment::element("br", Vec::new()));
            }
            if !line.is_empty() {
                nodes.push(Fragment::text(line));
            }
        }
        SanitizedFragment { nodes }
    }

    /// Classification pass: drop complex subtrees and every attribute,
    /// coerce or unwrap the rest.
    fn clean_into(&self, nodes: Vec<Fragment>, out: &mut Vec<Fragment>) {
        for node in nodes {
            let (tag, children) = match node {
                Fragment::Text(text) => {
                    out.push(Fragment::Text(text));
                    continue;
                }
                Fragment::Element { tag, children, .. } => (tag, children),
            };
            match self.classify(&tag) {
                TagAction::Remove => {
                    tracing::trace!(target: "quire::sanitize", %tag, "dropping complex subtree");
                }
                TagAction::Unwrap => self.clean_into(children, out),
                TagAction::Keep(name) => {
                    let mut kept = Vec::new();
                    self.clean_into(children, &mut kept);
                    out.push(Fragment::element(name, kept));
                }
                TagAction::Block => {
                    let mut kept = Vec::new();
                    self.clean_into(children, &mut kept);
                    out.push(Fragment::element(self.config.block_tag.clone(), kept));
                }
            }
        }
    }

    /// Structural pass over cleaned nodes.
    fn normalize(&self, nodes: Vec<Fragment>) -> Vec<Fragment> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Fragment::Text(text) => {
                    if is_formatting_whitespace(&text) {
                        continue;
                    }
                    push_merged(&mut out, Fragment::Text(text));
                }
                Fragment::Element { tag, children, .. } => {
                    let children = self.normalize(children);
                    if tag == "br" {
                        out.push(Fragment::element(tag, Vec::new()));
                    } else if tag == self.config.block_tag {
                        self.push_block(&mut out, children);
                    } else if children.is_empty() {
                        continue;
                    } else if children.iter().all(is_blank_text)
                        || children.iter().any(|child| self.is_block(child))
                    {
                        for child in children {
                            push_merged(&mut out, child);
                        }
                    } else {
                        out.push(Fragment::element(tag, children));
                    }
                }
            }
        }
        out
    }

    /// Emit a block. Blocks holding other blocks are flattened, with the
    /// loose inline runs between them wrapped in their own blocks.
    fn push_block(&self, out: &mut Vec<Fragment>, children: Vec<Fragment>) {
        if !children.iter().any(|child| self.is_block(child)) {
            self.push_flat_block(out, children);
            return;
        }
        let mut run = Vec::new();
        for child in children {
            if self.is_block(&child) {
                self.push_flat_block(out, std::mem::take(&mut run));
                out.push(child);
            } else {
                run.push(child);
            }
        }
        self.push_flat_block(out, run);
    }

    fn push_flat_block(&self, out: &mut Vec<Fragment>, children: Vec<Fragment>) {
        if children.iter().all(is_blank_text) {
            return;
        }
        if children
            .iter()
            .all(|child| is_blank_text(child) || child.tag() == Some("br"))
        {
            out.push(Fragment::element("br", Vec::new()));
            return;
        }
        out.push(Fragment::element(self.config.block_tag.clone(), children));
    }
}

fn is_blank_text(node: &Fragment) -> bool {
    matches!(node, Fragment::Text(text) if text.trim().is_empty())
}

/// Whitespace that only exists because the source markup was indented.
fn is_formatting_whitespace(text: &str) -> bool {
    text.trim().is_empty() && (text.is_empty() || text.contains('\n'))
}

fn push_merged(out: &mut Vec<Fragment>, node: Fragment) {
    if let Fragment::Text(text) = &node {
        if let Some(Fragment::Text(last)) = out.last_mut() {
            last.push_str(text);
            return;
        }
    }
    out.push(node);
}
