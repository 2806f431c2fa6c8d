//! quire-editor-core: rich-text editing logic without framework dependencies.
//!
//! This crate provides:
//! - `EditableTree` - arena document model with DOM-like node semantics
//! - `SelectionFacade` - selection access scoped to the editor root, over a
//!   pluggable `SelectionHost`
//! - `InsertionEngine` - cursor-stable insertion around a caret-anchor marker
//! - `Sanitizer` / `PasteSanitizer` - paste capture and normalization
//! - `Editor` - the orchestrator wiring events to the above

pub mod actions;
pub mod config;
pub mod editor;
pub mod error;
pub mod insert;
pub mod markup;
pub mod paste;
pub mod range;
pub mod sanitize;
pub mod selection;
pub mod tree;

pub use actions::{Key, KeyEvent, KeyOutcome, Modifiers};
pub use config::{EditorConfig, PasteConfig, PasteStrategy};
pub use editor::{ChangeCallback, Editor, EditorOptions, PasteOutcome};
pub use error::{Result, TreeError};
pub use insert::{CARET_MARKER, InsertionEngine, canonical_empty_marker};
pub use markup::{Fragment, parse_fragment, serialize};
pub use paste::{
    CaptureOutcome, CaptureSurface, CaptureTask, ClipboardData, ClipboardSnapshot,
    MemoryCaptureSurface, PasteRead, PasteSanitizer,
};
pub use range::{Position, Range, compare_positions};
pub use sanitize::{SanitizeConfig, SanitizedFragment, Sanitizer, TagAction};
pub use selection::{SelectionFacade, SelectionHost, SimulatedSelection};
pub use smol_str::SmolStr;
pub use tree::{EditableTree, NodeId, NodeKind};
