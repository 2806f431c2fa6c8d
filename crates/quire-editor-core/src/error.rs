//! Error types for tree operations.

use thiserror::Error;

use crate::tree::NodeId;

/// Errors raised by structural operations on an [`EditableTree`](crate::EditableTree).
///
/// These never reach the host: the editing core logs them and degrades to a
/// no-op, since selection and clipboard input are unreliable by nature.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TreeError {
    /// The id does not refer to a node in this tree.
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    /// An element was required.
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),

    /// A text node was required.
    #[error("node {0:?} is not a text node")]
    NotText(NodeId),

    /// The insertion would make a node its own ancestor, or the reference
    /// node is not a child of the parent.
    #[error("hierarchy request error: {0}")]
    Hierarchy(&'static str),

    /// A boundary offset exceeds the node's length.
    #[error("offset {offset} out of range for node {node:?} (length {len})")]
    OffsetOutOfRange {
        node: NodeId,
        offset: usize,
        len: usize,
    },
}

pub type Result<T, E = TreeError> = std::result::Result<T, E>;
