//! Merging of embedded documents.

use crate::document::{Node, NodeKind};

/// How two sequences found at the same path combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceMerge {
    /// Lower precedence elements first, then higher precedence ones.
    Concatenate,
    /// The higher precedence sequence replaces the lower one.
    Override,
}

/// Schema knowledge the merge needs.
pub trait MergePolicy {
    /// Policy for the sequence stored at `path` (mapping keys from the
    /// document root; sequence indices are not part of the path).
    fn sequence_merge(&self, path: &[String]) -> SequenceMerge;
}

/// Concatenates every sequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatenateAll;

impl MergePolicy for ConcatenateAll {
    fn sequence_merge(&self, _path: &[String]) -> SequenceMerge {
        SequenceMerge::Concatenate
    }
}

/// Merge `higher` on top of `lower`.
///
/// Mappings merge recursively and keys keep the position of their first
/// appearance. Sequences follow `policy`. Any other combination resolves to
/// `higher`.
pub fn merge(lower: Node, higher: Node, path: &mut Vec<String>, policy: &dyn MergePolicy) -> Node {
    match (lower.kind, higher.kind) {
        (NodeKind::Mapping(mut merged), NodeKind::Mapping(entries)) => {
            for (key, value) in entries {
                match merged.get_mut(&key) {
                    Some(slot) => {
                        let existing = std::mem::replace(slot, Node::null(value.location.clone()));
                        path.push(key);
                        *slot = merge(existing, value, path, policy);
                        path.pop();
                    }
                    None => {
                        merged.insert(key, value);
                    }
                }
            }
            Node::new(NodeKind::Mapping(merged), higher.location)
        }
        (NodeKind::Sequence(mut items), NodeKind::Sequence(more)) => {
            match policy.sequence_merge(path) {
                SequenceMerge::Concatenate => {
                    items.extend(more);
                }
                SequenceMerge::Override => items = more,
            }
            Node::new(NodeKind::Sequence(items), higher.location)
        }
        (_, kind) => Node::new(kind, higher.location),
    }
}
