//! Untyped document tree.
//!
//! A pipeline definition is first parsed into a [`Node`] tree that keeps the
//! document's shape, key order and the location of every node. Embed
//! directives are recognized at parse time:
//!
//! - `embed: <path>` (or a sequence of paths) as a key of any mapping merges
//!   the embedded mappings into that mapping.
//! - `!embed <path>` (or `!embed {file: <path>}`) replaces the tagged node
//!   with the embedded document.

use crate::{ConfigError, ConfigResult};
use indexmap::IndexMap;
use serde_yaml::Value;
use serde_yaml::value::TaggedValue;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Mapping key holding a merge-mode embed directive.
pub const EMBED_KEY: &str = "embed";

/// YAML tag marking a replace-mode embed directive.
pub const EMBED_TAG: &str = "!embed";

/// A node of a parsed document.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Node>),
    Mapping(IndexMap<String, Node>),
    Embed(EmbedDirective),
}

/// A reference to other documents to be spliced in.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedDirective {
    pub mode: EmbedMode,
    /// Target path expressions. Each is a string node, possibly holding
    /// placeholders, or a `{file: <path>}` mapping.
    pub targets: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    /// Merge the embedded mappings into the enclosing mapping.
    Merge,
    /// Replace the directive with the embedded document.
    Replace,
}

/// Where a node was written: the file and the key path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    file: Arc<Path>,
    pointer: String,
}

impl Location {
    /// The location of a document's root node.
    pub fn root(file: &Path) -> Self {
        Self {
            file: Arc::from(file),
            pointer: String::new(),
        }
    }

    /// The location of the value stored under `key`.
    pub fn key(&self, key: &str) -> Self {
        let pointer = if self.pointer.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.pointer, key)
        };
        Self {
            file: Arc::clone(&self.file),
            pointer,
        }
    }

    /// The location of the `index`th sequence element.
    pub fn index(&self, index: usize) -> Self {
        Self {
            file: Arc::clone(&self.file),
            pointer: format!("{}[{}]", self.pointer, index),
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Key path of the node, empty for the root.
    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    /// Directory relative paths written at this location resolve against.
    pub fn base_dir(&self) -> &Path {
        self.file.parent().unwrap_or(Path::new("."))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pointer.is_empty() {
            write!(f, "{}", self.file.display())
        } else {
            write!(f, "{}: {}", self.file.display(), self.pointer)
        }
    }
}

impl Node {
    pub fn new(kind: NodeKind, location: Location) -> Self {
        Self { kind, location }
    }

    pub fn null(location: Location) -> Self {
        Self::new(NodeKind::Null, location)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, NodeKind::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, Node>> {
        match &self.kind {
            NodeKind::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Short description used in diagnostics, e.g. `a sequence`.
    pub fn describe(&self) -> String {
        match &self.kind {
            NodeKind::Null => "null".to_string(),
            NodeKind::Bool(b) => format!("boolean `{b}`"),
            NodeKind::Integer(i) => format!("integer `{i}`"),
            NodeKind::Float(x) => format!("float `{x}`"),
            NodeKind::String(s) => format!("string {s:?}"),
            NodeKind::Sequence(_) => "a sequence".to_string(),
            NodeKind::Mapping(_) => "a mapping".to_string(),
            NodeKind::Embed(_) => "an unresolved embed directive".to_string(),
        }
    }
}

/// Parse a document from disk.
pub fn parse_file(path: &Path) -> ConfigResult<Node> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(file = %path.display(), bytes = text.len(), "Parsing document");
    parse_str(&text, path)
}

/// Parse a document from YAML text. `path` is recorded as the origin of
/// every node.
pub fn parse_str(text: &str, path: &Path) -> ConfigResult<Node> {
    let root = Location::root(path);
    if is_blank(text) {
        return Ok(Node::null(root));
    }

    let mut value: Value = serde_yaml::from_str(text).map_err(|e| yaml_error(path, &e))?;
    value.apply_merge().map_err(|e| yaml_error(path, &e))?;
    convert(value, root)
}

fn convert(value: Value, location: Location) -> ConfigResult<Node> {
    let kind = match value {
        Value::Null => NodeKind::Null,
        Value::Bool(b) => NodeKind::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                NodeKind::Integer(i)
            } else if n.is_u64() {
                return Err(structure_error(&location, format!("integer {n} is out of range")));
            } else {
                NodeKind::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => NodeKind::String(s),
        Value::Sequence(items) => NodeKind::Sequence(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| convert(item, location.index(i)))
                .collect::<ConfigResult<_>>()?,
        ),
        Value::Mapping(mapping) => {
            let mut entries = IndexMap::with_capacity(mapping.len());
            for (key, value) in mapping {
                let key = mapping_key(key, &location)?;
                let child = location.key(&key);
                let node = if key == EMBED_KEY {
                    embed_directive(EmbedMode::Merge, value, child)?
                } else {
                    convert(value, child)?
                };
                entries.insert(key, node);
            }
            NodeKind::Mapping(entries)
        }
        Value::Tagged(tagged) => {
            let TaggedValue { tag, value } = *tagged;
            if tag != EMBED_TAG {
                return Err(structure_error(&location, format!("unsupported tag `{tag}`")));
            }
            return embed_directive(EmbedMode::Replace, value, location);
        }
    };
    Ok(Node::new(kind, location))
}

fn embed_directive(mode: EmbedMode, value: Value, location: Location) -> ConfigResult<Node> {
    let targets = match (mode, value) {
        (EmbedMode::Merge, Value::Sequence(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| convert(item, location.index(i)))
            .collect::<ConfigResult<_>>()?,
        (_, value) => vec![convert(value, location.clone())?],
    };
    Ok(Node::new(
        NodeKind::Embed(EmbedDirective { mode, targets }),
        location,
    ))
}

fn mapping_key(key: Value, location: &Location) -> ConfigResult<String> {
    match key {
        Value::String(s) => Ok(s),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(structure_error(location, "mapping keys must be scalars")),
    }
}

fn is_blank(text: &str) -> bool {
    text.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line == "---"
    })
}

fn yaml_error(path: &Path, error: &serde_yaml::Error) -> ConfigError {
    let location = error.location();
    ConfigError::Parse {
        path: path.to_path_buf(),
        line: location.as_ref().map(|l| l.line()),
        column: location.as_ref().map(|l| l.column()),
        message: error.to_string(),
    }
}

fn structure_error(location: &Location, message: impl fmt::Display) -> ConfigError {
    let pointer = if location.pointer().is_empty() {
        "<root>"
    } else {
        location.pointer()
    };
    ConfigError::Parse {
        path: location.file().to_path_buf(),
        line: None,
        column: None,
        message: format!("{pointer}: {message}"),
    }
}
