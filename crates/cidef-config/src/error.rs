//! Configuration reading errors.

use crate::document::Location;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}: parse error{}: {message}", path.display(), position(*line, *column))]
    Parse {
        path: PathBuf,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error("{location}: unresolved variable `{name}`")]
    UnresolvedVariable { name: String, location: Location },

    #[error("{location}: malformed placeholder `{placeholder}`")]
    InvalidPlaceholder {
        placeholder: String,
        location: Location,
    },

    #[error("{location}: cannot embed {}: {reason}", path.display())]
    Embed {
        path: PathBuf,
        location: Location,
        reason: EmbedFailure,
    },

    #[error("{location}: expected {expected}, found {found}")]
    Schema {
        location: Location,
        expected: String,
        found: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why an embed directive could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbedFailure {
    #[error("file not found")]
    NotFound,

    #[error("embed cycle {}", format_chain(.0))]
    Cycle(Vec<PathBuf>),

    #[error("{0}")]
    InvalidTarget(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl ConfigError {
    pub(crate) fn schema(
        location: &Location,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::Schema {
            location: location.clone(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn embed(path: impl Into<PathBuf>, location: &Location, reason: EmbedFailure) -> Self {
        Self::Embed {
            path: path.into(),
            location: location.clone(),
            reason,
        }
    }

    /// The file the error was detected in.
    pub fn file(&self) -> &Path {
        match self {
            Self::Parse { path, .. } | Self::Io { path, .. } => path,
            Self::UnresolvedVariable { location, .. }
            | Self::InvalidPlaceholder { location, .. }
            | Self::Embed { location, .. }
            | Self::Schema { location, .. } => location.file(),
        }
    }
}

fn position(line: Option<usize>, column: Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!(" at line {line} column {column}"),
        (Some(line), None) => format!(" at line {line}"),
        _ => String::new(),
    }
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
