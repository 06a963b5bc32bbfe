//! Pipeline definition reading for cidef.
//!
//! This crate turns a YAML pipeline definition into a validated
//! [`PipelineConfig`](cidef_core::PipelineConfig):
//! - Document parsing with source locations
//! - Embedding of other documents, with cycle detection
//! - Variable substitution from caller supplied bindings
//! - Schema validation and normalization
//!
//! The entry point is [`read`].

pub mod document;
pub mod embed;
pub mod error;
pub mod merge;
pub mod pipeline;
pub mod reader;
pub mod step;
pub mod substitute;
pub mod variables;

pub use error::{ConfigError, ConfigResult, EmbedFailure};
pub use reader::{read, read_str};
pub use variables::{Binding, VariableBindings, VariableBindingsBuilder};
