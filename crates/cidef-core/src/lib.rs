//! Core pipeline model types for cidef.
//!
//! This crate contains the canonical, validated representation of a CI
//! pipeline definition:
//! - Pipeline, phase and variant structure
//! - Steps and their execution options
//! - Images, volumes and versioning
//!
//! Parsing and resolution live in `cidef-config`.

pub mod pipeline;
pub mod step;

pub use pipeline::{
    BumpPolicy, ImageConfig, Phase, PipelineConfig, VersionConfig, VersionField, VersionFormat,
    Volume,
};
pub use step::{Archive, Command, Credential, CredentialKind, ForEach, RunOnChange, Step};
