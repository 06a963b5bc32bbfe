//! Pipeline definitions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::step::Step;

/// A fully resolved and validated CI pipeline definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Human readable project name.
    pub project_name: Option<String>,
    /// Workspace directory the pipeline runs in, if known.
    pub workspace: Option<String>,
    /// Container images to run steps in.
    pub image: ImageConfig,
    /// Volumes mounted into every container.
    pub volumes: Vec<Volume>,
    /// Environment variables forwarded from the executor into containers.
    pub pass_through_environment_vars: Vec<String>,
    /// Commands that clean the workspace before a build.
    pub clean: Vec<String>,
    /// Versioning scheme.
    pub version: Option<VersionConfig>,
    /// Steps of a flat, single-phase pipeline.
    pub steps: Vec<Step>,
    /// Ordered build phases.
    pub phases: IndexMap<String, Phase>,
    /// Ordered phases executed after a change has been submitted.
    pub post_submit: IndexMap<String, Phase>,
}

impl PipelineConfig {
    /// Look up a variant in `phases`, falling back to `post-submit`.
    pub fn variant(&self, phase: &str, variant: &str) -> Option<&[Step]> {
        self.phases
            .get(phase)
            .or_else(|| self.post_submit.get(phase))
            .and_then(|p| p.variants.get(variant))
            .map(Vec::as_slice)
    }

    /// Names of every variant defined in any phase, in first-seen order.
    pub fn variant_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for phase in self.phases.values().chain(self.post_submit.values()) {
            for name in phase.variants.keys() {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Image for a variant: the variant-specific one, else the default.
    pub fn image_for(&self, variant: &str) -> Option<&str> {
        self.image
            .variants
            .get(variant)
            .or(self.image.default.as_ref())
            .map(String::as_str)
    }
}

/// A phase groups variants that may run in parallel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Variant name to its ordered steps.
    pub variants: IndexMap<String, Vec<Step>>,
}

/// Container image selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Image used when a variant has no specific one.
    pub default: Option<String>,
    /// Variant-specific images.
    pub variants: IndexMap<String, String>,
}

/// A volume mounted into the build container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Volume {
    /// Host path. `None` for an anonymous volume.
    pub source: Option<PathBuf>,
    /// Absolute path inside the container.
    pub target: String,
    pub read_only: bool,
}

/// Versioning configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionConfig {
    pub format: VersionFormat,
    /// Tag format to apply on release, `None` when tagging is disabled.
    pub tag: Option<String>,
    /// File the version is read from and written to.
    pub file: Option<String>,
    pub bump: BumpPolicy,
}

/// Default tag format used when `tag: true` is given.
pub const DEFAULT_TAG_FORMAT: &str = "{version}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionFormat {
    #[default]
    Semver,
    Carver,
}

/// How the version is bumped on submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "policy")]
pub enum BumpPolicy {
    Disabled,
    /// Always bump the same field.
    Constant { field: VersionField },
    /// Derive the bump from conventional commit messages.
    ConventionalCommits { strict: bool },
}

impl Default for BumpPolicy {
    fn default() -> Self {
        Self::Constant {
            field: VersionField::Patch,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionField {
    Major,
    Minor,
    #[default]
    Patch,
}
