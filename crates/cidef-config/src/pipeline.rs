//! Pipeline schema validation and normalization.

use crate::document::{Location, Node, NodeKind};
use crate::merge::{MergePolicy, SequenceMerge};
use crate::step::parse_steps;
use crate::{ConfigError, ConfigResult};
use cidef_core::pipeline::{
    BumpPolicy, DEFAULT_TAG_FORMAT, ImageConfig, Phase, PipelineConfig, VersionConfig,
    VersionField, VersionFormat, Volume,
};
use indexmap::IndexMap;
use std::path::PathBuf;

const PHASES: &str = "phases";
const POST_SUBMIT: &str = "post-submit";
const STEPS: &str = "steps";

const TOP_LEVEL_KEYS: &[&str] = &[
    "project-name",
    "workspace",
    "image",
    "volumes",
    "pass-through-environment-vars",
    "clean",
    "version",
    STEPS,
    PHASES,
    POST_SUBMIT,
];

/// Merge rules of the pipeline schema: the step list of a variant and the
/// argument vector of a step command are replaced as a whole, every other
/// sequence is concatenated.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineSchema;

impl MergePolicy for PipelineSchema {
    fn sequence_merge(&self, path: &[String]) -> SequenceMerge {
        match path {
            [section, _phase, _variant] if section == PHASES || section == POST_SUBMIT => {
                SequenceMerge::Override
            }
            [.., key] if key == "sh" => SequenceMerge::Override,
            _ => SequenceMerge::Concatenate,
        }
    }
}

/// Validate a resolved document and normalize it into a pipeline model.
pub fn validate(doc: &Node) -> ConfigResult<PipelineConfig> {
    let mut config = PipelineConfig::default();
    if doc.is_null() {
        return Ok(config);
    }

    let root = mapping(doc, "a pipeline definition mapping")?;
    check_keys(root, &doc.location, TOP_LEVEL_KEYS)?;

    for (key, node) in root {
        if node.is_null() {
            continue;
        }
        match key.as_str() {
            "project-name" => config.project_name = Some(string(node)?),
            "workspace" => config.workspace = Some(string(node)?),
            "image" => config.image = parse_image(node)?,
            "volumes" => config.volumes = parse_volumes(node)?,
            "pass-through-environment-vars" => {
                config.pass_through_environment_vars = string_list(node)?;
            }
            "clean" => config.clean = string_list(node)?,
            "version" => config.version = Some(parse_version(node)?),
            STEPS => config.steps = parse_steps(node)?,
            PHASES => config.phases = parse_phases(node)?,
            POST_SUBMIT => config.post_submit = parse_phases(node)?,
            _ => unreachable!("key checked against TOP_LEVEL_KEYS"),
        }
    }

    if !config.steps.is_empty() && !config.phases.is_empty() {
        return Err(ConfigError::schema(
            &doc.location.key(STEPS),
            format!("either `{STEPS}` or `{PHASES}`"),
            "both",
        ));
    }

    check_references(&config, root)?;
    Ok(config)
}

fn parse_phases(node: &Node) -> ConfigResult<IndexMap<String, Phase>> {
    let mut phases = IndexMap::new();
    for (name, phase_node) in mapping(node, "a mapping of phase names to variants")? {
        let mut phase = Phase::default();
        for (variant, steps) in mapping(phase_node, "a mapping of variant names to steps")? {
            phase.variants.insert(variant.clone(), parse_steps(steps)?);
        }
        phases.insert(name.clone(), phase);
    }
    Ok(phases)
}

fn parse_image(node: &Node) -> ConfigResult<ImageConfig> {
    let mut image = ImageConfig::default();
    match &node.kind {
        NodeKind::String(name) => image.default = Some(name.clone()),
        NodeKind::Mapping(entries) => {
            for (variant, name) in entries {
                if name.is_null() {
                    continue;
                }
                let name = string(name)?;
                if variant == "default" {
                    image.default = Some(name);
                } else {
                    image.variants.insert(variant.clone(), name);
                }
            }
        }
        _ => {
            return Err(schema_error(
                node,
                "an image name or a mapping of variant names to images",
            ));
        }
    }
    Ok(image)
}

fn parse_volumes(node: &Node) -> ConfigResult<Vec<Volume>> {
    one_or_many(node).into_iter().map(parse_volume).collect()
}

fn parse_volume(node: &Node) -> ConfigResult<Volume> {
    let (source, target, read_only) = match &node.kind {
        NodeKind::String(spec) => {
            let (rest, read_only) = match spec.rsplit_once(':') {
                Some((rest, "ro")) => (rest, true),
                Some((rest, "rw")) => (rest, false),
                _ => (spec.as_str(), false),
            };
            match rest.split_once(':') {
                None => (None, rest.to_string(), read_only),
                Some((source, target)) if !target.contains(':') => {
                    (Some(source.to_string()), target.to_string(), read_only)
                }
                Some(_) => {
                    return Err(schema_error(node, "a volume `[source:]target[:ro|rw]`"));
                }
            }
        }
        NodeKind::Mapping(entries) => {
            check_keys(entries, &node.location, &["source", "target", "read-only"])?;
            let target = required(entries, &node.location, "target")?;
            let source = optional(entries, "source").map(string).transpose()?;
            let read_only = optional(entries, "read-only")
                .map(boolean)
                .transpose()?
                .unwrap_or(false);
            (source, string(target)?, read_only)
        }
        _ => return Err(schema_error(node, "a volume string or mapping")),
    };

    if !target.starts_with('/') {
        return Err(ConfigError::schema(
            &node.location,
            "an absolute volume target",
            format!("{target:?}"),
        ));
    }

    let source = source.map(|s| {
        let path = PathBuf::from(&s);
        if path.is_relative() {
            node.location.base_dir().join(path)
        } else {
            path
        }
    });

    Ok(Volume {
        source,
        target,
        read_only,
    })
}

fn parse_version(node: &Node) -> ConfigResult<VersionConfig> {
    let entries = mapping(node, "a version mapping")?;
    check_keys(entries, &node.location, &["format", "tag", "file", "bump"])?;

    let format = match optional(entries, "format") {
        None => VersionFormat::default(),
        Some(format) => match string(format)?.as_str() {
            "semver" => VersionFormat::Semver,
            "carver" => VersionFormat::Carver,
            _ => return Err(schema_error(format, "`semver` or `carver`")),
        },
    };

    let tag = match optional(entries, "tag") {
        None => None,
        Some(tag) => match &tag.kind {
            NodeKind::Bool(false) => None,
            NodeKind::Bool(true) => Some(DEFAULT_TAG_FORMAT.to_string()),
            NodeKind::String(format) => Some(format.clone()),
            _ => return Err(schema_error(tag, "a boolean or a tag format string")),
        },
    };

    let file = optional(entries, "file").map(string).transpose()?;
    let bump = optional(entries, "bump")
        .map(parse_bump)
        .transpose()?
        .unwrap_or_default();

    Ok(VersionConfig {
        format,
        tag,
        file,
        bump,
    })
}

fn parse_bump(node: &Node) -> ConfigResult<BumpPolicy> {
    match &node.kind {
        NodeKind::Bool(false) => Ok(BumpPolicy::Disabled),
        NodeKind::String(policy) => bump_policy(node, policy, VersionField::default(), false),
        NodeKind::Mapping(entries) => {
            check_keys(entries, &node.location, &["policy", "field", "strict"])?;
            let policy = optional(entries, "policy")
                .map(string)
                .transpose()?
                .unwrap_or_else(|| "constant".to_string());
            let field = match optional(entries, "field") {
                None => VersionField::default(),
                Some(field) => match string(field)?.as_str() {
                    "major" => VersionField::Major,
                    "minor" => VersionField::Minor,
                    "patch" => VersionField::Patch,
                    _ => return Err(schema_error(field, "`major`, `minor` or `patch`")),
                },
            };
            let strict = optional(entries, "strict")
                .map(boolean)
                .transpose()?
                .unwrap_or(false);
            bump_policy(node, &policy, field, strict)
        }
        _ => Err(schema_error(node, "`false`, a bump policy name or mapping")),
    }
}

fn bump_policy(
    node: &Node,
    policy: &str,
    field: VersionField,
    strict: bool,
) -> ConfigResult<BumpPolicy> {
    match policy {
        "disabled" => Ok(BumpPolicy::Disabled),
        "constant" => Ok(BumpPolicy::Constant { field }),
        "conventional-commits" => Ok(BumpPolicy::ConventionalCommits { strict }),
        _ => Err(ConfigError::schema(
            &node.location,
            "`constant`, `conventional-commits` or `disabled`",
            format!("{policy:?}"),
        )),
    }
}

/// Reject references to things the pipeline does not define.
fn check_references(config: &PipelineConfig, root: &IndexMap<String, Node>) -> ConfigResult<()> {
    let variants = config.variant_names();
    if let Some(image) = root.get("image") {
        for variant in config.image.variants.keys() {
            if !variants.contains(&variant.as_str()) {
                return Err(ConfigError::schema(
                    &image.location.key(variant),
                    format!("a variant defined in `{PHASES}` or `{POST_SUBMIT}`"),
                    format!("undefined variant `{variant}`"),
                ));
            }
        }
    }

    if let Some(index) = config.steps.iter().position(|s| s.wait_on_full_previous_phase) {
        if let Some(steps) = root.get(STEPS) {
            return Err(wait_without_phase(steps.location.index(index), STEPS));
        }
    }

    let first_phase = [PHASES, POST_SUBMIT].into_iter().find_map(|section| {
        let phases = if section == PHASES {
            &config.phases
        } else {
            &config.post_submit
        };
        let node = root.get(section)?;
        phases.first().map(|(name, phase)| (node, name, phase))
    });
    if let Some((node, name, phase)) = first_phase {
        for (variant, steps) in &phase.variants {
            if let Some(index) = steps.iter().position(|s| s.wait_on_full_previous_phase) {
                let location = node.location.key(name).key(variant).index(index);
                return Err(wait_without_phase(location, &format!("first phase `{name}`")));
            }
        }
    }
    Ok(())
}

fn wait_without_phase(location: Location, context: &str) -> ConfigError {
    ConfigError::schema(
        &location,
        "a preceding phase to wait on",
        format!("`wait-on-full-previous-phase` in {context}"),
    )
}

// Helper functions for extracting values from nodes

pub(crate) fn schema_error(node: &Node, expected: impl Into<String>) -> ConfigError {
    ConfigError::schema(&node.location, expected, node.describe())
}

pub(crate) fn mapping<'n>(
    node: &'n Node,
    expected: &str,
) -> ConfigResult<&'n IndexMap<String, Node>> {
    node.as_mapping().ok_or_else(|| schema_error(node, expected))
}

pub(crate) fn string(node: &Node) -> ConfigResult<String> {
    node.as_str()
        .map(str::to_string)
        .ok_or_else(|| schema_error(node, "a string"))
}

pub(crate) fn boolean(node: &Node) -> ConfigResult<bool> {
    match node.kind {
        NodeKind::Bool(b) => Ok(b),
        _ => Err(schema_error(node, "a boolean")),
    }
}

/// A sequence, or a single item standing for a one-element sequence.
pub(crate) fn one_or_many(node: &Node) -> Vec<&Node> {
    match &node.kind {
        NodeKind::Sequence(items) => items.iter().collect(),
        NodeKind::Null => Vec::new(),
        _ => vec![node],
    }
}

pub(crate) fn string_list(node: &Node) -> ConfigResult<Vec<String>> {
    one_or_many(node).into_iter().map(string).collect()
}

/// A present, non-null entry.
pub(crate) fn optional<'n>(entries: &'n IndexMap<String, Node>, key: &str) -> Option<&'n Node> {
    entries.get(key).filter(|n| !n.is_null())
}

pub(crate) fn required<'n>(
    entries: &'n IndexMap<String, Node>,
    location: &Location,
    key: &str,
) -> ConfigResult<&'n Node> {
    optional(entries, key)
        .ok_or_else(|| ConfigError::schema(&location.key(key), format!("required `{key}`"), "nothing"))
}

pub(crate) fn check_keys(
    entries: &IndexMap<String, Node>,
    location: &Location,
    allowed: &[&str],
) -> ConfigResult<()> {
    match entries.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(unknown) => Err(ConfigError::schema(
            &location.key(unknown),
            format!(
                "one of {}",
                allowed
                    .iter()
                    .map(|k| format!("`{k}`"))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            format!("unknown key `{unknown}`"),
        )),
        None => Ok(()),
    }
}
