//! Reading pipeline definitions.

use crate::ConfigResult;
use crate::document::{self, Node};
use crate::embed::{EmbedResolver, ResolutionChain};
use crate::pipeline::{self, PipelineSchema};
use crate::substitute::substitute;
use crate::variables::VariableBindings;
use cidef_core::PipelineConfig;
use std::path::Path;
use tracing::info;

/// Read the pipeline definition at `path`.
///
/// Embeds are resolved first, every file seeing the same `volume_vars`.
/// Placeholders are then substituted once over the merged document, which
/// is finally validated. Nothing is kept between calls.
pub fn read(path: impl AsRef<Path>, volume_vars: &VariableBindings) -> ConfigResult<PipelineConfig> {
    let path = path.as_ref();
    let mut resolver = EmbedResolver::new(volume_vars, &PipelineSchema);
    let merged = resolver.resolve_file(path)?;
    finish(merged, volume_vars, path)
}

/// Read a pipeline definition from text. Embeds resolve relative to the
/// directory of `path`, which need not exist.
pub fn read_str(
    text: &str,
    path: impl AsRef<Path>,
    volume_vars: &VariableBindings,
) -> ConfigResult<PipelineConfig> {
    let path = path.as_ref();
    let origin = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let doc = document::parse_str(text, &origin)?;
    let mut resolver = EmbedResolver::new(volume_vars, &PipelineSchema);
    let merged = resolver.resolve(doc, &ResolutionChain::root(&origin))?;
    finish(merged, volume_vars, path)
}

fn finish(
    merged: Node,
    volume_vars: &VariableBindings,
    path: &Path,
) -> ConfigResult<PipelineConfig> {
    let location = merged.location.clone();
    let resolved = substitute(merged, volume_vars)?.unwrap_or_else(|| Node::null(location));
    let config = pipeline::validate(&resolved)?;

    info!(
        file = %path.display(),
        phases = config.phases.len(),
        steps = config.steps.len(),
        "Read pipeline configuration"
    );
    Ok(config)
}
