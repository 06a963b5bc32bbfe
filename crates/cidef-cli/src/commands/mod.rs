//! CLI command implementations.

pub mod show;

use crate::Input;
use anyhow::{Context, Result};
use cidef_config::{VariableBindings, VariableBindingsBuilder};
use cidef_core::PipelineConfig;

/// Bindings for a read. `WORKSPACE` is always declared so definitions may
/// refer to it; `--var` and `--unset` apply on top, in that order.
fn bindings(input: &Input) -> VariableBindings {
    let mut builder = VariableBindingsBuilder::new();
    builder = match &input.workspace {
        Some(workspace) => builder.with_var("WORKSPACE", workspace.as_str()),
        None => builder.with_unset("WORKSPACE"),
    };
    for (name, value) in &input.vars {
        builder = builder.with_var(name.as_str(), value.as_str());
    }
    for name in &input.unset {
        builder = builder.with_unset(name.as_str());
    }
    builder.build()
}

fn read(input: &Input) -> Result<PipelineConfig> {
    cidef_config::read(&input.path, &bindings(input))
        .with_context(|| format!("Failed to read pipeline definition: {}", input.path.display()))
}

pub fn check(input: &Input) -> Result<()> {
    let config = read(input)?;
    let phases = config.phases.len() + config.post_submit.len();
    if phases == 0 {
        println!("Configuration is valid ({} steps)", config.steps.len());
    } else {
        println!(
            "Configuration is valid ({} phases, {} variants)",
            phases,
            config.variant_names().len()
        );
    }
    Ok(())
}
