//! Printing resolved pipeline definitions.

use super::read;
use crate::{Format, Input};
use anyhow::{Context, Result, bail};
use cidef_core::PipelineConfig;
use serde_json::{Value, json};

/// Print the whole normalized definition.
pub fn show(input: &Input, format: Format) -> Result<()> {
    let config = read(input)?;
    let output = match format {
        Format::Json => serde_json::to_string_pretty(&config)?,
        Format::Yaml => serde_yaml::to_string(&config)?,
    };
    println!("{}", output.trim_end());
    Ok(())
}

/// Print one phase, or a single variant of it, as JSON.
pub fn getinfo(input: &Input, phase: &str, variant: Option<&str>) -> Result<()> {
    let config = read(input)?;
    let info = phase_info(&config, phase, variant)?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn phase_info(config: &PipelineConfig, phase: &str, variant: Option<&str>) -> Result<Value> {
    let Some(found) = config
        .phases
        .get(phase)
        .or_else(|| config.post_submit.get(phase))
    else {
        bail!("No phase named '{}'", phase);
    };

    let Some(variant) = variant else {
        return serde_json::to_value(found).context("Failed to serialize phase");
    };
    let Some(steps) = found.variants.get(variant) else {
        bail!("Phase '{}' has no variant named '{}'", phase, variant);
    };

    let node_label = steps.iter().find_map(|s| s.node_label.as_deref());
    let wait_on_full_previous_phase = steps.iter().any(|s| s.wait_on_full_previous_phase);
    let mut credential_variables: Vec<&str> = Vec::new();
    for credential in steps.iter().flat_map(|s| &s.with_credentials) {
        for name in credential.kind.variables() {
            if !credential_variables.contains(&name) {
                credential_variables.push(name);
            }
        }
    }
    Ok(json!({
        "image": config.image_for(variant),
        "node-label": node_label,
        "wait-on-full-previous-phase": wait_on_full_previous_phase,
        "credential-variables": credential_variables,
        "steps": steps,
    }))
}
