//! Placeholder substitution over a document tree.

use crate::document::{Node, NodeKind};
use crate::variables::{Expansion, VariableBindings};
use crate::{ConfigError, ConfigResult};
use indexmap::IndexMap;
use tracing::debug;

/// Replace every placeholder in `node` with its bound value.
///
/// Returns `None` when the node itself depends on an unset variable. Mapping
/// entries and sequence elements that end up absent are removed from their
/// parent. Children are substituted before their parent and inserted values
/// are never scanned again. Mapping keys are left as written.
pub fn substitute(node: Node, bindings: &VariableBindings) -> ConfigResult<Option<Node>> {
    let Node { kind, location } = node;

    let kind = match kind {
        NodeKind::String(text) => match bindings.expand(&text) {
            Expansion::Text(text) => NodeKind::String(text),
            Expansion::Unavailable { name } => {
                debug!(variable = %name, location = %location, "Dropping value of unset variable");
                return Ok(None);
            }
            Expansion::Undeclared { name } => {
                return Err(ConfigError::UnresolvedVariable { name, location });
            }
            Expansion::Malformed { placeholder } => {
                return Err(ConfigError::InvalidPlaceholder {
                    placeholder,
                    location,
                });
            }
        },
        NodeKind::Sequence(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                if let Some(item) = substitute(item, bindings)? {
                    resolved.push(item);
                }
            }
            NodeKind::Sequence(resolved)
        }
        NodeKind::Mapping(entries) => {
            let mut resolved = IndexMap::with_capacity(entries.len());
            for (key, value) in entries {
                if let Some(value) = substitute(value, bindings)? {
                    resolved.insert(key, value);
                }
            }
            NodeKind::Mapping(resolved)
        }
        other => other,
    };

    Ok(Some(Node::new(kind, location)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_str;
    use crate::variables::VariableBindingsBuilder;
    use std::path::Path;

    fn resolve(text: &str, bindings: &VariableBindings) -> ConfigResult<Option<Node>> {
        substitute(parse_str(text, Path::new("ci.yaml")).unwrap(), bindings)
    }

    fn bindings() -> VariableBindings {
        VariableBindingsBuilder::new()
            .with_unset("WORKSPACE")
            .with_var("CT_DEVENV_HOME", "/tools/devenv")
            .build()
    }

    #[test]
    fn test_bound_value_replaced_everywhere() {
        let doc = resolve(
            "path: ${CT_DEVENV_HOME}/bin\nsteps: [\"${CT_DEVENV_HOME}/bin/tool\"]\n",
            &bindings(),
        )
        .unwrap()
        .unwrap();
        let map = doc.as_mapping().unwrap();
        assert_eq!(map["path"].as_str(), Some("/tools/devenv/bin"));
        let NodeKind::Sequence(steps) = &map["steps"].kind else {
            panic!("expected a sequence");
        };
        assert_eq!(steps[0].as_str(), Some("/tools/devenv/bin/tool"));
    }

    #[test]
    fn test_unset_variable_removes_entry() {
        let doc = resolve(
            "workspace: ${WORKSPACE}\nvolumes: [\"${WORKSPACE}:/code\", \"/tmp:/tmp\"]\nimage: alpine\n",
            &bindings(),
        )
        .unwrap()
        .unwrap();
        let map = doc.as_mapping().unwrap();
        assert!(!map.contains_key("workspace"));
        assert_eq!(map["image"].as_str(), Some("alpine"));
        let NodeKind::Sequence(volumes) = &map["volumes"].kind else {
            panic!("expected a sequence");
        };
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].as_str(), Some("/tmp:/tmp"));
    }

    #[test]
    fn test_literal_null_is_kept() {
        let doc = resolve("environment: {HOME: null}\n", &bindings())
            .unwrap()
            .unwrap();
        let env = doc.as_mapping().unwrap()["environment"].as_mapping().unwrap();
        assert!(env["HOME"].is_null());
    }

    #[test]
    fn test_undeclared_variable_fails_with_location() {
        let err = resolve("phases:\n  build:\n    x86: [\"${MISSING}\"]\n", &bindings()).unwrap_err();
        let ConfigError::UnresolvedVariable { name, location } = err else {
            panic!("expected an unresolved variable error");
        };
        assert_eq!(name, "MISSING");
        assert_eq!(location.pointer(), "phases.build.x86[0]");
    }

    #[test]
    fn test_malformed_placeholder_fails_with_location() {
        let err = resolve(
            "workspace: \"${WORK-SPACE}/x\"\nproject-name: \"${ct.home}\"\n",
            &VariableBindings::new(),
        )
        .unwrap_err();
        let ConfigError::InvalidPlaceholder {
            placeholder,
            location,
        } = err
        else {
            panic!("expected a malformed placeholder error");
        };
        assert_eq!(placeholder, "${WORK-SPACE}");
        assert_eq!(location.pointer(), "workspace");

        let err = resolve("project-name: \"${ct.home}\"\n", &bindings()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ci.yaml: project-name: malformed placeholder `${ct.home}`"
        );
    }

    #[test]
    fn test_keys_not_substituted() {
        let doc = resolve("\"${CT_DEVENV_HOME}\": value\n", &bindings())
            .unwrap()
            .unwrap();
        assert!(doc.as_mapping().unwrap().contains_key("${CT_DEVENV_HOME}"));
    }

    #[test]
    fn test_whole_document_absent() {
        assert!(resolve("${WORKSPACE}\n", &bindings()).unwrap().is_none());
    }
}
