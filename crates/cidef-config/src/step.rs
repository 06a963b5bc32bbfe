//! Step normalization.

use crate::document::{Node, NodeKind};
use crate::pipeline::{
    boolean, check_keys, mapping, one_or_many, optional, required, schema_error, string,
    string_list,
};
use crate::{ConfigError, ConfigResult};
use cidef_core::step::{
    Archive, Command, Credential, CredentialKind, DEFAULT_FILENAME_VARIABLE,
    DEFAULT_PASSWORD_VARIABLE, DEFAULT_SSH_COMMAND_VARIABLE, DEFAULT_STRING_VARIABLE,
    DEFAULT_USERNAME_VARIABLE, ForEach, RunOnChange, Step,
};
use indexmap::IndexMap;

const STEP_KEYS: &[&str] = &[
    "description",
    "sh",
    "environment",
    "image",
    "node-label",
    "timeout",
    "run-on-change",
    "foreach",
    "wait-on-full-previous-phase",
    "archive",
    "junit",
    "with-credentials",
];

/// Parse the steps of a variant: a sequence of steps or a single step.
pub fn parse_steps(node: &Node) -> ConfigResult<Vec<Step>> {
    one_or_many(node).into_iter().map(parse_step).collect()
}

/// Parse a single step. A bare string is a shell command.
pub fn parse_step(node: &Node) -> ConfigResult<Step> {
    let entries = match &node.kind {
        NodeKind::String(command) => return Ok(Step::shell(command.clone())),
        NodeKind::Mapping(entries) => entries,
        _ => return Err(schema_error(node, "a command string or a step mapping")),
    };
    check_keys(entries, &node.location, STEP_KEYS)?;

    let mut step = Step::default();
    for (key, value) in entries {
        if value.is_null() {
            continue;
        }
        match key.as_str() {
            "description" => step.description = Some(string(value)?),
            "sh" => step.sh = Some(parse_command(value)?),
            "environment" => step.environment = parse_environment(value)?,
            "image" => step.image = Some(string(value)?),
            "node-label" => step.node_label = Some(string(value)?),
            "timeout" => step.timeout = Some(parse_timeout(value)?),
            "run-on-change" => {
                step.run_on_change = match string(value)?.as_str() {
                    "always" => RunOnChange::Always,
                    "never" => RunOnChange::Never,
                    "only" => RunOnChange::Only,
                    "new-version-only" => RunOnChange::NewVersionOnly,
                    _ => {
                        return Err(schema_error(
                            value,
                            "`always`, `never`, `only` or `new-version-only`",
                        ));
                    }
                };
            }
            "foreach" => {
                step.foreach = Some(match string(value)?.as_str() {
                    "SOURCE_COMMIT" => ForEach::SourceCommit,
                    "AUTOSQUASHED_COMMIT" => ForEach::AutosquashedCommit,
                    _ => {
                        return Err(schema_error(
                            value,
                            "`SOURCE_COMMIT` or `AUTOSQUASHED_COMMIT`",
                        ));
                    }
                });
            }
            "wait-on-full-previous-phase" => step.wait_on_full_previous_phase = boolean(value)?,
            "archive" => step.archive = Some(parse_archive(value)?),
            "junit" => step.junit = string_list(value)?,
            "with-credentials" => {
                step.with_credentials = one_or_many(value)
                    .into_iter()
                    .map(parse_credential)
                    .collect::<ConfigResult<_>>()?;
            }
            _ => unreachable!("key checked against STEP_KEYS"),
        }
    }
    Ok(step)
}

fn parse_command(node: &Node) -> ConfigResult<Command> {
    match &node.kind {
        NodeKind::String(line) => Ok(Command::Shell(line.clone())),
        NodeKind::Sequence(_) => Ok(Command::Exec(string_list(node)?)),
        _ => Err(schema_error(node, "a command line or an argument sequence")),
    }
}

fn parse_environment(node: &Node) -> ConfigResult<IndexMap<String, Option<String>>> {
    let mut environment = IndexMap::new();
    for (name, value) in mapping(node, "a mapping of environment variables")? {
        let value = match &value.kind {
            NodeKind::Null => None,
            NodeKind::String(s) => Some(s.clone()),
            NodeKind::Integer(i) => Some(i.to_string()),
            NodeKind::Float(x) => Some(x.to_string()),
            NodeKind::Bool(b) => Some(b.to_string()),
            _ => return Err(schema_error(value, "a scalar environment value or null")),
        };
        environment.insert(name.clone(), value);
    }
    Ok(environment)
}

fn parse_timeout(node: &Node) -> ConfigResult<u64> {
    match node.kind {
        NodeKind::Integer(seconds) if seconds > 0 => Ok(seconds as u64),
        _ => Err(schema_error(node, "a positive number of seconds")),
    }
}

fn parse_archive(node: &Node) -> ConfigResult<Archive> {
    let Some(entries) = node.as_mapping() else {
        return Ok(Archive {
            artifacts: string_list(node)?,
            ..Default::default()
        });
    };
    check_keys(entries, &node.location, &["artifacts", "target", "allow-missing"])?;

    let artifacts = string_list(required(entries, &node.location, "artifacts")?)?;
    if artifacts.is_empty() {
        return Err(ConfigError::schema(
            &node.location.key("artifacts"),
            "at least one artifact pattern",
            "an empty sequence",
        ));
    }
    Ok(Archive {
        artifacts,
        target: optional(entries, "target").map(string).transpose()?,
        allow_missing: optional(entries, "allow-missing")
            .map(boolean)
            .transpose()?
            .unwrap_or(false),
    })
}

fn parse_credential(node: &Node) -> ConfigResult<Credential> {
    let entries = match &node.kind {
        NodeKind::String(id) => {
            return Ok(Credential {
                id: id.clone(),
                kind: CredentialKind::username_password(),
            });
        }
        NodeKind::Mapping(entries) => entries,
        _ => return Err(schema_error(node, "a credential id or mapping")),
    };

    let id = string(required(entries, &node.location, "id")?)?;
    let kind = optional(entries, "type")
        .map(string)
        .transpose()?
        .unwrap_or_else(|| "username-password".to_string());

    let variable = |key: &str, default: &str| -> ConfigResult<String> {
        Ok(optional(entries, key)
            .map(string)
            .transpose()?
            .unwrap_or_else(|| default.to_string()))
    };

    let kind = match kind.as_str() {
        "username-password" => {
            check_keys(
                entries,
                &node.location,
                &["id", "type", "username-variable", "password-variable"],
            )?;
            CredentialKind::UsernamePassword {
                username_variable: variable("username-variable", DEFAULT_USERNAME_VARIABLE)?,
                password_variable: variable("password-variable", DEFAULT_PASSWORD_VARIABLE)?,
            }
        }
        "file" => {
            check_keys(entries, &node.location, &["id", "type", "filename-variable"])?;
            CredentialKind::File {
                filename_variable: variable("filename-variable", DEFAULT_FILENAME_VARIABLE)?,
            }
        }
        "string" => {
            check_keys(entries, &node.location, &["id", "type", "string-variable"])?;
            CredentialKind::String {
                string_variable: variable("string-variable", DEFAULT_STRING_VARIABLE)?,
            }
        }
        "ssh-key" => {
            check_keys(entries, &node.location, &["id", "type", "ssh-command-variable"])?;
            CredentialKind::SshKey {
                ssh_command_variable: variable(
                    "ssh-command-variable",
                    DEFAULT_SSH_COMMAND_VARIABLE,
                )?,
            }
        }
        other => {
            return Err(ConfigError::schema(
                &node.location.key("type"),
                "`username-password`, `file`, `string` or `ssh-key`",
                format!("{other:?}"),
            ));
        }
    };

    Ok(Credential { id, kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_str;
    use std::path::Path;

    fn step(text: &str) -> ConfigResult<Step> {
        parse_step(&parse_str(text, Path::new("ci.yaml")).unwrap())
    }

    #[test]
    fn test_string_shorthand() {
        assert_eq!(step("make all\n").unwrap(), Step::shell("make all"));
    }

    #[test]
    fn test_full_step() {
        let step = step(
            r#"
            description: Package
            sh: [tar, czf, dist.tar.gz, build]
            environment:
              LANG: C.UTF-8
              JOBS: 4
              HOME: null
            node-label: linux && docker
            timeout: 600
            run-on-change: only
            foreach: SOURCE_COMMIT
            archive:
              artifacts: [dist.tar.gz]
              allow-missing: true
            junit: test-results.xml
            "#,
        )
        .unwrap();

        assert_eq!(step.description.as_deref(), Some("Package"));
        assert!(matches!(step.sh, Some(Command::Exec(ref argv)) if argv.len() == 4));
        assert_eq!(step.environment["LANG"].as_deref(), Some("C.UTF-8"));
        assert_eq!(step.environment["JOBS"].as_deref(), Some("4"));
        assert_eq!(step.environment["HOME"], None);
        assert_eq!(step.node_label.as_deref(), Some("linux && docker"));
        assert_eq!(step.timeout, Some(600));
        assert_eq!(step.run_on_change, RunOnChange::Only);
        assert_eq!(step.foreach, Some(ForEach::SourceCommit));
        let archive = step.archive.unwrap();
        assert_eq!(archive.artifacts, vec!["dist.tar.gz"]);
        assert!(archive.allow_missing);
        assert_eq!(step.junit, vec!["test-results.xml"]);
    }

    #[test]
    fn test_archive_shorthand() {
        let step = step("archive: build/*.whl\n").unwrap();
        assert_eq!(step.archive.unwrap().artifacts, vec!["build/*.whl"]);
    }

    #[test]
    fn test_archive_requires_artifacts() {
        let err = step("archive: {target: releases}\n").unwrap_err();
        let ConfigError::Schema { location, .. } = err else {
            panic!("expected a schema error");
        };
        assert_eq!(location.pointer(), "archive.artifacts");
    }

    #[test]
    fn test_credentials() {
        let step = step(
            r#"
            with-credentials:
              - artifactory
              - id: signing-key
                type: file
              - id: deploy
                type: ssh-key
                ssh-command-variable: GIT_SSH
            "#,
        )
        .unwrap();

        let creds = &step.with_credentials;
        assert_eq!(creds[0].id, "artifactory");
        assert_eq!(creds[0].kind, CredentialKind::username_password());
        assert_eq!(
            creds[1].kind,
            CredentialKind::File {
                filename_variable: DEFAULT_FILENAME_VARIABLE.to_string()
            }
        );
        assert_eq!(
            creds[2].kind,
            CredentialKind::SshKey {
                ssh_command_variable: "GIT_SSH".to_string()
            }
        );
    }

    #[test]
    fn test_credential_keys_depend_on_type() {
        let err = step("with-credentials: {id: x, type: file, username-variable: U}\n").unwrap_err();
        assert!(err.to_string().contains("unknown key `username-variable`"));
    }

    #[test]
    fn test_unknown_step_key() {
        let err = step("sh: make\nshell: bash\n").unwrap_err();
        assert!(matches!(err, ConfigError::Schema { .. }));
    }

    #[test]
    fn test_invalid_timeout() {
        assert!(step("timeout: 0\n").is_err());
        assert!(step("timeout: soon\n").is_err());
    }

    #[test]
    fn test_invalid_run_on_change() {
        let err = step("run-on-change: sometimes\n").unwrap_err();
        assert!(err.to_string().contains("`always`"));
    }

    #[test]
    fn test_single_step_variant() {
        let steps = parse_steps(&parse_str("sh: make\n", Path::new("ci.yaml")).unwrap()).unwrap();
        assert_eq!(steps, vec![Step::shell("make")]);
    }
}
