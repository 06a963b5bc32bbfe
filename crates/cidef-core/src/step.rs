//! Step definitions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single step of a variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Step {
    pub description: Option<String>,
    /// Command to run, if any.
    pub sh: Option<Command>,
    /// Environment for the command. A `None` value passes the variable
    /// through from the executor's environment.
    pub environment: IndexMap<String, Option<String>>,
    /// Image overriding the variant's image for this step.
    pub image: Option<String>,
    /// Executor node label the variant must run on.
    pub node_label: Option<String>,
    /// Timeout in seconds.
    pub timeout: Option<u64>,
    pub run_on_change: RunOnChange,
    pub foreach: Option<ForEach>,
    /// Wait until every variant of the previous phase has finished.
    pub wait_on_full_previous_phase: bool,
    pub archive: Option<Archive>,
    /// JUnit result file patterns.
    pub junit: Vec<String>,
    pub with_credentials: Vec<Credential>,
}

impl Step {
    /// A step running a single shell command.
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            sh: Some(Command::Shell(command.into())),
            ..Default::default()
        }
    }
}

/// How a step's command is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    /// A command line interpreted by a shell.
    Shell(String),
    /// An argument vector executed directly.
    Exec(Vec<String>),
}

/// When a step runs relative to the change being built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOnChange {
    #[default]
    Always,
    Never,
    Only,
    NewVersionOnly,
}

/// Repeat a step for every commit of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForEach {
    SourceCommit,
    AutosquashedCommit,
}

/// Artifacts archived after a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Archive {
    /// Glob patterns of files to archive.
    pub artifacts: Vec<String>,
    /// Upload target.
    pub target: Option<String>,
    pub allow_missing: bool,
}

pub const DEFAULT_USERNAME_VARIABLE: &str = "USERNAME";
pub const DEFAULT_PASSWORD_VARIABLE: &str = "PASSWORD";
pub const DEFAULT_FILENAME_VARIABLE: &str = "SECRET_FILE";
pub const DEFAULT_STRING_VARIABLE: &str = "SECRET";
pub const DEFAULT_SSH_COMMAND_VARIABLE: &str = "SSH";

/// A credential bound into the step's environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub kind: CredentialKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "type")]
pub enum CredentialKind {
    UsernamePassword {
        username_variable: String,
        password_variable: String,
    },
    File {
        filename_variable: String,
    },
    String {
        string_variable: String,
    },
    SshKey {
        ssh_command_variable: String,
    },
}

impl CredentialKind {
    pub fn username_password() -> Self {
        Self::UsernamePassword {
            username_variable: DEFAULT_USERNAME_VARIABLE.to_string(),
            password_variable: DEFAULT_PASSWORD_VARIABLE.to_string(),
        }
    }

    /// Names of the environment variables this credential populates.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Self::UsernamePassword {
                username_variable,
                password_variable,
            } => vec![username_variable.as_str(), password_variable.as_str()],
            Self::File { filename_variable } => vec![filename_variable.as_str()],
            Self::String { string_variable } => vec![string_variable.as_str()],
            Self::SshKey {
                ssh_command_variable,
            } => vec![ssh_command_variable.as_str()],
        }
    }
}
