//! Variable bindings for pipeline definitions.
//!
//! Placeholders are written `${NAME}`. `$${NAME}` produces the literal text
//! `${NAME}`, and shell style `$NAME` is left alone so that commands keep
//! their own variable references. Any other unescaped `${` is an error.
//!
//! A binding is either a value or explicitly unset. An unset binding means
//! "known but not available": anything depending on it is dropped from the
//! document. Referencing a name with no binding at all is an error.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;

// Regex for matching `${...}` placeholders, with an optional escaping `$`.
// The closing brace is optional so unterminated placeholders are caught too.
static VAR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\$)?\{([^{}]*)(\})?").unwrap());

// Regex for valid variable names.
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Caller supplied variable bindings, immutable during one read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableBindings {
    vars: BTreeMap<String, Option<String>>,
}

/// The state of a variable name in a set of bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding<'a> {
    Value(&'a str),
    Unset,
    Undeclared,
}

/// Result of expanding the placeholders in a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expansion {
    /// Every placeholder had a value.
    Text(String),
    /// A placeholder refers to an unset variable; the text is unavailable.
    Unavailable { name: String },
    /// A placeholder refers to a variable without any binding.
    Undeclared { name: String },
    /// `${` that does not start a well-formed placeholder.
    Malformed { placeholder: String },
}

impl VariableBindings {
    /// Create an empty set of bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a variable to a value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), Some(value.into()));
    }

    /// Declare a variable whose value is not available.
    pub fn unset(&mut self, name: impl Into<String>) {
        self.vars.insert(name.into(), None);
    }

    pub fn get(&self, name: &str) -> Binding<'_> {
        match self.vars.get(name) {
            Some(Some(value)) => Binding::Value(value),
            Some(None) => Binding::Unset,
            None => Binding::Undeclared,
        }
    }

    /// Expand all placeholders in `input`.
    ///
    /// Malformed and undeclared placeholders take precedence over unset
    /// ones, and the first of them in text order is reported.
    pub fn expand(&self, input: &str) -> Expansion {
        let mut unavailable = None;
        for caps in VAR_REGEX.captures_iter(input) {
            if caps.get(1).is_some() {
                continue;
            }
            let name = &caps[2];
            if caps.get(3).is_none() || !NAME_REGEX.is_match(name) {
                return Expansion::Malformed {
                    placeholder: caps[0].to_string(),
                };
            }
            match self.get(name) {
                Binding::Undeclared => {
                    return Expansion::Undeclared {
                        name: name.to_string(),
                    };
                }
                Binding::Unset if unavailable.is_none() => unavailable = Some(name.to_string()),
                _ => {}
            }
        }
        if let Some(name) = unavailable {
            return Expansion::Unavailable { name };
        }

        let text = VAR_REGEX
            .replace_all(input, |caps: &Captures| {
                // An escape drops its leading `$` and keeps the rest verbatim.
                if caps.get(1).is_some() {
                    return caps[0][1..].to_string();
                }
                match self.get(&caps[2]) {
                    Binding::Value(value) => value.to_string(),
                    Binding::Unset | Binding::Undeclared => String::new(),
                }
            })
            .into_owned();
        Expansion::Text(text)
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for VariableBindings
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.map(Into::into)))
                .collect(),
        }
    }
}

/// Builder for creating VariableBindings.
pub struct VariableBindingsBuilder {
    bindings: VariableBindings,
}

impl VariableBindingsBuilder {
    pub fn new() -> Self {
        Self {
            bindings: VariableBindings::new(),
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.set(name, value);
        self
    }

    pub fn with_unset(mut self, name: impl Into<String>) -> Self {
        self.bindings.unset(name);
        self
    }

    pub fn build(self) -> VariableBindings {
        self.bindings
    }
}

impl Default for VariableBindingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devenv() -> VariableBindings {
        VariableBindingsBuilder::new()
            .with_unset("WORKSPACE")
            .with_var("CT_DEVENV_HOME", "/tools/devenv")
            .build()
    }

    #[test]
    fn test_basic_expansion() {
        let result = devenv().expand("${CT_DEVENV_HOME}/bin");
        assert_eq!(result, Expansion::Text("/tools/devenv/bin".to_string()));
    }

    #[test]
    fn test_multiple_occurrences() {
        let result = devenv().expand("${CT_DEVENV_HOME}:${CT_DEVENV_HOME}/lib");
        assert_eq!(
            result,
            Expansion::Text("/tools/devenv:/tools/devenv/lib".to_string())
        );
    }

    #[test]
    fn test_unset_variable_is_unavailable() {
        let result = devenv().expand("${WORKSPACE}:/code:rw");
        assert_eq!(
            result,
            Expansion::Unavailable {
                name: "WORKSPACE".to_string()
            }
        );
    }

    #[test]
    fn test_undeclared_wins_over_unset() {
        let result = devenv().expand("${WORKSPACE}/${HOME}");
        assert_eq!(
            result,
            Expansion::Undeclared {
                name: "HOME".to_string()
            }
        );
    }

    #[test]
    fn test_escaped_placeholder_is_literal() {
        let result = VariableBindings::new().expand("echo $${NOT_A_VAR}");
        assert_eq!(result, Expansion::Text("echo ${NOT_A_VAR}".to_string()));
    }

    #[test]
    fn test_shell_variables_untouched() {
        let result = VariableBindings::new().expand("echo $HOME $1 $");
        assert_eq!(result, Expansion::Text("echo $HOME $1 $".to_string()));
    }

    #[test]
    fn test_malformed_placeholders() {
        let bindings = devenv();
        for (input, placeholder) in [
            ("${WORK-SPACE}/x", "${WORK-SPACE}"),
            ("${a.b}", "${a.b}"),
            ("prefix ${}", "${}"),
            ("${CT_DEVENV_HOME", "${CT_DEVENV_HOME"),
            ("${WORKSPACE}/${1ST}", "${1ST}"),
        ] {
            assert_eq!(
                bindings.expand(input),
                Expansion::Malformed {
                    placeholder: placeholder.to_string()
                },
                "{input}"
            );
        }
    }

    #[test]
    fn test_escaped_malformed_placeholder_is_literal() {
        let result = VariableBindings::new().expand("$${a.b}");
        assert_eq!(result, Expansion::Text("${a.b}".to_string()));
    }

    #[test]
    fn test_substituted_value_not_rescanned() {
        let bindings = VariableBindingsBuilder::new()
            .with_var("OUTER", "${INNER}")
            .build();
        assert_eq!(
            bindings.expand("${OUTER}"),
            Expansion::Text("${INNER}".to_string())
        );
    }

    #[test]
    fn test_from_iterator() {
        let bindings: VariableBindings =
            [("WORKSPACE", None), ("CT_DEVENV_HOME", Some("/tools/devenv"))]
                .into_iter()
                .collect();
        assert_eq!(bindings, devenv());
        assert_eq!(bindings.get("WORKSPACE"), Binding::Unset);
        assert_eq!(bindings.get("OTHER"), Binding::Undeclared);
    }
}
