//! Embed directive resolution.
//!
//! Embedded files are resolved depth-first: an embedded document's own
//! directives are resolved before it is merged into the embedding one. When
//! merging, the embedding document wins (see [`crate::merge`]).

use crate::document::{self, EmbedDirective, EmbedMode, Location, Node, NodeKind};
use crate::error::EmbedFailure;
use crate::merge::{MergePolicy, merge};
use crate::variables::{Expansion, VariableBindings};
use crate::{ConfigError, ConfigResult};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files currently being resolved, innermost last.
///
/// The chain only grows by borrowing: every recursion level pushes a new
/// link on its own stack frame, so sibling embeds never see each other.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionChain<'a> {
    file: &'a Path,
    parent: Option<&'a ResolutionChain<'a>>,
}

impl<'a> ResolutionChain<'a> {
    pub fn root(file: &'a Path) -> Self {
        Self { file, parent: None }
    }

    pub fn push(&'a self, file: &'a Path) -> Self {
        Self {
            file,
            parent: Some(self),
        }
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.file == file || self.parent.is_some_and(|p| p.contains(file))
    }

    /// The files on the chain, outermost first.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = self.parent.map(|p| p.files()).unwrap_or_default();
        files.push(self.file.to_path_buf());
        files
    }
}

/// Resolves the embed directives reachable from one root document.
///
/// A resolver belongs to a single read: it caches every parsed file and
/// every resolved embedding for the duration of that read only.
pub struct EmbedResolver<'a> {
    bindings: &'a VariableBindings,
    policy: &'a dyn MergePolicy,
    parsed: HashMap<PathBuf, Node>,
    resolved: HashMap<(PathBuf, Vec<String>), Node>,
}

struct Scope<'s> {
    chain: &'s ResolutionChain<'s>,
    base_dir: &'s Path,
}

impl<'a> EmbedResolver<'a> {
    pub fn new(bindings: &'a VariableBindings, policy: &'a dyn MergePolicy) -> Self {
        Self {
            bindings,
            policy,
            parsed: HashMap::new(),
            resolved: HashMap::new(),
        }
    }

    /// Parse the document at `path` and resolve all of its embeds.
    pub fn resolve_file(&mut self, path: &Path) -> ConfigResult<Node> {
        let canonical = std::fs::canonicalize(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let doc = self.parse(&canonical)?;
        self.resolve(doc, &ResolutionChain::root(&canonical))
    }

    /// Resolve the embeds of a document that was read from the innermost
    /// file of `chain`.
    pub fn resolve(&mut self, doc: Node, chain: &ResolutionChain<'_>) -> ConfigResult<Node> {
        let base_dir = chain.file.parent().unwrap_or(Path::new("."));
        let scope = Scope { chain, base_dir };
        let location = doc.location.clone();
        Ok(self
            .resolve_node(doc, &scope, &mut Vec::new())?
            .unwrap_or_else(|| Node::null(location)))
    }

    /// Resolve the embeds below `node`. `None` means the node is a replace
    /// directive whose file is unavailable, so it is absent.
    fn resolve_node(
        &mut self,
        node: Node,
        scope: &Scope<'_>,
        path: &mut Vec<String>,
    ) -> ConfigResult<Option<Node>> {
        let Node { kind, location } = node;
        match kind {
            NodeKind::Mapping(entries) => self
                .resolve_mapping(entries, location, scope, path)
                .map(Some),
            NodeKind::Sequence(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    match item.kind {
                        NodeKind::Embed(directive) if directive.mode == EmbedMode::Replace => {
                            let Some(doc) = self.replace(directive, &item.location, scope, path)?
                            else {
                                continue;
                            };
                            match doc.kind {
                                NodeKind::Sequence(spliced) => resolved.extend(spliced),
                                kind => resolved.push(Node::new(kind, doc.location)),
                            }
                        }
                        kind => {
                            let item = Node::new(kind, item.location);
                            resolved.extend(self.resolve_node(item, scope, path)?);
                        }
                    }
                }
                Ok(Some(Node::new(NodeKind::Sequence(resolved), location)))
            }
            NodeKind::Embed(directive) => match directive.mode {
                EmbedMode::Replace => self.replace(directive, &location, scope, path),
                EmbedMode::Merge => Err(ConfigError::embed(
                    location.file(),
                    &location,
                    EmbedFailure::InvalidTarget(format!(
                        "`{}` is only valid as a mapping key",
                        document::EMBED_KEY
                    )),
                )),
            },
            kind => Ok(Some(Node::new(kind, location))),
        }
    }

    fn resolve_mapping(
        &mut self,
        entries: IndexMap<String, Node>,
        location: Location,
        scope: &Scope<'_>,
        path: &mut Vec<String>,
    ) -> ConfigResult<Node> {
        let mut directive = None;
        let mut own = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match value.kind {
                NodeKind::Embed(d) if d.mode == EmbedMode::Merge => directive = Some(d),
                kind => own.push((key, Node::new(kind, value.location))),
            }
        }

        let mut base: Option<Node> = None;
        if let Some(directive) = directive {
            for target in &directive.targets {
                let Some((file, doc)) = self.load(target, scope, path)? else {
                    continue;
                };
                let doc = match doc.kind {
                    NodeKind::Mapping(_) => doc,
                    NodeKind::Null => Node::new(NodeKind::Mapping(IndexMap::new()), doc.location),
                    _ => {
                        return Err(ConfigError::embed(
                            file,
                            &target.location,
                            EmbedFailure::InvalidTarget(format!(
                                "expected a mapping to merge, found {}",
                                doc.describe()
                            )),
                        ));
                    }
                };
                base = Some(match base {
                    Some(lower) => merge(lower, doc, path, self.policy),
                    None => doc,
                });
            }
        }

        let mut resolved = IndexMap::with_capacity(own.len());
        for (key, value) in own {
            path.push(key.clone());
            let value = self.resolve_node(value, scope, path);
            path.pop();
            if let Some(value) = value? {
                resolved.insert(key, value);
            }
        }
        let node = Node::new(NodeKind::Mapping(resolved), location);

        Ok(match base {
            Some(lower) => merge(lower, node, path, self.policy),
            None => node,
        })
    }

    fn replace(
        &mut self,
        directive: EmbedDirective,
        location: &Location,
        scope: &Scope<'_>,
        path: &mut Vec<String>,
    ) -> ConfigResult<Option<Node>> {
        match directive.targets.as_slice() {
            [target] => Ok(self.load(target, scope, path)?.map(|(_, doc)| doc)),
            _ => Err(ConfigError::embed(
                location.file(),
                location,
                EmbedFailure::InvalidTarget(format!(
                    "`{}` takes exactly one file",
                    document::EMBED_TAG
                )),
            )),
        }
    }

    /// Load and fully resolve the file a directive target points at.
    ///
    /// Returns `None` when the target path depends on an unset variable:
    /// such a file is not available and the directive contributes nothing.
    fn load(
        &mut self,
        target: &Node,
        scope: &Scope<'_>,
        path: &mut Vec<String>,
    ) -> ConfigResult<Option<(PathBuf, Node)>> {
        let expr = target_expression(target)?;
        let expanded = match self.bindings.expand(expr) {
            Expansion::Text(text) => text,
            Expansion::Unavailable { name } => {
                debug!(
                    variable = %name,
                    from = %target.location,
                    "Skipping embed of unavailable file"
                );
                return Ok(None);
            }
            Expansion::Undeclared { name } => {
                return Err(ConfigError::UnresolvedVariable {
                    name,
                    location: target.location.clone(),
                });
            }
            Expansion::Malformed { placeholder } => {
                return Err(ConfigError::InvalidPlaceholder {
                    placeholder,
                    location: target.location.clone(),
                });
            }
        };

        let candidate = scope.base_dir.join(&expanded);
        let canonical = std::fs::canonicalize(&candidate).map_err(|e| {
            let reason = match e.kind() {
                io::ErrorKind::NotFound => EmbedFailure::NotFound,
                _ => EmbedFailure::InvalidTarget(e.to_string()),
            };
            ConfigError::embed(&candidate, &target.location, reason)
        })?;
        if canonical.is_dir() {
            return Err(ConfigError::embed(
                canonical,
                &target.location,
                EmbedFailure::InvalidTarget("is a directory".to_string()),
            ));
        }
        if scope.chain.contains(&canonical) {
            let mut cycle = scope.chain.files();
            cycle.push(canonical.clone());
            return Err(ConfigError::embed(
                canonical,
                &target.location,
                EmbedFailure::Cycle(cycle),
            ));
        }

        let key = (canonical, path.clone());
        if let Some(doc) = self.resolved.get(&key) {
            debug!(file = %key.0.display(), "Reusing resolved embed");
            return Ok(Some((key.0, doc.clone())));
        }

        debug!(
            file = %key.0.display(),
            from = %target.location,
            "Embedding document"
        );
        let doc = self.parse(&key.0)?;
        let chain = scope.chain.push(&key.0);
        let child = Scope {
            chain: &chain,
            base_dir: key.0.parent().unwrap_or(Path::new(".")),
        };
        let root = doc.location.clone();
        let doc = self
            .resolve_node(doc, &child, path)?
            .unwrap_or_else(|| Node::null(root));

        self.resolved.insert(key.clone(), doc.clone());
        Ok(Some((key.0, doc)))
    }

    fn parse(&mut self, canonical: &Path) -> ConfigResult<Node> {
        if let Some(doc) = self.parsed.get(canonical) {
            return Ok(doc.clone());
        }
        let doc = document::parse_file(canonical)?;
        self.parsed.insert(canonical.to_path_buf(), doc.clone());
        Ok(doc)
    }
}

/// The path expression of a directive target: a string, or a mapping with
/// a single `file` key.
fn target_expression(target: &Node) -> ConfigResult<&str> {
    if let Some(expr) = target.as_str() {
        return Ok(expr);
    }
    if let Some(map) = target.as_mapping() {
        if let (1, Some(file)) = (map.len(), map.get("file").and_then(Node::as_str)) {
            return Ok(file);
        }
    }
    Err(ConfigError::embed(
        target.location.file(),
        &target.location,
        EmbedFailure::InvalidTarget(format!(
            "expected a file path or `{{file: <path>}}`, found {}",
            target.describe()
        )),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::ConcatenateAll;
    use crate::variables::VariableBindingsBuilder;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn resolve(path: &Path, bindings: &VariableBindings) -> ConfigResult<Node> {
        EmbedResolver::new(bindings, &ConcatenateAll).resolve_file(path)
    }

    fn strings(node: &Node) -> Vec<&str> {
        match &node.kind {
            NodeKind::Sequence(items) => items.iter().filter_map(Node::as_str).collect(),
            _ => panic!("expected a sequence, found {}", node.describe()),
        }
    }

    #[test]
    fn test_chain_contains() {
        let a = PathBuf::from("/a.yaml");
        let b = PathBuf::from("/b.yaml");
        let root = ResolutionChain::root(&a);
        let child = root.push(&b);
        assert!(child.contains(&a));
        assert!(child.contains(&b));
        assert!(!root.contains(&b));
        assert_eq!(child.files(), vec![a.clone(), b.clone()]);
    }

    #[test]
    fn test_merge_embed_parent_wins() {
        let dir = TempDir::new().unwrap();
        write(&dir, "base.yaml", "image: base\nclean: [rm -rf build]\nproject-name: base\n");
        let root = write(
            &dir,
            "ci.yaml",
            "embed: base.yaml\nimage: custom\nclean: [git clean -fdx]\n",
        );

        let doc = resolve(&root, &VariableBindings::new()).unwrap();
        let map = doc.as_mapping().unwrap();
        assert!(!map.contains_key("embed"));
        assert_eq!(map["image"].as_str(), Some("custom"));
        assert_eq!(map["project-name"].as_str(), Some("base"));
        assert_eq!(strings(&map["clean"]), vec!["rm -rf build", "git clean -fdx"]);
    }

    #[test]
    fn test_later_embed_overrides_earlier() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.yaml", "image: a\nproject-name: a\n");
        write(&dir, "b.yaml", "image: b\n");
        let root = write(&dir, "ci.yaml", "embed: [a.yaml, b.yaml]\n");

        let doc = resolve(&root, &VariableBindings::new()).unwrap();
        let map = doc.as_mapping().unwrap();
        assert_eq!(map["image"].as_str(), Some("b"));
        assert_eq!(map["project-name"].as_str(), Some("a"));
    }

    #[test]
    fn test_replace_embed_relative_to_referencing_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "ci/phases/build.yaml", "x86: [make]\n");
        write(&dir, "ci/phases.yaml", "build: !embed phases/build.yaml\n");
        let root = write(&dir, "ci.yaml", "phases: !embed {file: ci/phases.yaml}\n");

        let doc = resolve(&root, &VariableBindings::new()).unwrap();
        let phases = doc.as_mapping().unwrap()["phases"].as_mapping().unwrap();
        let build = phases["build"].as_mapping().unwrap();
        assert_eq!(strings(&build["x86"]), vec!["make"]);
    }

    #[test]
    fn test_sequence_embed_is_spliced() {
        let dir = TempDir::new().unwrap();
        write(&dir, "common.yaml", "- lint\n- format\n");
        let root = write(&dir, "ci.yaml", "clean:\n  - !embed common.yaml\n  - test\n");

        let doc = resolve(&root, &VariableBindings::new()).unwrap();
        let map = doc.as_mapping().unwrap();
        assert_eq!(strings(&map["clean"]), vec!["lint", "format", "test"]);
    }

    #[test]
    fn test_target_path_uses_bindings() {
        let dir = TempDir::new().unwrap();
        write(&dir, "devenv/base.yaml", "image: devenv\n");
        let root = write(&dir, "ci.yaml", "embed: ${CT_DEVENV_HOME}/base.yaml\n");
        let bindings = VariableBindingsBuilder::new()
            .with_var("CT_DEVENV_HOME", dir.path().join("devenv").display().to_string())
            .build();

        let doc = resolve(&root, &bindings).unwrap();
        assert_eq!(doc.as_mapping().unwrap()["image"].as_str(), Some("devenv"));
    }

    #[test]
    fn test_merge_target_with_unset_variable_is_skipped() {
        let dir = TempDir::new().unwrap();
        write(&dir, "common.yaml", "clean: [common]\n");
        let root = write(
            &dir,
            "ci.yaml",
            "embed: [\"${WORKSPACE}/base.yaml\", common.yaml]\nimage: alpine\n",
        );
        let bindings = VariableBindingsBuilder::new().with_unset("WORKSPACE").build();

        let doc = resolve(&root, &bindings).unwrap();
        let map = doc.as_mapping().unwrap();
        assert_eq!(map["image"].as_str(), Some("alpine"));
        assert_eq!(strings(&map["clean"]), vec!["common"]);
    }

    #[test]
    fn test_replace_target_with_unset_variable_is_absent() {
        let dir = TempDir::new().unwrap();
        write(&dir, "extra.yaml", "- extra\n");
        let root = write(
            &dir,
            "ci.yaml",
            concat!(
                "phases: !embed ${WORKSPACE}/phases.yaml\n",
                "clean: [first, !embed \"${WORKSPACE}/clean.yaml\", !embed extra.yaml]\n",
            ),
        );
        let bindings = VariableBindingsBuilder::new().with_unset("WORKSPACE").build();

        let doc = resolve(&root, &bindings).unwrap();
        let map = doc.as_mapping().unwrap();
        assert!(!map.contains_key("phases"));
        assert_eq!(strings(&map["clean"]), vec!["first", "extra"]);
    }

    #[test]
    fn test_malformed_target_path() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "ci.yaml", "embed: ${ci.root}/base.yaml\n");

        let err = resolve(&root, &VariableBindings::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidPlaceholder { ref placeholder, .. } if placeholder == "${ci.root}"
        ));
    }

    #[test]
    fn test_missing_target() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "ci.yaml", "embed: missing.yaml\n");

        let err = resolve(&root, &VariableBindings::new()).unwrap_err();
        let ConfigError::Embed { path, reason, .. } = err else {
            panic!("expected an embed error");
        };
        assert_eq!(reason, EmbedFailure::NotFound);
        assert!(path.ends_with("missing.yaml"));
    }

    #[test]
    fn test_self_embed_is_cycle() {
        let dir = TempDir::new().unwrap();
        let root = write(&dir, "ci.yaml", "embed: ci.yaml\n");

        let err = resolve(&root, &VariableBindings::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Embed {
                reason: EmbedFailure::Cycle(_),
                ..
            }
        ));
    }

    #[test]
    fn test_indirect_cycle_reports_chain() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b.yaml", "phases: !embed a.yaml\n");
        let root = write(&dir, "a.yaml", "embed: b.yaml\n");

        let err = resolve(&root, &VariableBindings::new()).unwrap_err();
        let ConfigError::Embed {
            reason: EmbedFailure::Cycle(chain),
            ..
        } = err
        else {
            panic!("expected an embed cycle");
        };
        let names: Vec<_> = chain
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.yaml", "b.yaml", "a.yaml"]);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let dir = TempDir::new().unwrap();
        write(&dir, "d.yaml", "clean: [d]\n");
        write(&dir, "b.yaml", "embed: d.yaml\nproject-name: b\n");
        write(&dir, "c.yaml", "embed: d.yaml\nimage: c\n");
        let root = write(&dir, "a.yaml", "embed: [b.yaml, c.yaml]\n");

        let doc = resolve(&root, &VariableBindings::new()).unwrap();
        let map = doc.as_mapping().unwrap();
        assert_eq!(map["project-name"].as_str(), Some("b"));
        assert_eq!(map["image"].as_str(), Some("c"));
        assert_eq!(strings(&map["clean"]), vec!["d", "d"]);
    }

    #[test]
    fn test_merge_target_must_be_mapping() {
        let dir = TempDir::new().unwrap();
        write(&dir, "list.yaml", "- a\n");
        let root = write(&dir, "ci.yaml", "embed: list.yaml\n");

        let err = resolve(&root, &VariableBindings::new()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Embed {
                reason: EmbedFailure::InvalidTarget(_),
                ..
            }
        ));
    }

    #[test]
    fn test_directory_target() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("conf")).unwrap();
        let root = write(&dir, "ci.yaml", "image: !embed conf\n");

        let err = resolve(&root, &VariableBindings::new()).unwrap_err();
        assert!(err.to_string().contains("is a directory"));
    }

    #[test]
    fn test_parse_error_in_embedded_file_names_that_file() {
        let dir = TempDir::new().unwrap();
        let broken = write(&dir, "broken.yaml", "image: [\n");
        let root = write(&dir, "ci.yaml", "embed: broken.yaml\n");

        let err = resolve(&root, &VariableBindings::new()).unwrap_err();
        let ConfigError::Parse { path, .. } = err else {
            panic!("expected a parse error");
        };
        assert_eq!(path, fs::canonicalize(broken).unwrap());
    }

    #[test]
    fn test_empty_embedded_file_merges_as_empty_mapping() {
        let dir = TempDir::new().unwrap();
        write(&dir, "empty.yaml", "");
        let root = write(&dir, "ci.yaml", "embed: empty.yaml\nimage: alpine\n");

        let doc = resolve(&root, &VariableBindings::new()).unwrap();
        assert_eq!(doc.as_mapping().unwrap()["image"].as_str(), Some("alpine"));
    }
}
