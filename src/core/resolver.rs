//! Inclusion graph resolution
//!
//! Walks a root document and every file it transitively pulls in through
//! include directives, running the [`PatternMatcher`] over each line and
//! merging the per-file results into project-wide aggregates.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{DuplicatePolicy, ScanConfig};
use crate::error::{MeterError, Result};
use super::matcher::{CommandTally, OccurrenceIndex, PatternMatcher};

/// Aggregated result of walking an inclusion graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    /// Every included file, relative to the project root, in discovery order
    pub included_files: Vec<PathBuf>,
    pub occurrences: OccurrenceIndex,
    pub tally: CommandTally,
}

impl Resolution {
    /// Merge a child traversal into this one
    fn absorb(&mut self, child: Resolution) {
        self.included_files.extend(child.included_files);
        self.occurrences.merge(child.occurrences);
        self.tally.merge(child.tally);
    }

    /// Distinct included files
    pub fn unique_files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.included_files
            .iter()
            .filter(|f| seen.insert((*f).clone()))
            .cloned()
            .collect()
    }
}

/// State carried through one traversal pass
struct Traversal {
    /// Canonical paths on the current inclusion chain, with their display names
    chain: Vec<(PathBuf, PathBuf)>,
    /// Canonical paths visited anywhere in this pass
    visited: HashSet<PathBuf>,
}

/// Resolves include directives recursively from a root document
pub struct IncludeResolver {
    matcher: PatternMatcher,
    include_prefix: String,
    default_extension: String,
    policy: DuplicatePolicy,
}

impl IncludeResolver {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            matcher: PatternMatcher::new(&config.queries, &config.commands, &config.comment_marker),
            include_prefix: config.include_prefix.clone(),
            default_extension: config.default_extension.clone(),
            policy: config.duplicate_policy,
        }
    }

    pub fn with_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve `root_file` and everything it includes.
    ///
    /// `project_root` is the root document's directory. Every included name is
    /// resolved against it rather than the including file's directory, the
    /// same way LaTeX resolves `\input` when compiling from there.
    pub fn resolve(&self, root_file: &Path, project_root: &Path) -> Result<Resolution> {
        let root_path = project_root.join(root_file);
        if !root_path.is_file() {
            return Err(MeterError::Config(format!(
                "root document `{}` not found",
                root_path.display()
            )));
        }

        let mut traversal = Traversal {
            chain: Vec::new(),
            visited: HashSet::new(),
        };
        self.visit(root_file, &root_path, project_root, &mut traversal)
    }

    fn visit(
        &self,
        name: &Path,
        path: &Path,
        project_root: &Path,
        traversal: &mut Traversal,
    ) -> Result<Resolution> {
        let key = path.canonicalize()?;
        if traversal.chain.iter().any(|(k, _)| *k == key) {
            let mut chain: Vec<PathBuf> = traversal.chain.iter().map(|(_, n)| n.clone()).collect();
            chain.push(name.to_path_buf());
            return Err(MeterError::CyclicInclude {
                path: name.to_path_buf(),
                chain,
            });
        }
        traversal.visited.insert(key.clone());

        debug!("Scanning {}", name.display());
        let bytes = std::fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);

        let mut result = Resolution::default();
        let mut includes = Vec::new();

        for line in content.lines() {
            if self.matcher.is_comment(line) {
                continue;
            }
            if let Some(include) = self.parse_include(line) {
                includes.push(include);
            }
            self.matcher
                .match_line(line)
                .merge_into(&mut result.occurrences, &mut result.tally);
        }

        traversal.chain.push((key, name.to_path_buf()));
        for include in includes {
            let include_path = project_root.join(&include);
            if !include_path.is_file() {
                return Err(MeterError::MissingInclude {
                    path: include,
                    referenced_by: name.to_path_buf(),
                });
            }

            result.included_files.push(include.clone());

            if self.policy == DuplicatePolicy::VisitOnce {
                let include_key = include_path.canonicalize()?;
                let on_chain = traversal.chain.iter().any(|(k, _)| *k == include_key);
                if !on_chain && traversal.visited.contains(&include_key) {
                    debug!("Skipping already visited {}", include.display());
                    continue;
                }
            }

            let child = self.visit(&include, &include_path, project_root, traversal)?;
            result.absorb(child);
        }
        traversal.chain.pop();

        Ok(result)
    }

    /// Extract the target of an include directive, if the line starts with one
    fn parse_include(&self, line: &str) -> Option<PathBuf> {
        if !line.starts_with(&self.include_prefix) {
            return None;
        }

        let after_open = line.split_once('{').map(|(_, rest)| rest)?;
        let raw = after_open.split('}').next().unwrap_or(after_open);
        let mut name: String = raw.chars().filter(|c| *c != '"' && *c != '\'').collect();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            warn!("Ignoring empty include directive: {}", line);
            return None;
        }
        name = trimmed.to_string();

        // `ch.tex.in` already names its extension
        if !name.contains(&self.default_extension) {
            name.push_str(&self.default_extension);
        }
        Some(PathBuf::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;

    fn resolver() -> IncludeResolver {
        IncludeResolver::new(&Config::default().scan)
    }

    #[test]
    fn test_nested_includes_sum_tallies() {
        let dir = TempDir::new().unwrap();
        dir.child("main.tex")
            .write_str("\\input{b}\n\\begin{figure}\nSee \\cite{foo} and \\cite{bar}.\n")
            .unwrap();
        dir.child("b.tex")
            .write_str("\\input{\"chapters/c\"}\n\\begin{figure}\n\\begin{table}\n")
            .unwrap();
        dir.child("chapters/c.tex")
            .write_str("\\begin{table}\\begin{table}\n\\cite{foo}\n")
            .unwrap();

        let result = resolver().resolve(Path::new("main.tex"), dir.path()).unwrap();

        assert_eq!(
            result.included_files,
            vec![PathBuf::from("b.tex"), PathBuf::from("chapters/c.tex")]
        );
        assert_eq!(result.tally.get("\\begin{figure}"), 2);
        assert_eq!(result.tally.get("\\begin{table}"), 3);
        assert_eq!(result.occurrences.counts()["\\cite{"], 2);
    }

    #[test]
    fn test_commented_includes_are_ignored() {
        let dir = TempDir::new().unwrap();
        dir.child("main.tex")
            .write_str("%\\input{missing}\n\\begin{figure}\n")
            .unwrap();

        let result = resolver().resolve(Path::new("main.tex"), dir.path()).unwrap();
        assert!(result.included_files.is_empty());
        assert_eq!(result.tally.get("\\begin{figure}"), 1);
    }

    #[test]
    fn test_missing_include_names_file_and_referrer() {
        let dir = TempDir::new().unwrap();
        dir.child("main.tex").write_str("\\input{missing}\n").unwrap();

        let err = resolver().resolve(Path::new("main.tex"), dir.path()).unwrap_err();
        match err {
            MeterError::MissingInclude { path, referenced_by } => {
                assert_eq!(path, PathBuf::from("missing.tex"));
                assert_eq!(referenced_by, PathBuf::from("main.tex"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = resolver().resolve(Path::new("main.tex"), dir.path()).unwrap_err();
        assert!(matches!(err, MeterError::Config(_)));
    }

    #[test]
    fn test_self_include_is_rejected() {
        let dir = TempDir::new().unwrap();
        dir.child("main.tex").write_str("\\input{a}\n").unwrap();
        dir.child("a.tex").write_str("\\input{b}\n").unwrap();
        dir.child("b.tex").write_str("\\input{a.tex}\n").unwrap();

        let err = resolver().resolve(Path::new("main.tex"), dir.path()).unwrap_err();
        match err {
            MeterError::CyclicInclude { path, chain } => {
                assert_eq!(path, PathBuf::from("a.tex"));
                assert_eq!(chain.len(), 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_shared_file_policy() {
        let dir = TempDir::new().unwrap();
        dir.child("main.tex").write_str("\\input{a}\n\\input{b}\n").unwrap();
        dir.child("a.tex").write_str("\\input{shared}\n").unwrap();
        dir.child("b.tex").write_str("\\input{shared}\n").unwrap();
        dir.child("shared.tex").write_str("\\begin{figure}\n").unwrap();

        let counted = resolver().resolve(Path::new("main.tex"), dir.path()).unwrap();
        assert_eq!(counted.tally.get("\\begin{figure}"), 2);
        assert_eq!(counted.unique_files().len(), 3);

        let once = resolver()
            .with_policy(DuplicatePolicy::VisitOnce)
            .resolve(Path::new("main.tex"), dir.path())
            .unwrap();
        assert_eq!(once.tally.get("\\begin{figure}"), 1);
        assert_eq!(once.unique_files().len(), 3);
    }

    #[test]
    fn test_resolution_is_repeatable() {
        let dir = TempDir::new().unwrap();
        dir.child("main.tex")
            .write_str("\\input{intro}\n\\cite{x}\\cite{}\n")
            .unwrap();
        dir.child("intro.tex")
            .write_str("\\includegraphics[width=1cm]{a}\n\\cite{y}\n")
            .unwrap();

        let first = resolver().resolve(Path::new("main.tex"), dir.path()).unwrap();
        let second = resolver().resolve(Path::new("main.tex"), dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.occurrences.counts()["\\cite{"], 2);
        assert_eq!(first.tally.get("\\includegraphics["), 1);
    }

    #[test]
    fn test_extension_appended_only_when_absent() {
        let r = resolver();
        assert_eq!(r.parse_include("\\input{intro}"), Some(PathBuf::from("intro.tex")));
        assert_eq!(r.parse_include("\\input{intro.tex}"), Some(PathBuf::from("intro.tex")));
        assert_eq!(r.parse_include("\\input{ch.tex.in}"), Some(PathBuf::from("ch.tex.in")));
        assert_eq!(r.parse_include("\\input{}"), None);
    }

    #[test]
    fn test_figure_counted_across_lines() {
        let dir = TempDir::new().unwrap();
        dir.child("main.tex")
            .write_str("\\begin{figure}\ntext\n\\begin{figure}\n")
            .unwrap();

        let result = resolver().resolve(Path::new("main.tex"), dir.path()).unwrap();
        assert_eq!(result.tally.get("\\begin{figure}"), 2);
    }
}
