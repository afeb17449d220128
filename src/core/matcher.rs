use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Unique arguments collected per query prefix
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceIndex(BTreeMap<String, BTreeSet<String>>);

/// Raw occurrence counts per command string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTally(BTreeMap<String, u64>);

/// Everything the matcher found on a single line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineMatches {
    /// Extracted arguments per query, in order of discovery
    pub arguments: BTreeMap<String, Vec<String>>,
    /// Non-overlapping occurrence count per command
    pub counts: BTreeMap<String, u64>,
}

/// Extracts query arguments and command counts from lines of LaTeX source
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    queries: Vec<String>,
    commands: Vec<String>,
    comment_marker: String,
}

impl PatternMatcher {
    pub fn new(queries: &[String], commands: &[String], comment_marker: &str) -> Self {
        Self {
            queries: queries.to_vec(),
            commands: commands.to_vec(),
            comment_marker: comment_marker.to_string(),
        }
    }

    /// Whether a line is a comment and must be ignored entirely
    pub fn is_comment(&self, line: &str) -> bool {
        !self.comment_marker.is_empty() && line.starts_with(&self.comment_marker)
    }

    /// Match every query and command against one line.
    ///
    /// Each query occurrence yields the text between the end of the query and
    /// the next `}`. When the line has no closing brace the argument runs to
    /// the end of the line. Scanning resumes at the closing brace, so several
    /// occurrences on one line are captured independently.
    pub fn match_line(&self, line: &str) -> LineMatches {
        let mut matches = LineMatches::default();
        if self.is_comment(line) {
            return matches;
        }

        for query in &self.queries {
            let found = extract_arguments(line, query);
            if !found.is_empty() {
                matches.arguments.insert(query.clone(), found);
            }
        }

        for command in &self.commands {
            let count = line.matches(command.as_str()).count() as u64;
            if count > 0 {
                matches.counts.insert(command.clone(), count);
            }
        }

        matches
    }
}

fn extract_arguments(line: &str, query: &str) -> Vec<String> {
    let mut arguments = Vec::new();
    if query.is_empty() {
        return arguments;
    }

    let mut rest = line;
    while let Some(pos) = rest.find(query) {
        let start = pos + query.len();
        match rest[start..].find('}') {
            Some(offset) => {
                let end = start + offset;
                arguments.push(rest[start..end].to_string());
                rest = &rest[end..];
            }
            None => {
                arguments.push(rest[start..].to_string());
                break;
            }
        }
    }

    arguments
}

impl OccurrenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, query: &str, argument: String) {
        self.0.entry(query.to_string()).or_default().insert(argument);
    }

    /// Union another index into this one, per query key
    pub fn merge(&mut self, other: OccurrenceIndex) {
        for (query, arguments) in other.0 {
            self.0.entry(query).or_default().extend(arguments);
        }
    }

    pub fn get(&self, query: &str) -> Option<&BTreeSet<String>> {
        self.0.get(query)
    }

    /// Number of distinct non-empty arguments per query
    pub fn counts(&self) -> BTreeMap<String, u64> {
        self.0
            .iter()
            .map(|(query, arguments)| {
                let count = arguments.iter().filter(|a| !a.is_empty()).count() as u64;
                (query.clone(), count)
            })
            .collect()
    }
}

impl CommandTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, command: &str, count: u64) {
        *self.0.entry(command.to_string()).or_insert(0) += count;
    }

    /// Sum another tally into this one, per command key
    pub fn merge(&mut self, other: CommandTally) {
        for (command, count) in other.0 {
            self.add(&command, count);
        }
    }

    pub fn get(&self, command: &str) -> u64 {
        self.0.get(command).copied().unwrap_or(0)
    }
}

impl LineMatches {
    /// Fold this line's results into running per-file aggregates
    pub fn merge_into(self, index: &mut OccurrenceIndex, tally: &mut CommandTally) {
        for (query, arguments) in self.arguments {
            for argument in arguments {
                index.insert(&query, argument);
            }
        }
        for (command, count) in self.counts {
            tally.add(&command, count);
        }
    }
}
