use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{MeterError, Result};

/// How files reachable from more than one ancestor are treated during a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Visit and count a shared file once per inclusion
    CountEach,
    /// Visit a shared file only the first time it is reached
    VisitOnce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Document compiler settings
    pub build: BuildConfig,

    /// Inclusion graph scanning settings
    pub scan: ScanConfig,

    /// External measurement tools
    pub tools: ToolsConfig,

    /// Desktop notifications
    pub notifications: NotificationConfig,

    /// Snapshot history settings
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Compiler executable (e.g., "pdflatex")
    pub compiler: String,

    /// Arguments placed before the root document path
    pub args: Vec<String>,

    /// Wall-clock limit for a single build attempt
    pub timeout_secs: u64,

    /// How often the child's exit status is checked
    pub poll_interval_secs: u64,

    /// How often a newline is fed to the compiler's stdin
    pub keepalive_interval_secs: u64,

    /// Extensions of the cache files removed before the corrective retry
    pub cache_extensions: Vec<String>,

    /// Forward compiler output to the terminal
    pub show_output: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Line prefix of an inclusion directive
    pub include_prefix: String,

    /// Lines starting with this marker are ignored
    pub comment_marker: String,

    /// Appended to included names that lack it
    pub default_extension: String,

    /// Prefixes whose brace-delimited arguments are collected uniquely
    pub queries: Vec<String>,

    /// Literal strings whose raw occurrences are tallied
    pub commands: Vec<String>,

    pub duplicate_policy: DuplicatePolicy,

    /// Named counts folded from query/command keys (e.g., figures)
    pub named_counts: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    pub detex: String,
    pub pdfinfo: String,
    pub git: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub display_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Name of the aggregated time series written into the log directory
    pub csv_name: String,
}

impl Default for Config {
    fn default() -> Self {
        let mut named_counts = BTreeMap::new();
        named_counts.insert("references".to_string(), vec!["\\cite{".to_string()]);
        named_counts.insert(
            "figures".to_string(),
            vec!["\\begin{figure*}".to_string(), "\\begin{figure}".to_string()],
        );
        named_counts.insert(
            "tables".to_string(),
            vec!["\\begin{table*}".to_string(), "\\begin{table}".to_string()],
        );

        Self {
            build: BuildConfig {
                compiler: "pdflatex".to_string(),
                args: vec!["-shell-escape".to_string()],
                timeout_secs: 100,
                poll_interval_secs: 5,
                keepalive_interval_secs: 5,
                cache_extensions: vec!["aux".to_string()],
                show_output: false,
            },
            scan: ScanConfig {
                include_prefix: "\\input{".to_string(),
                comment_marker: "%".to_string(),
                default_extension: ".tex".to_string(),
                queries: vec!["\\cite{".to_string()],
                commands: vec![
                    "\\begin{figure*}".to_string(),
                    "\\begin{figure}".to_string(),
                    "\\includegraphics[".to_string(),
                    "\\begin{table}".to_string(),
                    "\\begin{table*}".to_string(),
                ],
                duplicate_policy: DuplicatePolicy::CountEach,
                named_counts,
            },
            tools: ToolsConfig {
                detex: "detex".to_string(),
                pdfinfo: "pdfinfo".to_string(),
                git: "git".to_string(),
            },
            notifications: NotificationConfig {
                enabled: true,
                display_secs: 5,
            },
            history: HistoryConfig {
                csv_name: "thesis_data.csv".to_string(),
            },
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| MeterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MeterError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Err(MeterError::Config(format!(
                        "config file `{}` not found",
                        p.as_ref().display()
                    )))
                }
            }
            None => {
                let candidates = ["thesis-meter.toml", ".thesis-meter.toml"];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.build.timeout_secs == 0 {
            return Err(MeterError::Config("build.timeout_secs must be positive".to_string()));
        }
        if self.build.poll_interval_secs == 0 || self.build.keepalive_interval_secs == 0 {
            return Err(MeterError::Config("build intervals must be positive".to_string()));
        }
        if self.scan.include_prefix.is_empty() {
            return Err(MeterError::Config("scan.include_prefix must not be empty".to_string()));
        }
        if self.scan.queries.iter().chain(&self.scan.commands).any(|s| s.is_empty()) {
            return Err(MeterError::Config("scan queries and commands must not be empty".to_string()));
        }
        Ok(())
    }
}
