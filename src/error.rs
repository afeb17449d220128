use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for thesis-meter operations
#[derive(Error, Debug)]
pub enum MeterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Included file {} (referenced from {}) does not exist", .path.display(), .referenced_by.display())]
    MissingInclude { path: PathBuf, referenced_by: PathBuf },

    #[error("Cyclic include of {}: {}", .path.display(), format_chain(.chain))]
    CyclicInclude { path: PathBuf, chain: Vec<PathBuf> },

    #[error("Build did not finish within {timeout:?} after {attempts} attempts")]
    BuildTimeout { attempts: u32, timeout: Duration },

    #[error("Build finished with a non-zero exit code: {code}")]
    BuildFailed { code: i32 },

    #[error("Unexpected output from {tool}: {output}")]
    ToolOutput { tool: String, output: String },

    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("Version control sync failed: {0}")]
    Sync(String),

    #[error("Snapshot store error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, MeterError>;
