mod engine;
mod matcher;
mod resolver;
mod supervisor;
mod snapshot;
mod differ;
mod metrics;
mod notifier;
mod tools;

pub use resolver::{IncludeResolver, Resolution};
pub use supervisor::{BuildSupervisor, SupervisorOptions};
pub use snapshot::{MetricsRecord, SnapshotStore};
pub use differ::SnapshotDiffer;
pub use metrics::fold_counts;
pub use notifier::{DesktopNotifier, LogNotifier, Notifier};
pub use tools::Toolbox;

// Export the main engine
pub use engine::{Engine, RunOptions, RunOutcome};
