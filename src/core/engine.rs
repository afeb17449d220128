// src/core/engine.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::MeterError;
use super::{
    fold_counts, BuildSupervisor, DesktopNotifier, IncludeResolver, LogNotifier, MetricsRecord,
    Notifier, Resolution, SnapshotDiffer, SnapshotStore, SupervisorOptions, Toolbox,
};

/// Inputs for a single pipeline run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub project_dir: PathBuf,
    /// Root document, relative to `project_dir`
    pub main_tex: PathBuf,
    pub log_dir: PathBuf,
    pub pull: bool,
    pub build: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new snapshot was written
    Recorded(PathBuf),
    /// Nothing changed since the latest snapshot
    Unchanged,
}

/// Sequences sync, build, measurement and persistence
pub struct Engine {
    config: Config,
    notifier: Arc<dyn Notifier>,
    tools: Toolbox,
    resolver: IncludeResolver,
    differ: SnapshotDiffer,
}

impl Engine {
    /// Create a new engine from the configuration at `config_path`, or the
    /// default configuration if none is given
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        debug!("Loaded configuration: {:?}", config);

        let notifier: Arc<dyn Notifier> = if config.notifications.enabled {
            Arc::new(DesktopNotifier)
        } else {
            Arc::new(LogNotifier)
        };
        Ok(Self::with_notifier(config, notifier))
    }

    pub fn with_notifier(config: Config, notifier: Arc<dyn Notifier>) -> Self {
        debug!("Using {} notifications", notifier.name());
        Self {
            tools: Toolbox::new(&config.tools),
            resolver: IncludeResolver::new(&config.scan),
            differ: SnapshotDiffer::new(),
            config,
            notifier,
        }
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Run the full pipeline, stamping the record with the current time
    pub async fn run(&self, options: &RunOptions) -> Result<RunOutcome> {
        self.run_at(options, Local::now().naive_local()).await
    }

    pub async fn run_at(&self, options: &RunOptions, now: NaiveDateTime) -> Result<RunOutcome> {
        let result = self.run_pipeline(options, now).await;

        if let Err(e) = &result {
            // Build failures have already been reported by the supervisor
            let reported = matches!(
                e.downcast_ref::<MeterError>(),
                Some(MeterError::BuildFailed { .. } | MeterError::BuildTimeout { .. })
            );
            if !reported {
                self.notifier
                    .notify("Progress Tracking Failed", &format!("{:#}", e), self.display_time())
                    .await;
            }
        }
        result
    }

    async fn run_pipeline(&self, options: &RunOptions, now: NaiveDateTime) -> Result<RunOutcome> {
        let main_tex = self.validate(options)?;

        if options.pull {
            self.tools.sync(&options.project_dir).await?;
        } else {
            info!("Skipping version control sync");
        }

        if options.build {
            let supervisor = BuildSupervisor::new(
                self.config.build.compiler.clone(),
                self.config.build.args.clone(),
                SupervisorOptions::from_config(&self.config.build, self.display_time()),
                self.notifier.clone(),
            );
            let report = supervisor.build(&main_tex).await?;
            info!(
                "Build finished after {} attempt(s) in {:.1}s",
                report.attempts,
                report.elapsed.as_secs_f64()
            );
        } else {
            info!("Skipping document build");
        }

        let record = self.measure(options, now).await?;

        let mut store = SnapshotStore::open(&options.log_dir)
            .with_context(|| format!("Failed to open history in {}", options.log_dir.display()))?;
        debug!("History holds {} snapshot(s)", store.len());
        let diff = self.differ.diff(&record, &store)?;
        if !diff.has_changes {
            info!("No change since the latest snapshot");
            return Ok(RunOutcome::Unchanged);
        }
        debug!("Changed fields: {:?} new fields: {:?}", diff.modified_fields, diff.added_fields);

        let path = store.persist(&record)?;
        self.export(&store)?;
        Ok(RunOutcome::Recorded(path))
    }

    /// Collect every measurement into a record. Nothing is written.
    pub async fn measure(&self, options: &RunOptions, now: NaiveDateTime) -> Result<MetricsRecord> {
        let main_tex = self.validate(options)?;
        let (doc_dir, doc_name) = split_document(&main_tex)?;

        info!("Counting words");
        let word_count = self.tools.word_count(doc_name, doc_dir).await?;

        info!("Counting pages");
        let pdf = main_tex.with_extension("pdf");
        let page_count = self
            .tools
            .page_count(&pdf)
            .await
            .with_context(|| format!("Failed to read page count of {}", pdf.display()))?;

        info!("Scanning inclusion graph");
        let resolution = self.resolver.resolve(doc_name, doc_dir)?;
        info!("Scanned {} included file(s)", resolution.unique_files().len());

        let counts = fold_counts(&resolution, &self.config.scan);
        Ok(MetricsRecord::new(now, word_count, page_count, counts))
    }

    /// Resolve the inclusion graph only
    pub fn scan(&self, project_dir: &Path, main_tex: &Path) -> Result<Resolution> {
        if !project_dir.is_dir() {
            return Err(MeterError::Config(format!(
                "Could not find project dir `{}`",
                project_dir.display()
            ))
            .into());
        }
        let main_path = project_dir.join(main_tex);
        let (doc_dir, doc_name) = split_document(&main_path)?;
        let resolution = self.resolver.resolve(doc_name, doc_dir)?;

        for file in resolution.unique_files() {
            info!("  includes {}", file.display());
        }
        for (key, count) in fold_counts(&resolution, &self.config.scan) {
            info!("  {} = {}", key, count);
        }
        Ok(resolution)
    }

    /// Rebuild the CSV time series from the stored snapshots
    pub fn aggregate(&self, log_dir: &Path) -> Result<usize> {
        let store = SnapshotStore::open(log_dir)?;
        self.export(&store)
    }

    /// Word counts per chapter directory, printed with a total
    pub async fn chapters(&self, project_dir: &Path) -> Result<u64> {
        let chapters = self.tools.chapter_word_counts(project_dir).await?;
        let mut total = 0;
        for (chapter, words) in &chapters {
            info!("{}: {} words", chapter, words);
            total += words;
        }
        info!("Total: {} words", total);
        Ok(total)
    }

    /// Write a default configuration file into `path`
    pub async fn init(&self, path: Option<PathBuf>) -> Result<PathBuf> {
        let target_dir = path.unwrap_or_else(|| PathBuf::from("."));
        let config_path = target_dir.join("thesis-meter.toml");
        if config_path.exists() {
            warn!("{} already exists, leaving it untouched", config_path.display());
            return Ok(config_path);
        }

        std::fs::create_dir_all(&target_dir)?;
        Config::default().save(&config_path)?;
        info!("Wrote {}", config_path.display());
        Ok(config_path)
    }

    fn export(&self, store: &SnapshotStore) -> Result<usize> {
        let output = store.dir().join(&self.config.history.csv_name);
        let rows = store
            .export_csv(&output)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        Ok(rows)
    }

    fn validate(&self, options: &RunOptions) -> Result<PathBuf, MeterError> {
        if !options.project_dir.is_dir() {
            return Err(MeterError::Config(format!(
                "Could not find project dir `{}`",
                options.project_dir.display()
            )));
        }
        let main_tex = options.project_dir.join(&options.main_tex);
        if !main_tex.is_file() {
            return Err(MeterError::Config(format!(
                "Could not find main TeX file `{}`",
                main_tex.display()
            )));
        }
        Ok(main_tex)
    }

    fn display_time(&self) -> Duration {
        Duration::from_secs(self.config.notifications.display_secs)
    }
}

/// Directory and file name of a root document. Includes, `detex` and the
/// compiler all work from the document's own directory.
fn split_document(document: &Path) -> Result<(&Path, &Path), MeterError> {
    let name = document.file_name().map(Path::new).ok_or_else(|| {
        MeterError::Config(format!("`{}` is not a document path", document.display()))
    })?;
    let dir = document
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    Ok((dir, name))
}
