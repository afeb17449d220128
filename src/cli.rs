use clap::{Parser, Subcommand};
use std::path::PathBuf;
use anyhow::Result;
use tracing::info;

use crate::core::{Engine, RunOptions, RunOutcome};

#[derive(Parser)]
#[command(name = "thesis-meter")]
#[command(about = "Tracks the progress of a LaTeX manuscript over time")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Pull, build, measure and record a snapshot if anything changed
    Run {
        /// Project directory (a git checkout)
        #[arg(long, alias = "git-dir")]
        project_dir: PathBuf,

        /// Main TeX file, relative to the project directory
        #[arg(long)]
        main_tex: PathBuf,

        /// Directory holding the snapshot history
        #[arg(long)]
        log_dir: PathBuf,

        /// Skip `git pull`
        #[arg(long)]
        no_pull: bool,

        /// Skip compiling the document (reuse the existing PDF)
        #[arg(long)]
        no_build: bool,

        /// Override the build timeout, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Resolve the inclusion graph and print the counts
    Scan {
        /// Project directory
        #[arg(long)]
        project_dir: PathBuf,

        /// Main TeX file, relative to the project directory
        #[arg(long)]
        main_tex: PathBuf,
    },

    /// Regenerate the CSV time series from stored snapshots
    Aggregate {
        /// Directory holding the snapshot history
        #[arg(long)]
        log_dir: PathBuf,
    },

    /// Word counts per chapter directory
    Chapters {
        /// Project directory
        #[arg(long)]
        project_dir: PathBuf,
    },

    /// Write a default configuration file
    Init {
        /// Target directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

impl Cli {
    pub async fn execute(self, mut engine: Engine) -> Result<()> {
        match self.command {
            Commands::Run { project_dir, main_tex, log_dir, no_pull, no_build, timeout } => {
                if let Some(secs) = timeout {
                    engine.config_mut().build.timeout_secs = secs;
                    engine.config_mut().validate()?;
                }
                let options = RunOptions {
                    project_dir,
                    main_tex,
                    log_dir,
                    pull: !no_pull,
                    build: !no_build,
                };
                match engine.run(&options).await? {
                    RunOutcome::Recorded(path) => info!("Snapshot written to {}", path.display()),
                    RunOutcome::Unchanged => info!("Nothing to record"),
                }
                Ok(())
            }
            Commands::Scan { project_dir, main_tex } => {
                let resolution = engine.scan(&project_dir, &main_tex)?;
                println!("{}", serde_json::to_string_pretty(&resolution)?);
                Ok(())
            }
            Commands::Aggregate { log_dir } => {
                let rows = engine.aggregate(&log_dir)?;
                info!("Aggregated {} snapshot(s)", rows);
                Ok(())
            }
            Commands::Chapters { project_dir } => {
                engine.chapters(&project_dir).await?;
                Ok(())
            }
            Commands::Init { path } => {
                engine.init(path).await?;
                Ok(())
            }
        }
    }
}
