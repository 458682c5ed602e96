use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};

use sensor_merge::config::{RetentionMode, RetentionOverrides};
use sensor_merge::vcs::{GitCli, GitPublisher};
use sensor_merge::{Pipeline, PipelineConfig};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Age,
    Count,
}

impl From<ModeArg> for RetentionMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Age => RetentionMode::Age,
            ModeArg::Count => RetentionMode::Count,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "sensor-merge")]
#[command(about = "Merge sensor snapshot files and prune old snapshots")]
struct Args {
    /// Directory holding sensor_*.csv snapshots (default: data)
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Retention strategy
    #[arg(long, value_enum)]
    retention_mode: Option<ModeArg>,

    /// Delete snapshots older than this many hours (retention-mode=age)
    #[arg(long)]
    max_age_hours: Option<u64>,

    /// Keep only the newest N snapshots (retention-mode=count)
    #[arg(long)]
    keep_count: Option<usize>,

    /// Canonical output file name inside the directory
    #[arg(long)]
    output: Option<String>,

    /// Column rows are ordered by
    #[arg(long)]
    timestamp_field: Option<String>,

    /// JSON configuration file; command-line flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use file modification times only
    #[arg(long)]
    no_vcs: bool,

    /// Timeout for each git query, in seconds
    #[arg(long)]
    vcs_timeout_secs: Option<u64>,

    /// Do not feed the existing canonical file back into the merge
    #[arg(long)]
    no_carry_forward: bool,

    /// Write the canonical file and plan retention, but delete nothing
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Commit the canonical file and deletions after a successful run
    #[arg(long)]
    commit: bool,

    /// Push after committing
    #[arg(long, requires = "commit")]
    push: bool,

    /// Commit message used with --commit
    #[arg(long, default_value = "Merge sensor data")]
    message: String,
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = build_config(&args)?;

    let git = if config.use_vcs {
        match GitCli::discover(&config.directory, config.vcs_timeout()) {
            Ok(git) => {
                info!("repository root: {}", git.root().display());
                Some(git)
            }
            Err(err) => {
                info!("no git repository, recency falls back to mtimes: {err}");
                None
            }
        }
    } else {
        None
    };

    let mut pipeline = Pipeline::new(config.clone());
    if let Some(git) = git.as_ref() {
        pipeline = pipeline.with_vcs(git);
    }
    let report = pipeline.run();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }

    if !report.succeeded() {
        return Ok(ExitCode::from(report.exit_code() as u8));
    }

    if args.commit {
        if config.dry_run {
            warn!("--commit ignored for a dry run");
        } else {
            let Some(git) = git.as_ref() else {
                bail!("--commit requires a git repository");
            };
            let mut paths = vec![report.output.clone()];
            paths.extend(report.deleted.iter().cloned());
            let committed = GitPublisher::new(git)
                .publish(&paths, &args.message, args.push)
                .context("failed to publish merge results")?;
            if !committed {
                info!("no changes to commit");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(directory) = &args.directory {
        config.directory = directory.clone();
    }
    if let Some(output) = &args.output {
        config.output_name = output.clone();
    }
    if let Some(field) = &args.timestamp_field {
        config.timestamp_field = field.clone();
    }
    if let Some(secs) = args.vcs_timeout_secs {
        config.vcs_timeout_secs = secs;
    }
    if args.no_vcs {
        config.use_vcs = false;
    }
    if args.no_carry_forward {
        config.carry_forward = false;
    }
    if args.dry_run {
        config.dry_run = true;
    }

    let overrides = RetentionOverrides {
        mode: args.retention_mode.map(RetentionMode::from),
        max_age_hours: args.max_age_hours,
        keep_count: args.keep_count,
    };
    config.retention = overrides.resolve(config.retention)?;
    config.validate()?;
    Ok(config)
}
