use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use series_archiver::{
    archive::{default_archive_name, ArchivePrimitive, TarBackend},
    command,
    compression::CompressionDispatcher,
    config::{CompressionMode, IndexFormat, RollingConfig, ToolConfig},
    maintenance,
    orchestrator::{RollingOrchestrator, RunOutcome},
    pruner::SeriesPruner,
    series::{DirIndexer, SeriesPattern},
    ArchiverError,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "series-archiver")]
#[command(about = "Rolling archiver for numbered file series", long_about = None)]
struct Cli {
    /// Directory holding the file series and its bundles
    #[arg(short = 'd', long, global = true, default_value = ".")]
    dir: PathBuf,
    /// Print the result as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SeriesArgs {
    /// Bundle base name; also names the lock marker
    #[arg(short = 'n', long = "tarname")]
    target: String,
    /// File series headers, e.g. `q.y0 q.y1`
    #[arg(short = 'g', long, num_args = 1.., required = true)]
    headers: Vec<String>,
    /// Suffix after the index, e.g. `.nc`
    #[arg(short = 't', long)]
    tail: Option<String>,
    /// Index format, e.g. `06d`
    #[arg(short = 'f', long = "fmt")]
    fmt: Option<String>,
}

impl SeriesArgs {
    fn index_format(&self) -> Result<Option<IndexFormat>, ArchiverError> {
        self.fmt.as_deref().map(str::parse).transpose()
    }

    fn patterns(&self) -> Result<Vec<SeriesPattern>, ArchiverError> {
        let format = self.index_format()?;
        Ok(self
            .headers
            .iter()
            .map(|h| SeriesPattern::new(h, self.tail.as_deref()).with_format(format))
            .collect())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// One rolling archival pass: prune, coarsen, archive the production window
    Run {
        #[command(flatten)]
        series: SeriesArgs,
        /// Files below this index are deleted
        #[arg(short = 's', long)]
        save_series_start: u64,
        /// Width of the full-resolution window behind the latest index
        #[arg(short = 'p', long)]
        production_interval: u64,
        /// Stride kept below the production window
        #[arg(short = 'c', long)]
        coarse_save_freq: u64,
        /// Latest index written; inferred from the first header when absent
        #[arg(short = 'i', long = "ilastsave")]
        latest_index: Option<u64>,
        /// Store members uncompressed
        #[arg(short = 'x', long)]
        dont_compress: bool,
    },
    /// Show loose files, bundles and the lock marker for a target
    Status {
        #[command(flatten)]
        series: SeriesArgs,
    },
    /// Unpack every bundle of a target back into loose files
    Restore {
        /// Bundle base name
        #[arg(short = 'n', long = "tarname")]
        target: String,
    },
    /// Remove a target's lock marker left by an aborted run
    Unlock {
        #[arg(short = 'n', long = "tarname")]
        target: String,
        /// Required; the marker is removed regardless of holder
        #[arg(long)]
        force: bool,
    },
    /// Archive all but the most recent indices of a series
    KeepLast {
        #[command(flatten)]
        series: SeriesArgs,
        /// Distinct indices left loose
        #[arg(short = 'k', long)]
        keep: usize,
        /// Bundle stem; derived from the first pattern when absent
        #[arg(short = 'o', long)]
        output: Option<String>,
        #[arg(short = 'x', long)]
        dont_compress: bool,
    },
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce()) -> Result<(), ArchiverError> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text();
    }
    Ok(())
}

/// Heads-up only; the run itself reports the failing step
fn warn_missing_tools(tools: &ToolConfig) {
    for program in [&tools.tar, &tools.compressor] {
        if !command::tool_available(program) {
            warn!(
                "`{}` is not runnable; override with SERIES_ARCHIVER_TAR or SERIES_ARCHIVER_COMPRESSOR",
                program
            );
        }
    }
}

fn run(cli: Cli, tools: &ToolConfig) -> Result<(), ArchiverError> {
    let dir = cli.dir;
    let indexer = DirIndexer::new(&dir);
    let backend = TarBackend::new(tools);
    let compressor = CompressionDispatcher::new(tools);

    match cli.command {
        Commands::Run {
            series,
            save_series_start,
            production_interval,
            coarse_save_freq,
            latest_index,
            dont_compress,
        } => {
            let config = RollingConfig::builder()
                .work_dir(&dir)
                .target(series.target.as_str())
                .headers(series.headers.iter().cloned())
                .tail(series.tail.clone())
                .index_format(series.index_format()?)
                .save_series_start(save_series_start)
                .production_interval(production_interval)
                .coarse_save_freq(coarse_save_freq)
                .latest_index(latest_index)
                .compress(!dont_compress)
                .build()?;
            warn_missing_tools(tools);
            let pruner = SeriesPruner::new(&indexer);
            let mut orchestrator = RollingOrchestrator::new(&config, &indexer, &pruner, &backend, &compressor);
            let outcome = orchestrator.run()?;
            emit(cli.json, &outcome, || match &outcome {
                RunOutcome::Completed(report) => println!(
                    "{}: pruned {}, coarse {}, production {} into bucket {}",
                    config.target,
                    report.pruned.deleted(),
                    report.archived_coarse,
                    report.archived_production,
                    report.production_bucket
                ),
                RunOutcome::Skipped { reason } => println!("{}: skipped ({:?})", config.target, reason),
            })
        }
        Commands::Status { series } => {
            let patterns = series.patterns()?;
            let status = maintenance::status(&dir, &series.target, &patterns, &indexer)?;
            emit(cli.json, &status, || {
                for s in &status.series {
                    match (s.first_index, s.last_index) {
                        (Some(first), Some(last)) => println!(
                            "{}: {} loose ({} compressed), indices {}..={}",
                            s.pattern, s.count, s.compressed, first, last
                        ),
                        _ => println!("{}: no loose files", s.pattern),
                    }
                }
                for b in &status.bundles {
                    println!("bundle {} ({})", b.name.display(), b.mode);
                }
                match &status.lock {
                    Some(lock) if lock.is_stale() => {
                        println!("LOCKED for {:.1}h (stale, see `unlock --force`)", lock.age_hours())
                    }
                    Some(lock) => println!("LOCKED for {:.1}h", lock.age_hours()),
                    None => println!("unlocked"),
                }
            })
        }
        Commands::Restore { target } => {
            warn_missing_tools(tools);
            let archiver = ArchivePrimitive::new(&dir, &backend, &compressor, &indexer);
            match maintenance::restore(&archiver, &target)? {
                Some(restored) => emit(cli.json, &restored, || {
                    println!("{}: restored {} files", target, restored.len())
                }),
                None => {
                    warn!("{} is locked by a running archive, nothing restored", target);
                    Ok(())
                }
            }
        }
        Commands::Unlock { target, force } => {
            if !force {
                return Err(ArchiverError::Config(
                    "refusing to remove a lock without --force".to_string(),
                ));
            }
            if maintenance::force_unlock(&dir, &target)? {
                info!("Removed lock for {}", target);
            } else {
                info!("{} was not locked", target);
            }
            Ok(())
        }
        Commands::KeepLast {
            series,
            keep,
            output,
            dont_compress,
        } => {
            let patterns = series.patterns()?;
            let stem = match output {
                Some(stem) => stem,
                None => patterns
                    .first()
                    .map(|p| default_archive_name(&p.glob()))
                    .ok_or_else(|| ArchiverError::Config("no file series headers given".to_string()))?,
            };
            warn_missing_tools(tools);
            let archiver = ArchivePrimitive::new(&dir, &backend, &compressor, &indexer);
            let archived =
                archiver.archive_keep_last_n(&patterns, &stem, keep, CompressionMode::from_flag(!dont_compress))?;
            emit(cli.json, &archived, || println!("{}: archived {} files", stem, archived))
        }
    }
}

fn main() -> Result<(), ArchiverError> {
    dotenv().ok();
    series_archiver::init_tracing("series-archiver");
    let cli = Cli::parse();
    let tools = ToolConfig::from_env();

    if let Err(e) = run(cli, &tools) {
        error!("{}", e);
        return Err(e);
    }
    Ok(())
}
