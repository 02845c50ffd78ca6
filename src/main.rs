use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use dimsum::config::Config;
use dimsum::pipeline::{Pipeline, SampleFile};

/// Declarative multi-stage histogram aggregation.
#[derive(Parser)]
#[command(name = "dimsum", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Overrides the config file's `log_level`.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Book, replay a sample file, harvest and write the resulting histograms.
    Run {
        /// YAML file with recorded samples.
        #[arg(long)]
        samples: PathBuf,

        /// JSON output path. Default: stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print every manager's step programs.
    Describe,
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Command::Version = &cli.command {
        println!("dimsum {}", version::full());
        return Ok(());
    }

    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let log_level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("invalid log level: {log_level}"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        managers = cfg.managers.len(),
        "starting dimsum",
    );

    match cli.command {
        Command::Run { samples, output } => run(&cfg, &samples, output),
        Command::Describe => describe(&cfg),
        Command::Version => Ok(()),
    }
}

fn run(cfg: &Config, samples_path: &Path, output: Option<PathBuf>) -> Result<()> {
    let samples = SampleFile::load(samples_path)?;

    let mut pipeline = Pipeline::from_config(cfg)?;
    pipeline.book().context("booking")?;
    pipeline.replay(&samples)?;
    let store = pipeline.finish().context("harvesting")?;

    let writer: Box<dyn Write> = match &output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating output {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, &store).context("writing histograms")?;
    writeln!(writer)?;
    writer.flush()?;

    tracing::info!(histograms = store.len(), "dimsum finished");

    Ok(())
}

fn describe(cfg: &Config) -> Result<()> {
    let pipeline = Pipeline::from_config(cfg)?;
    for (name, programs) in pipeline.describe() {
        println!("{name}:");
        for program in programs {
            println!("  {program}");
        }
    }
    Ok(())
}
