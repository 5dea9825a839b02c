//! `assay`: command-line driver for the scoring pipeline.
//!
//! Reads `assay.toml` (or the path given with `--config`) layered with
//! `ASSAY_*` environment variables, opens the SQLite store, runs one command
//! and prints its result as JSON.
//!
//! Nested settings use a double underscore in the environment, e.g.
//! `ASSAY_ENGINE__GAPS__THRESHOLD=0.75`.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use assay_core::band::ReadinessBand;
use assay_runner::{Pipeline, RunnerConfig};
use assay_store_sqlite::SqliteStore;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Assay multi-rater scoring engine")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "assay.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create an assessment form.
  Form {
    #[arg(long)]
    name:  String,
    #[arg(long, default_value = "")]
    scope: String,
    /// Also insert the canonical starter indicators.
    #[arg(long)]
    seed:  bool,
  },
  /// Insert the canonical starter indicators into an existing form.
  Seed {
    #[arg(long)]
    form: Uuid,
  },
  /// Score every rated subject of a cycle.
  Run {
    #[arg(long)]
    cycle: Uuid,
    /// Evaluation instant (RFC 3339); defaults to now.
    #[arg(long)]
    as_of: Option<DateTime<Utc>>,
  },
  /// Evaluate drift of the confidence series.
  Drift {
    #[arg(long)]
    as_of: Option<DateTime<Utc>>,
  },
  /// Replace the effective readiness band of a subject's current score.
  Override {
    #[arg(long)]
    subject:   Uuid,
    #[arg(long)]
    cycle:     Uuid,
    /// ready_now, ready_in_1_year, ready_in_2_years or developing.
    #[arg(long)]
    band:      ReadinessBand,
    #[arg(long)]
    actor:     String,
    #[arg(long)]
    rationale: String,
  },
  /// Print every composite score recorded for a subject and cycle.
  History {
    #[arg(long)]
    subject: Uuid,
    #[arg(long)]
    cycle:   Uuid,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("ASSAY")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let runner_cfg: RunnerConfig = settings
    .try_deserialize()
    .context("failed to deserialise RunnerConfig")?;

  let store_path = expand_tilde(&runner_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let pipeline =
    Pipeline::new(Arc::new(store), &runner_cfg).context("invalid configuration")?;

  match cli.command {
    Command::Form { name, scope, seed } => {
      let (form, seeded) = pipeline.create_form(&name, &scope, seed).await?;
      print_json(&serde_json::json!({ "form": form, "seed": seeded }))?;
    }
    Command::Seed { form } => {
      let report = pipeline
        .seed_form(form)
        .await
        .with_context(|| format!("failed to seed form {form}"))?;
      print_json(&report)?;
    }
    Command::Run { cycle, as_of } => {
      let report = pipeline.run_cycle(cycle, as_of.unwrap_or_else(Utc::now)).await?;
      print_json(&report)?;
      if !report.failures.is_empty() {
        anyhow::bail!("{} subject(s) failed", report.failures.len());
      }
    }
    Command::Drift { as_of } => {
      let outcome = pipeline.evaluate_drift(as_of.unwrap_or_else(Utc::now)).await?;
      print_json(&outcome)?;
    }
    Command::Override { subject, cycle, band, actor, rationale } => {
      let score = pipeline
        .override_band(subject, cycle, band, &actor, &rationale, Utc::now())
        .await
        .context("override failed")?;
      print_json(&score)?;
    }
    Command::History { subject, cycle } => {
      print_json(&pipeline.history(subject, cycle).await?)?;
    }
  }

  Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
