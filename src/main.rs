use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::time::Duration;
use steam_pulse::database_ops::{Db, MemoryStore, PgStore, Store};
use steam_pulse::http::{ReqwestTransport, Transport};
use steam_pulse::util::env::{db_url, log_config_snapshot};
use steam_pulse::{Pipeline, PipelineConfig, RunKey};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "steam_pulse", version, about = "Hourly Steam trending snapshot pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Execute one hourly run (defaults to the current UTC hour)
    Run {
        /// Run date, YYYY-MM-DD (requires --hour)
        #[arg(long, requires = "hour")]
        date: Option<NaiveDate>,
        /// Run hour, 0-23
        #[arg(long)]
        hour: Option<u32>,
        /// Total attempts before the run is reported as failed
        #[arg(long, default_value_t = 3)]
        attempts: u32,
        /// Pause between attempts
        #[arg(long, default_value_t = 300)]
        retry_delay_secs: u64,
        /// Keep everything in memory and print the report instead of writing to Postgres
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Apply pending SQL migrations from ./migrations
    Migrate {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    steam_pulse::util::env::init_env();
    steam_pulse::tracing::init_tracing("steam_pulse=info,sqlx=warn")?;

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command {
        Commands::Run {
            date,
            hour,
            attempts,
            retry_delay_secs,
            dry_run,
            db_url: url_override,
        } => {
            let run = run_key(date, hour)?;
            let transport =
                ReqwestTransport::new(config.http_timeout).context("building http client")?;
            let delay = Duration::from_secs(retry_delay_secs);
            if dry_run {
                info!(run = %run, "dry run: rows stay in memory");
                let pipeline = Pipeline::from_config(&config, transport, MemoryStore::new());
                execute(&pipeline, run, attempts, delay).await
            } else {
                let db = connect(&config, url_override).await?;
                let pipeline = Pipeline::from_config(&config, transport, PgStore::new(db));
                execute(&pipeline, run, attempts, delay).await
            }
        }
        Commands::Migrate {
            db_url: url_override,
        } => {
            let db = connect(&config, url_override).await?;
            let applied = db.migrate().await?;
            info!(applied, "migrate done");
            Ok(())
        }
    }
}

fn run_key(date: Option<NaiveDate>, hour: Option<u32>) -> Result<RunKey> {
    let now = RunKey::from_datetime(Utc::now());
    let key = match (date, hour) {
        (Some(date), Some(hour)) => RunKey::new(date, hour)?,
        (None, Some(hour)) => RunKey::new(now.run_date(), hour)?,
        (None, None) => now,
        (Some(_), None) => bail!("--date requires --hour"),
    };
    Ok(key)
}

async fn connect(config: &PipelineConfig, url_override: Option<String>) -> Result<Db> {
    log_config_snapshot("steam_pulse", PipelineConfig::LOGGED_KEYS);
    let url = match url_override {
        Some(url) => url,
        None => db_url()?,
    };
    Db::connect(&url, config.db_max_conns).await
}

async fn execute<T: Transport, S: Store>(
    pipeline: &Pipeline<T, S>,
    run: RunKey,
    attempts: u32,
    delay: Duration,
) -> Result<()> {
    let report = pipeline
        .run_with_retries(run, attempts, delay)
        .await
        .with_context(|| format!("run {run} failed after {attempts} attempt(s)"))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
