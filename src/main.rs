mod alerts;
mod check;
mod config;
mod control;
mod daemon;
mod fetch;
mod logging;
mod matcher;
mod scheduler;
mod settings;
mod store;
mod utils;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use check::CheckOutcome;
use config::file::read_config_file;
use config::validation::{validate_config, ValidationResult};
use config::{parse_config_file, Config};
use settings::{validate_interval, validate_keyword, validate_url, Key, RunFlag};
use store::{ConfigStore, SqlStore};

#[derive(Parser, Debug)]
#[command(version, about = "Watches a web page for a keyword", long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: String,

    /// Print config validation result
    #[arg(long)]
    validate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Change the watched page, keyword or check interval
    Set {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        keyword: Option<String>,
        /// Minutes between checks: 10, 15, 30 or 60
        #[arg(long)]
        interval: Option<u32>,
    },
    /// Enable watching, optionally changing the interval
    Start {
        #[arg(long)]
        interval: Option<u32>,
    },
    /// Disable watching, in-flight checks end at their next step
    Stop,
    /// Show the stored settings and match counters
    Status,
    /// Run a single check right now
    Check,
    /// Reset the match counters, to zero unless given
    Reset {
        #[arg(long, default_value_t = 0)]
        count: u64,
        /// Last match time as "DD/MM/YYYY HH:MM:SS"
        #[arg(long)]
        last_match: Option<String>,
    },
    /// Run the watcher until interrupted
    Run,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_file = read_config_file(&args.config)?;
    let config = parse_config_file(&config_file)?;

    logging::setup_logging(&config.logging)?;

    info!("Starting keyword-watch with config file: {}", args.config);

    if args.validate {
        let info = validate_config(&config_file);

        for msg in &info {
            match msg {
                ValidationResult::Error(m) => {
                    error!("{}", m);
                }
                ValidationResult::Warning(m) => {
                    warn!("{}", m);
                }
            }
        }

        if info.is_empty() {
            info!("Config file is valid");
        }
    }

    debug!("Parsed config: {:?}", config);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(execute(args.command, &config))?;

    info!("Exiting");
    Ok(())
}

async fn execute(command: Command, config: &Config) -> anyhow::Result<()> {
    let store: Arc<dyn ConfigStore> = Arc::new(
        SqlStore::open(&config.store)
            .await
            .with_context(|| format!("Failed to open store '{}'", config.store.display()))?,
    );

    match command {
        Command::Set { url, keyword, interval } => {
            let mut entries = vec![];
            if let Some(url) = url {
                validate_url(&url)?;
                entries.push((Key::Url, Some(url.trim().to_string())));
            }
            if let Some(keyword) = keyword {
                validate_keyword(&keyword)?;
                entries.push((Key::Keyword, Some(keyword)));
            }
            if let Some(minutes) = interval {
                let frequency = validate_interval(minutes)?;
                entries.push((Key::IntervalMinutes, Some(frequency.minutes().to_string())));
            }
            if entries.is_empty() {
                bail!("Nothing to set, pass --url, --keyword or --interval");
            }
            store.set_many(&entries).await?;
            info!("Updated {} setting(s)", entries.len());
        }
        Command::Start { interval } => {
            let mut entries = vec![(Key::RunFlag, Some(RunFlag::Active.as_str().to_string()))];
            if let Some(minutes) = interval {
                let frequency = validate_interval(minutes)?;
                entries.push((Key::IntervalMinutes, Some(frequency.minutes().to_string())));
            }
            store.set_many(&entries).await?;
            println!("Watching enabled, a running daemon picks it up on its next poll");
        }
        Command::Stop => {
            store.set_run_flag(RunFlag::Stopped).await?;
            println!("Watching disabled");
        }
        Command::Status => {
            print_status(store.as_ref(), config).await?;
        }
        Command::Check => {
            let check = daemon::build_check(config, store.clone())?;
            match check.run(&CancellationToken::new()).await? {
                CheckOutcome::Matched(state) => println!("Match, count is now {}", state.count),
                CheckOutcome::NoMatch => println!("No match"),
                CheckOutcome::Stopped { at } => {
                    println!("Watching is stopped, nothing done ({})", at)
                }
            }
        }
        Command::Reset { count, last_match } => {
            let last_match_at = match last_match {
                Some(text) => Some(utils::parse_timestamp(&text, &config.timezone)?),
                None => None,
            };
            if count == 0 && last_match_at.is_some() {
                bail!("A last match time needs a positive count");
            }
            store
                .save_match_state(&settings::MatchState { count, last_match_at })
                .await?;
            println!("Match counter set to {}", count);
        }
        Command::Run => {
            daemon::run(config, store).await?;
        }
    }

    Ok(())
}

async fn print_status(store: &dyn ConfigStore, config: &Config) -> anyhow::Result<()> {
    let value = |v: Option<String>| v.unwrap_or_else(|| "<unset>".to_string());

    let state = store.match_state().await?;
    println!("url:        {}", value(store.get(Key::Url).await?));
    println!("keyword:    {}", value(store.get(Key::Keyword).await?));
    println!("interval:   {} minutes", store.frequency().await?.minutes());
    println!("state:      {}", store.run_flag().await?);
    println!("matches:    {}", state.count);
    println!(
        "last match: {}",
        state
            .last_match_at
            .map(|ms| utils::format_timestamp(ms, &config.timezone))
            .unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}
