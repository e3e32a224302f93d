use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use fightstats_adapters::FixtureSite;
use fightstats_core::Source;
use fightstats_storage::{HttpSessionFactory, PageFetch, SessionFactory};
use fightstats_sync::bet365::DEFAULT_MAX_DATE_DIFF_DAYS;
use fightstats_sync::{
    check_missing_odds, consolidate_bet365_odds, read_bet365_odds, record_bet365_bets,
    scrape_odds, scrape_ufcstats, FighterNameTable, IdentityResolver, ScrapeConfig, ScrapeSummary,
};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "fightstats")]
#[command(about = "Scrape UFCStats fight data, BestFightOdds odds and saved bet365 pages into CSV tables")]
struct Cli {
    /// Folder holding the CSV tables.
    #[arg(long, global = true)]
    data_folder: Option<PathBuf>,
    /// Concurrent sessions.
    #[arg(long, global = true)]
    n_sessions: Option<usize>,
    /// Seconds to wait before each request.
    #[arg(long, global = true)]
    delay: Option<f64>,
    /// YAML settings applied over the environment.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Serve pages from a fixture manifest instead of the network.
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,
    /// Log filter directives, e.g. `debug` or `fightstats_sync=trace`.
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape fighters, events, fights and rounds.
    Ufcstats {
        /// Collect fight links from every stored event again.
        #[arg(long)]
        get_all_events: bool,
    },
    /// Scrape BestFightOdds odds for stored fights.
    Odds {
        #[arg(long)]
        min_date: Option<NaiveDate>,
        #[arg(long)]
        min_score: Option<u8>,
    },
    /// Print the canonical fighter id for a display name.
    Resolve {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "BestFightOdds")]
        source: String,
    },
    /// Log fights after the cut-off date that have no odds.
    CheckMissing {
        #[arg(long)]
        min_date: Option<NaiveDate>,
    },
    /// Store the fight lines of a saved bet365 odds page.
    Bet365Odds {
        #[arg(long)]
        html: PathBuf,
        /// Capture time as `2024-11-10T12:00:00`; defaults to the file's mtime.
        #[arg(long)]
        captured_at: Option<NaiveDateTime>,
    },
    /// Pair stored bet365 odds lines with UFCStats fights.
    ConsolidateBet365 {
        #[arg(long, default_value_t = DEFAULT_MAX_DATE_DIFF_DAYS)]
        max_date_diff_days: i64,
        #[arg(long, default_value_t = IdentityResolver::DEFAULT_THRESHOLD)]
        min_match_score: u8,
    },
    /// Store the selections of a saved bet365 settled-bets page.
    Bet365Bets {
        #[arg(long)]
        html: PathBuf,
        #[arg(long, default_value_t = IdentityResolver::DEFAULT_THRESHOLD)]
        min_match_score: u8,
    },
}

fn init_tracing(directives: Option<&str>) -> Result<()> {
    let filter = match directives {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter {directives:?}"))?,
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_config(cli: &Cli) -> Result<ScrapeConfig> {
    let mut config = ScrapeConfig::load(cli.config.as_deref())?;
    if let Some(folder) = &cli.data_folder {
        config.data_folder = folder.clone();
    }
    if let Some(n) = cli.n_sessions {
        config.n_sessions = n;
    }
    if let Some(delay) = cli.delay {
        config.delay_secs = delay;
    }
    match &cli.command {
        Commands::Odds {
            min_date,
            min_score,
        } => {
            if let Some(date) = min_date {
                config.min_date = *date;
            }
            if let Some(score) = min_score {
                config.min_score = *score;
            }
        }
        Commands::CheckMissing {
            min_date: Some(date),
        } => config.min_date = *date,
        _ => {}
    }
    Ok(config)
}

async fn scrape<F>(command: &Commands, config: &ScrapeConfig, factory: Arc<F>) -> Result<()>
where
    F: SessionFactory,
    F::Session: PageFetch,
{
    let summary = match command {
        Commands::Ufcstats { get_all_events } => {
            scrape_ufcstats(config, factory, *get_all_events).await?
        }
        Commands::Odds { .. } => scrape_odds(config, factory).await?,
        _ => return Ok(()),
    };
    print_summary(&summary)
}

fn print_summary(summary: &ScrapeSummary) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(summary).context("serializing run summary")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;
    let config = build_config(&cli)?;
    info!(data_folder = %config.data_folder.display(), n_sessions = config.n_sessions, "starting");

    match &cli.command {
        Commands::Resolve { name, source } => {
            let names = FighterNameTable::open(&config.data_folder).context("opening fighter names")?;
            let resolution = IdentityResolver::new(&names)
                .with_threshold(config.min_score)
                .resolve(name, &Source::from(source.as_str()))?;
            println!("{}", resolution.fighter_id());
        }
        Commands::CheckMissing { .. } => {
            let missing = check_missing_odds(&config)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&missing).context("serializing missing odds")?
            );
        }
        Commands::Bet365Odds { html, captured_at } => {
            print_summary(&read_bet365_odds(&config, html, *captured_at)?)?;
        }
        Commands::ConsolidateBet365 {
            max_date_diff_days,
            min_match_score,
        } => {
            print_summary(&consolidate_bet365_odds(
                &config,
                *max_date_diff_days,
                *min_match_score,
            )?)?;
        }
        Commands::Bet365Bets {
            html,
            min_match_score,
        } => {
            print_summary(&record_bet365_bets(&config, html, *min_match_score)?)?;
        }
        command => match &cli.fixtures {
            Some(manifest) => {
                let site = FixtureSite::load(manifest)?;
                info!(root = %site.root().display(), pages = site.len(), "serving fixture pages");
                scrape(command, &config, Arc::new(site)).await?;
            }
            None => {
                let factory = HttpSessionFactory::new(config.http_config());
                scrape(command, &config, Arc::new(factory)).await?;
            }
        },
    }
    Ok(())
}
