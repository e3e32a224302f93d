//! Scrape pipeline orchestration: UFCStats tables, BestFightOdds odds, bet365
//! page imports, identity reconciliation and the missing-odds report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub mod bet365;
pub mod config;
pub mod identity;
pub mod matcher;
pub mod odds;
pub mod ufcstats;

pub use bet365::{consolidate_bet365_odds, read_bet365_odds, record_bet365_bets};
pub use config::ScrapeConfig;
pub use identity::{FighterNameTable, IdentityError, IdentityResolver, Resolution};
pub use matcher::{MatchOutcome, WindowedMatcher};
pub use odds::{check_missing_odds, scrape_odds, MissingOdds};
pub use ufcstats::scrape_ufcstats;

pub const CRATE_NAME: &str = "fightstats-sync";

/// Per-table outcome counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub scraped: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl TableSummary {
    pub fn merge(&mut self, other: TableSummary) {
        self.scraped += other.scraped;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tables: BTreeMap<String, TableSummary>,
}

impl ScrapeSummary {
    pub fn start(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            tables: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, table: &str, counts: TableSummary) {
        self.tables.entry(table.to_string()).or_default().merge(counts);
    }

    pub fn table(&self, table: &str) -> TableSummary {
        self.tables.get(table).copied().unwrap_or_default()
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }
}
