//! Core domain records, table schemas and fuzzy name scoring for fightstats.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod fuzzy;

pub use fuzzy::{best_match, token_sort_ratio};

pub const CRATE_NAME: &str = "fightstats-core";

/// Sentinel written for every value a page did not provide.
pub const NULL: &str = "NULL";

/// Fixed column schema plus the file it persists to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub file_name: &'static str,
    pub columns: &'static [&'static str],
}

impl TableSpec {
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| *c == name)
    }
}

/// Data provider a name or identifier originates from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
    UfcStats,
    BestFightOdds,
    Bet365,
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::UfcStats => "UFCStats",
            Source::BestFightOdds => "BestFightOdds",
            Source::Bet365 => "bet365",
            Source::Other(tag) => tag,
        }
    }
}

impl From<&str> for Source {
    fn from(tag: &str) -> Self {
        match tag {
            "UFCStats" => Source::UfcStats,
            "BestFightOdds" => Source::BestFightOdds,
            "bet365" => Source::Bet365,
            other => Source::Other(other.to_string()),
        }
    }
}

impl From<String> for Source {
    fn from(tag: String) -> Self {
        Source::from(tag.as_str())
    }
}

impl From<Source> for String {
    fn from(source: Source) -> Self {
        source.as_str().to_string()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("{table}: expected {expected} columns, got {actual}")]
    Width {
        table: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{table}: invalid {column} value {value:?}")]
    Value {
        table: &'static str,
        column: &'static str,
        value: String,
    },
}

/// Typed view over one row of a [`TableSpec`] table.
pub trait Record: Sized {
    const TABLE: TableSpec;

    fn to_row(&self) -> Vec<String>;

    fn from_row(row: &[String]) -> Result<Self, RecordError>;
}

fn check_width(table: TableSpec, row: &[String]) -> Result<(), RecordError> {
    if row.len() != table.width() {
        return Err(RecordError::Width {
            table: table.file_name,
            expected: table.width(),
            actual: row.len(),
        });
    }
    Ok(())
}

/// Render an optional value, substituting the `NULL` sentinel.
pub fn null_or<T: fmt::Display>(value: Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => NULL.to_string(),
    }
}

/// Parse a stored cell, treating the `NULL` sentinel and blanks as absent.
pub fn parse_nullable<T: std::str::FromStr>(cell: &str) -> Option<T> {
    let cell = cell.trim();
    if cell.is_empty() || cell == NULL {
        return None;
    }
    cell.parse().ok()
}

/// Last path segment of a detail-page URL, ignoring a trailing slash.
pub fn id_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub name: String,
    pub date: String,
    pub city: String,
    pub state: String,
    pub country: String,
}

impl Record for Event {
    const TABLE: TableSpec = TableSpec {
        file_name: "event_data.csv",
        columns: &[
            "event_id",
            "event_name",
            "event_date",
            "event_city",
            "event_state",
            "event_country",
        ],
    };

    fn to_row(&self) -> Vec<String> {
        vec![
            self.event_id.clone(),
            self.name.clone(),
            self.date.clone(),
            self.city.clone(),
            self.state.clone(),
            self.country.clone(),
        ]
    }

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        check_width(Self::TABLE, row)?;
        Ok(Self {
            event_id: row[0].clone(),
            name: row[1].clone(),
            date: row[2].clone(),
            city: row[3].clone(),
            state: row[4].clone(),
            country: row[5].clone(),
        })
    }
}

impl Event {
    pub fn parsed_date(&self) -> Option<chrono::NaiveDate> {
        chrono::NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fighter {
    pub fighter_id: String,
    pub first_name: String,
    pub last_name: String,
    pub nickname: String,
    pub height_cm: String,
    pub weight_lbs: String,
    pub reach_cm: String,
    pub stance: String,
    pub dob: String,
    pub wins: String,
    pub losses: String,
    pub draws: String,
    pub no_contests: String,
}

impl Fighter {
    /// Display name as UFCStats prints it.
    pub fn full_name(&self) -> String {
        let last = if self.last_name == NULL { "" } else { self.last_name.as_str() };
        format!("{} {}", self.first_name, last).trim().to_string()
    }
}

impl Record for Fighter {
    const TABLE: TableSpec = TableSpec {
        file_name: "fighter_data.csv",
        columns: &[
            "fighter_id",
            "fighter_f_name",
            "fighter_l_name",
            "fighter_nickname",
            "fighter_height_cm",
            "fighter_weight_lbs",
            "fighter_reach_cm",
            "fighter_stance",
            "fighter_dob",
            "fighter_w",
            "fighter_l",
            "fighter_d",
            "fighter_nc_dq",
        ],
    };

    fn to_row(&self) -> Vec<String> {
        vec![
            self.fighter_id.clone(),
            self.first_name.clone(),
            self.last_name.clone(),
            self.nickname.clone(),
            self.height_cm.clone(),
            self.weight_lbs.clone(),
            self.reach_cm.clone(),
            self.stance.clone(),
            self.dob.clone(),
            self.wins.clone(),
            self.losses.clone(),
            self.draws.clone(),
            self.no_contests.clone(),
        ]
    }

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        check_width(Self::TABLE, row)?;
        Ok(Self {
            fighter_id: row[0].clone(),
            first_name: row[1].clone(),
            last_name: row[2].clone(),
            nickname: row[3].clone(),
            height_cm: row[4].clone(),
            weight_lbs: row[5].clone(),
            reach_cm: row[6].clone(),
            stance: row[7].clone(),
            dob: row[8].clone(),
            wins: row[9].clone(),
            losses: row[10].clone(),
            draws: row[11].clone(),
            no_contests: row[12].clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fight {
    pub fight_id: String,
    pub event_id: String,
    pub referee: String,
    pub fighter_1: String,
    pub fighter_2: String,
    pub winner: String,
    pub num_rounds: String,
    pub title_fight: String,
    pub weight_class: String,
    pub gender: String,
    pub result: String,
    pub result_details: String,
    pub finish_round: u32,
    pub finish_time: String,
    pub time_format: String,
}

impl Fight {
    pub fn fighters(&self) -> [&str; 2] {
        [&self.fighter_1, &self.fighter_2]
    }
}

impl Record for Fight {
    const TABLE: TableSpec = TableSpec {
        file_name: "fight_data.csv",
        columns: &[
            "fight_id",
            "event_id",
            "referee",
            "fighter_1",
            "fighter_2",
            "winner",
            "num_rounds",
            "title_fight",
            "weight_class",
            "gender",
            "result",
            "result_details",
            "finish_round",
            "finish_time",
            "time_format",
        ],
    };

    fn to_row(&self) -> Vec<String> {
        vec![
            self.fight_id.clone(),
            self.event_id.clone(),
            self.referee.clone(),
            self.fighter_1.clone(),
            self.fighter_2.clone(),
            self.winner.clone(),
            self.num_rounds.clone(),
            self.title_fight.clone(),
            self.weight_class.clone(),
            self.gender.clone(),
            self.result.clone(),
            self.result_details.clone(),
            self.finish_round.to_string(),
            self.finish_time.clone(),
            self.time_format.clone(),
        ]
    }

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        check_width(Self::TABLE, row)?;
        let finish_round = row[12].trim().parse().map_err(|_| RecordError::Value {
            table: Self::TABLE.file_name,
            column: "finish_round",
            value: row[12].clone(),
        })?;
        Ok(Self {
            fight_id: row[0].clone(),
            event_id: row[1].clone(),
            referee: row[2].clone(),
            fighter_1: row[3].clone(),
            fighter_2: row[4].clone(),
            winner: row[5].clone(),
            num_rounds: row[6].clone(),
            title_fight: row[7].clone(),
            weight_class: row[8].clone(),
            gender: row[9].clone(),
            result: row[10].clone(),
            result_details: row[11].clone(),
            finish_round,
            finish_time: row[13].clone(),
            time_format: row[14].clone(),
        })
    }
}

/// Statistic columns of a round row, in decode order.
pub const ROUND_STAT_FIELDS: [&str; 22] = [
    "knockdowns",
    "strikes_att",
    "strikes_succ",
    "head_strikes_att",
    "head_strikes_succ",
    "body_strikes_att",
    "body_strikes_succ",
    "leg_strikes_att",
    "leg_strikes_succ",
    "distance_strikes_att",
    "distance_strikes_succ",
    "ground_strikes_att",
    "ground_strikes_succ",
    "clinch_strikes_att",
    "clinch_strikes_succ",
    "total_strikes_att",
    "total_strikes_succ",
    "takedown_att",
    "takedown_succ",
    "submission_att",
    "reversals",
    "ctrl_time",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStats {
    pub fight_id: String,
    pub fighter_id: String,
    pub round: u32,
    pub stats: [String; 22],
}

impl RoundStats {
    pub fn stat(&self, field: &str) -> Option<&str> {
        ROUND_STAT_FIELDS
            .iter()
            .position(|f| *f == field)
            .map(|i| self.stats[i].as_str())
    }
}

impl Record for RoundStats {
    const TABLE: TableSpec = TableSpec {
        file_name: "round_data.csv",
        columns: &[
            "fight_id",
            "fighter_id",
            "round",
            "knockdowns",
            "strikes_att",
            "strikes_succ",
            "head_strikes_att",
            "head_strikes_succ",
            "body_strikes_att",
            "body_strikes_succ",
            "leg_strikes_att",
            "leg_strikes_succ",
            "distance_strikes_att",
            "distance_strikes_succ",
            "ground_strikes_att",
            "ground_strikes_succ",
            "clinch_strikes_att",
            "clinch_strikes_succ",
            "total_strikes_att",
            "total_strikes_succ",
            "takedown_att",
            "takedown_succ",
            "submission_att",
            "reversals",
            "ctrl_time",
        ],
    };

    fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(Self::TABLE.width());
        row.push(self.fight_id.clone());
        row.push(self.fighter_id.clone());
        row.push(self.round.to_string());
        row.extend(self.stats.iter().cloned());
        row
    }

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        check_width(Self::TABLE, row)?;
        let round = row[2].trim().parse().map_err(|_| RecordError::Value {
            table: Self::TABLE.file_name,
            column: "round",
            value: row[2].clone(),
        })?;
        let stats: [String; 22] = std::array::from_fn(|i| row[3 + i].clone());
        Ok(Self {
            fight_id: row[0].clone(),
            fighter_id: row[1].clone(),
            round,
            stats,
        })
    }
}

/// One `(canonical id, source, display name, source id)` identity row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FighterName {
    pub fighter_id: String,
    pub database: Source,
    pub name: String,
    pub database_id: String,
}

impl Record for FighterName {
    const TABLE: TableSpec = TableSpec {
        file_name: "fighter_names.csv",
        columns: &["fighter_id", "database", "name", "database_id"],
    };

    fn to_row(&self) -> Vec<String> {
        vec![
            self.fighter_id.clone(),
            self.database.to_string(),
            self.name.clone(),
            self.database_id.clone(),
        ]
    }

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        check_width(Self::TABLE, row)?;
        Ok(Self {
            fighter_id: row[0].clone(),
            database: Source::from(row[1].as_str()),
            name: row[2].clone(),
            database_id: row[3].clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MoneyLine {
    pub opening: Option<i32>,
    pub closing_range_min: Option<i32>,
    pub closing_range_max: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OddsRecord {
    pub fight_id: String,
    pub fighter_id: String,
    pub odds: MoneyLine,
}

impl Record for OddsRecord {
    const TABLE: TableSpec = TableSpec {
        file_name: "BestFightOdds_odds.csv",
        columns: &[
            "fight_id",
            "fighter_id",
            "opening",
            "closing_range_min",
            "closing_range_max",
        ],
    };

    fn to_row(&self) -> Vec<String> {
        vec![
            self.fight_id.clone(),
            self.fighter_id.clone(),
            null_or(self.odds.opening),
            null_or(self.odds.closing_range_min),
            null_or(self.odds.closing_range_max),
        ]
    }

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        check_width(Self::TABLE, row)?;
        Ok(Self {
            fight_id: row[0].clone(),
            fighter_id: row[1].clone(),
            odds: MoneyLine {
                opening: parse_nullable(&row[2]),
                closing_range_min: parse_nullable(&row[3]),
                closing_range_max: parse_nullable(&row[4]),
            },
        })
    }
}

/// Format of bet365 capture and placement timestamps in stored tables.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn parse_datetime(table: TableSpec, column: &'static str, cell: &str) -> Result<NaiveDateTime, RecordError> {
    NaiveDateTime::parse_from_str(cell.trim(), DATETIME_FORMAT).map_err(|_| RecordError::Value {
        table: table.file_name,
        column,
        value: cell.to_string(),
    })
}

/// One fight line read off a saved bet365 odds page, by display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet365Odds {
    /// When the page was saved.
    pub captured_at: NaiveDateTime,
    pub fight_date: NaiveDate,
    pub fighter_name: String,
    pub opponent_name: String,
    pub fighter_odds: Option<f64>,
    pub opponent_odds: Option<f64>,
}

impl Record for Bet365Odds {
    const TABLE: TableSpec = TableSpec {
        file_name: "bet365_odds.csv",
        columns: &[
            "html_datetime",
            "fight_date",
            "fighter_name",
            "opponent_name",
            "fighter_odds",
            "opponent_odds",
        ],
    };

    fn to_row(&self) -> Vec<String> {
        vec![
            self.captured_at.format(DATETIME_FORMAT).to_string(),
            self.fight_date.format("%Y-%m-%d").to_string(),
            self.fighter_name.clone(),
            self.opponent_name.clone(),
            null_or(self.fighter_odds),
            null_or(self.opponent_odds),
        ]
    }

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        check_width(Self::TABLE, row)?;
        let fight_date = NaiveDate::parse_from_str(row[1].trim(), "%Y-%m-%d").map_err(|_| {
            RecordError::Value {
                table: Self::TABLE.file_name,
                column: "fight_date",
                value: row[1].clone(),
            }
        })?;
        Ok(Self {
            captured_at: parse_datetime(Self::TABLE, "html_datetime", &row[0])?,
            fight_date,
            fighter_name: row[2].clone(),
            opponent_name: row[3].clone(),
            fighter_odds: parse_nullable(&row[4]),
            opponent_odds: parse_nullable(&row[5]),
        })
    }
}

/// A bet365 price tied to a stored fight and fighter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet365FightOdds {
    pub fight_id: String,
    pub fighter_id: String,
    pub captured_at: NaiveDateTime,
    pub odds: Option<f64>,
}

impl Record for Bet365FightOdds {
    const TABLE: TableSpec = TableSpec {
        file_name: "bet365_fight_odds.csv",
        columns: &["fight_id", "fighter_id", "html_datetime", "odds"],
    };

    fn to_row(&self) -> Vec<String> {
        vec![
            self.fight_id.clone(),
            self.fighter_id.clone(),
            self.captured_at.format(DATETIME_FORMAT).to_string(),
            null_or(self.odds),
        ]
    }

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        check_width(Self::TABLE, row)?;
        Ok(Self {
            fight_id: row[0].clone(),
            fighter_id: row[1].clone(),
            captured_at: parse_datetime(Self::TABLE, "html_datetime", &row[2])?,
            odds: parse_nullable(&row[3]),
        })
    }
}

/// One selection of a placed bet365 bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet365Bet {
    pub placed_at: NaiveDateTime,
    pub fight_id: String,
    pub stake: Option<f64>,
    pub acca_boost: Option<f64>,
    pub bonus: Option<f64>,
    pub returns: Option<f64>,
    pub odds: Option<f64>,
    /// `Winner` or `Method`.
    pub bet_type: String,
}

impl Record for Bet365Bet {
    const TABLE: TableSpec = TableSpec {
        file_name: "bet365_bets.csv",
        columns: &[
            "datetime",
            "fight_id",
            "stake",
            "acca_boost",
            "bonus",
            "return",
            "odds",
            "bet_type",
        ],
    };

    fn to_row(&self) -> Vec<String> {
        vec![
            self.placed_at.format(DATETIME_FORMAT).to_string(),
            self.fight_id.clone(),
            null_or(self.stake),
            null_or(self.acca_boost),
            null_or(self.bonus),
            null_or(self.returns),
            null_or(self.odds),
            self.bet_type.clone(),
        ]
    }

    fn from_row(row: &[String]) -> Result<Self, RecordError> {
        check_width(Self::TABLE, row)?;
        Ok(Self {
            placed_at: parse_datetime(Self::TABLE, "datetime", &row[0])?,
            fight_id: row[1].clone(),
            stake: parse_nullable(&row[2]),
            acca_boost: parse_nullable(&row[3]),
            bonus: parse_nullable(&row[4]),
            returns: parse_nullable(&row[5]),
            odds: parse_nullable(&row[6]),
            bet_type: row[7].clone(),
        })
    }
}
