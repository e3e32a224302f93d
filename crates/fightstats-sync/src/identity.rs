//! Canonical fighter identity across sources.
//!
//! Every known `(source, display name, source id)` of a fighter is stored as a
//! row of `fighter_names.csv` keyed by the UFCStats fighter id. Resolution is an
//! exact lookup first, then a fuzzy match against the reference source's names.

use std::collections::HashSet;
use std::path::Path;

use fightstats_core::{best_match, Fighter, FighterName, Record, Source};
use fightstats_storage::{RecordStore, StoreError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("no fighter matches {name:?} from {database} (best score {best_score:?})")]
    Unresolved {
        name: String,
        database: Source,
        best_score: Option<u8>,
    },
    #[error("{name:?} from {database} names several fighters: {ids:?}")]
    Ambiguous {
        name: String,
        database: Source,
        ids: Vec<String>,
    },
}

/// In-memory view of `fighter_names.csv` with append-once write-back.
#[derive(Debug)]
pub struct FighterNameTable {
    store: RecordStore,
    names: Vec<FighterName>,
}

impl FighterNameTable {
    pub fn open(data_folder: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = RecordStore::open(data_folder, FighterName::TABLE)?;
        let names = store.records()?;
        Ok(Self { store, names })
    }

    pub fn reload(&mut self) -> Result<(), StoreError> {
        self.store.load()?;
        self.names = self.store.records()?;
        Ok(())
    }

    pub fn names(&self) -> &[FighterName] {
        &self.names
    }

    pub fn contains(&self, name: &FighterName) -> bool {
        self.names.contains(name)
    }

    pub fn in_source<'a>(&'a self, database: &'a Source) -> impl Iterator<Item = &'a FighterName> + 'a {
        self.names.iter().filter(move |n| &n.database == database)
    }

    /// Rows of one canonical fighter in one source.
    pub fn of_fighter<'a>(
        &'a self,
        fighter_id: &'a str,
        database: &'a Source,
    ) -> impl Iterator<Item = &'a FighterName> + 'a {
        self.in_source(database)
            .filter(move |n| n.fighter_id == fighter_id)
    }

    /// Append the rows not already present, then reload. Returns how many were written.
    pub fn append_once(
        &mut self,
        candidates: impl IntoIterator<Item = FighterName>,
    ) -> Result<usize, StoreError> {
        let mut seen = HashSet::new();
        let fresh = candidates
            .into_iter()
            .filter(|name| !self.contains(name))
            .filter(|name| seen.insert(name.clone()))
            .collect::<Vec<_>>();
        if fresh.is_empty() {
            return Ok(0);
        }

        let mut appender = self.store.appender()?;
        for name in &fresh {
            appender.append(name)?;
        }
        drop(appender);
        self.reload()?;
        debug!(written = fresh.len(), "appended fighter names");
        Ok(fresh.len())
    }

    /// Make sure every UFCStats fighter has its own reference row.
    pub fn ensure_reference_names(&mut self, fighters: &[Fighter]) -> Result<usize, StoreError> {
        let known = self
            .in_source(&Source::UfcStats)
            .map(|n| n.fighter_id.clone())
            .collect::<HashSet<_>>();
        let missing = fighters
            .iter()
            .filter(|f| !known.contains(&f.fighter_id))
            .map(|f| FighterName {
                fighter_id: f.fighter_id.clone(),
                database: Source::UfcStats,
                name: f.full_name(),
                database_id: f.fighter_id.clone(),
            })
            .collect::<Vec<_>>();
        if missing.is_empty() {
            return Ok(0);
        }
        info!(missing = missing.len(), "adding missing UFCStats name rows");
        self.append_once(missing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Exact { fighter_id: String },
    Fuzzy {
        fighter_id: String,
        matched_name: String,
        score: u8,
    },
}

impl Resolution {
    pub fn fighter_id(&self) -> &str {
        match self {
            Resolution::Exact { fighter_id } | Resolution::Fuzzy { fighter_id, .. } => fighter_id,
        }
    }
}

/// Maps a display name seen in some source to a canonical fighter id.
#[derive(Debug, Clone, Copy)]
pub struct IdentityResolver<'a> {
    table: &'a FighterNameTable,
    threshold: u8,
}

impl<'a> IdentityResolver<'a> {
    pub const DEFAULT_THRESHOLD: u8 = 90;

    pub fn new(table: &'a FighterNameTable) -> Self {
        Self {
            table,
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }

    /// Fuzzy matches must score strictly above `threshold`.
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn resolve(&self, display_name: &str, database: &Source) -> Result<Resolution, IdentityError> {
        let mut ids = Vec::new();
        for row in self.table.in_source(database) {
            if row.name == display_name && !ids.contains(&row.fighter_id) {
                ids.push(row.fighter_id.clone());
            }
        }
        match ids.len() {
            1 => {
                return Ok(Resolution::Exact {
                    fighter_id: ids.remove(0),
                })
            }
            0 => {}
            _ => {
                return Err(IdentityError::Ambiguous {
                    name: display_name.to_string(),
                    database: database.clone(),
                    ids,
                })
            }
        }

        let reference = self
            .table
            .in_source(&Source::UfcStats)
            .collect::<Vec<_>>();
        let best = best_match(display_name, reference.iter().map(|n| n.name.as_str()));
        match best {
            Some((index, score)) if score > self.threshold => {
                let row = reference[index];
                debug!(display_name, matched = %row.name, score, "fuzzy identity match");
                Ok(Resolution::Fuzzy {
                    fighter_id: row.fighter_id.clone(),
                    matched_name: row.name.clone(),
                    score,
                })
            }
            best => Err(IdentityError::Unresolved {
                name: display_name.to_string(),
                database: database.clone(),
                best_score: best.map(|(_, score)| score),
            }),
        }
    }
}
