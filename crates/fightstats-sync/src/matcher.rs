//! Date-windowed fuzzy matching of a UFCStats bout against profile odds entries.

use chrono::NaiveDate;
use fightstats_adapters::bestfightodds::OddsEntry;
use fightstats_core::token_sort_ratio;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched { candidate: usize, score: u8 },
    NoCandidates,
    BelowThreshold { best_score: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowedMatcher {
    pub window_days: f64,
    /// Scores must be strictly greater to count as a match.
    pub threshold: u8,
}

impl Default for WindowedMatcher {
    fn default() -> Self {
        Self {
            window_days: 1.5,
            threshold: 90,
        }
    }
}

impl WindowedMatcher {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Indices of entries dated within the window around `date`.
    pub fn candidates(&self, date: NaiveDate, entries: &[OddsEntry]) -> Vec<usize> {
        entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| ((entry.date - date).num_days() as f64).abs() <= self.window_days)
            .map(|(i, _)| i)
            .collect()
    }

    /// Best candidate whose opponent name matches any alias of the real opponent.
    pub fn match_record(&self, date: NaiveDate, aliases: &[&str], entries: &[OddsEntry]) -> MatchOutcome {
        let mut best: Option<(usize, u8)> = None;
        for index in self.candidates(date, entries) {
            let opponent = entries[index].opponent_name.as_str();
            let score = aliases
                .iter()
                .map(|alias| token_sort_ratio(alias, opponent))
                .max()
                .unwrap_or(0);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((index, score));
            }
        }

        match best {
            None => MatchOutcome::NoCandidates,
            Some((candidate, score)) if score > self.threshold => MatchOutcome::Matched { candidate, score },
            Some((_, best_score)) => MatchOutcome::BelowThreshold { best_score },
        }
    }
}
