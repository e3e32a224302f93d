//! bet365 tables built from saved pages.
//!
//! The odds page is read into `bet365_odds.csv` as shown on the site. A
//! separate consolidation step resolves both fighter names and pairs every
//! line with the stored fight dated closest to it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use fightstats_adapters::bet365::{parse_bets, parse_odds_page};
use fightstats_core::{Bet365Bet, Bet365FightOdds, Bet365Odds, Event, Fight, Fighter, FighterName, Record, Source};
use fightstats_storage::RecordStore;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::identity::{FighterNameTable, IdentityResolver};
use crate::{ScrapeConfig, ScrapeSummary, TableSummary};

pub const DEFAULT_MAX_DATE_DIFF_DAYS: i64 = 3;

fn open_store(folder: &Path, spec: fightstats_core::TableSpec) -> Result<RecordStore> {
    RecordStore::open(folder, spec).with_context(|| format!("opening {}", spec.file_name))
}

fn stored<T: Record>(folder: &Path) -> Result<Vec<T>> {
    open_store(folder, T::TABLE)?
        .records()
        .with_context(|| format!("decoding {}", T::TABLE.file_name))
}

/// Append the records the store does not hold yet, then drop duplicates.
fn append_new<T: Record>(store: &RecordStore, records: &[T]) -> Result<TableSummary> {
    let mut counts = TableSummary::default();
    let mut appender = store.appender()?;
    for record in records {
        if store.contains(&record.to_row()) {
            counts.skipped += 1;
        } else {
            appender.append(record)?;
            counts.scraped += 1;
        }
    }
    drop(appender);
    let dropped = store.remove_duplicates()?;
    debug!(table = store.spec().file_name, dropped, "deduplicated");
    Ok(counts)
}

fn modified_at(path: &Path) -> Result<NaiveDateTime> {
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("reading modification time of {}", path.display()))?;
    Ok(DateTime::<Local>::from(modified).naive_local())
}

/// Store the fight lines of a saved bet365 odds page. Without `captured_at`
/// the file's modification time is used.
pub fn read_bet365_odds(
    config: &ScrapeConfig,
    html_path: &Path,
    captured_at: Option<NaiveDateTime>,
) -> Result<ScrapeSummary> {
    let run_id = Uuid::new_v4();
    let _span = info_span!("bet365_odds", %run_id, page = %html_path.display()).entered();
    let mut summary = ScrapeSummary::start(run_id);

    let captured_at = match captured_at {
        Some(at) => at,
        None => modified_at(html_path)?,
    };
    let html = fs::read_to_string(html_path)
        .with_context(|| format!("reading {}", html_path.display()))?;
    let rows = parse_odds_page(&html, captured_at)
        .with_context(|| format!("parsing {}", html_path.display()))?;
    info!(lines = rows.len(), %captured_at, "odds page parsed");

    let store = open_store(&config.data_folder, Bet365Odds::TABLE)?;
    summary.record(Bet365Odds::TABLE.file_name, append_new(&store, &rows)?);
    Ok(summary.finish())
}

/// Fights grouped by unordered fighter pair, each with its event date.
struct FightCalendar {
    by_pair: HashMap<(String, String), Vec<(String, NaiveDate)>>,
    by_fighter: HashMap<String, Vec<(String, NaiveDate)>>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl FightCalendar {
    fn new(events: &[Event], fights: &[Fight]) -> Self {
        let dates = events
            .iter()
            .filter_map(|event| Some((event.event_id.as_str(), event.parsed_date()?)))
            .collect::<HashMap<_, _>>();
        let mut by_pair: HashMap<_, Vec<_>> = HashMap::new();
        let mut by_fighter: HashMap<_, Vec<_>> = HashMap::new();
        for fight in fights {
            let Some(&date) = dates.get(fight.event_id.as_str()) else {
                continue;
            };
            let [red, blue] = fight.fighters();
            let entry = (fight.fight_id.clone(), date);
            by_pair.entry(pair_key(red, blue)).or_default().push(entry.clone());
            for fighter in [red, blue] {
                by_fighter.entry(fighter.to_string()).or_default().push(entry.clone());
            }
        }
        for fights in by_fighter.values_mut() {
            fights.sort_by_key(|(_, date)| *date);
        }
        Self { by_pair, by_fighter }
    }

    /// Fight between `a` and `b` closest to `date`, within `max_days`.
    fn closest(&self, a: &str, b: &str, date: NaiveDate, max_days: i64) -> Option<&str> {
        self.by_pair
            .get(&pair_key(a, b))?
            .iter()
            .map(|(id, fight_date)| (id, (*fight_date - date).num_days().abs()))
            .filter(|(_, diff)| *diff <= max_days)
            .min_by_key(|(_, diff)| *diff)
            .map(|(id, _)| id.as_str())
    }

    /// First fight of `fighter` on or after `date`.
    fn next_for(&self, fighter: &str, date: NaiveDate) -> Option<&str> {
        self.by_fighter
            .get(fighter)?
            .iter()
            .find(|(_, fight_date)| *fight_date >= date)
            .map(|(id, _)| id.as_str())
    }
}

fn bet365_name(fighter_id: &str, name: &str) -> FighterName {
    FighterName {
        fighter_id: fighter_id.to_string(),
        database: Source::Bet365,
        name: name.to_string(),
        database_id: name.to_string(),
    }
}

/// Pair stored bet365 odds lines with UFCStats fights and fighters.
pub fn consolidate_bet365_odds(
    config: &ScrapeConfig,
    max_date_diff_days: i64,
    min_match_score: u8,
) -> Result<ScrapeSummary> {
    let run_id = Uuid::new_v4();
    let _span = info_span!("bet365_consolidate", %run_id, max_date_diff_days, min_match_score).entered();
    let folder = config.data_folder.as_path();
    let mut summary = ScrapeSummary::start(run_id);

    let lines = stored::<Bet365Odds>(folder)?;
    let calendar = FightCalendar::new(&stored::<Event>(folder)?, &stored::<Fight>(folder)?);
    let mut names = FighterNameTable::open(folder).context("opening fighter names")?;
    let reference_rows = names.ensure_reference_names(&stored::<Fighter>(folder)?)?;

    let mut odds = Vec::new();
    let mut confirmed = Vec::new();
    let mut failed = 0;
    {
        let resolver = IdentityResolver::new(&names).with_threshold(min_match_score);
        for line in &lines {
            let resolved = resolver
                .resolve(&line.fighter_name, &Source::Bet365)
                .and_then(|a| Ok((a, resolver.resolve(&line.opponent_name, &Source::Bet365)?)));
            let (fighter, opponent) = match resolved {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(fighter = %line.fighter_name, opponent = %line.opponent_name, %err, "bet365 line not resolved");
                    failed += 2;
                    continue;
                }
            };
            let (fighter_id, opponent_id) = (fighter.fighter_id(), opponent.fighter_id());
            let Some(fight_id) = calendar.closest(fighter_id, opponent_id, line.fight_date, max_date_diff_days) else {
                info!(fighter_id, opponent_id, date = %line.fight_date, "no stored fight near bet365 date");
                failed += 2;
                continue;
            };
            for (id, price) in [(fighter_id, line.fighter_odds), (opponent_id, line.opponent_odds)] {
                odds.push(Bet365FightOdds {
                    fight_id: fight_id.to_string(),
                    fighter_id: id.to_string(),
                    captured_at: line.captured_at,
                    odds: price,
                });
            }
            confirmed.push(bet365_name(fighter_id, &line.fighter_name));
            confirmed.push(bet365_name(opponent_id, &line.opponent_name));
        }
    }

    let store = open_store(folder, Bet365FightOdds::TABLE)?;
    let mut counts = append_new(&store, &odds)?;
    counts.failed = failed;
    summary.record(Bet365FightOdds::TABLE.file_name, counts);
    summary.record(
        FighterName::TABLE.file_name,
        TableSummary {
            scraped: reference_rows + names.append_once(confirmed)?,
            ..TableSummary::default()
        },
    );
    let summary = summary.finish();
    info!(tables = ?summary.tables, "bet365 odds consolidated");
    Ok(summary)
}

/// Store every selection of a saved bet365 settled-bets page against the
/// selected fighter's next fight.
pub fn record_bet365_bets(
    config: &ScrapeConfig,
    html_path: &Path,
    min_match_score: u8,
) -> Result<ScrapeSummary> {
    let run_id = Uuid::new_v4();
    let _span = info_span!("bet365_bets", %run_id, page = %html_path.display()).entered();
    let folder = config.data_folder.as_path();
    let mut summary = ScrapeSummary::start(run_id);

    let html = fs::read_to_string(html_path)
        .with_context(|| format!("reading {}", html_path.display()))?;
    let placed = parse_bets(&html).with_context(|| format!("parsing {}", html_path.display()))?;
    let calendar = FightCalendar::new(&stored::<Event>(folder)?, &stored::<Fight>(folder)?);
    let mut names = FighterNameTable::open(folder).context("opening fighter names")?;
    names.ensure_reference_names(&stored::<Fighter>(folder)?)?;

    let mut bets = Vec::new();
    let mut confirmed = Vec::new();
    let mut failed = 0;
    {
        let resolver = IdentityResolver::new(&names).with_threshold(min_match_score);
        for bet in &placed {
            for selection in &bet.selections {
                let fighter_id = match resolver.resolve(&selection.fighter_name, &Source::Bet365) {
                    Ok(resolution) => resolution.fighter_id().to_string(),
                    Err(err) => {
                        warn!(selection = %selection.label, %err, "bet selection not resolved");
                        failed += 1;
                        continue;
                    }
                };
                let Some(fight_id) = calendar.next_for(&fighter_id, bet.placed_at.date()) else {
                    info!(%fighter_id, placed_at = %bet.placed_at, "no stored fight after bet");
                    failed += 1;
                    continue;
                };
                bets.push(Bet365Bet {
                    placed_at: bet.placed_at,
                    fight_id: fight_id.to_string(),
                    stake: bet.stake,
                    acca_boost: bet.acca_boost,
                    bonus: bet.bonus,
                    returns: bet.returns,
                    odds: selection.odds,
                    bet_type: selection.bet_type.as_str().to_string(),
                });
                confirmed.push(bet365_name(&fighter_id, &selection.fighter_name));
            }
        }
    }
    info!(bets = placed.len(), selections = bets.len() + failed, "bets page parsed");

    let store = open_store(folder, Bet365Bet::TABLE)?;
    let mut counts = append_new(&store, &bets)?;
    counts.failed = failed;
    summary.record(Bet365Bet::TABLE.file_name, counts);
    summary.record(
        FighterName::TABLE.file_name,
        TableSummary {
            scraped: names.append_once(confirmed)?,
            ..TableSummary::default()
        },
    );
    Ok(summary.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fightstats_core::NULL;

    fn fighter(id: &str, first: &str, last: &str) -> Fighter {
        Fighter {
            fighter_id: id.into(),
            first_name: first.into(),
            last_name: last.into(),
            nickname: NULL.into(),
            height_cm: NULL.into(),
            weight_lbs: NULL.into(),
            reach_cm: NULL.into(),
            stance: NULL.into(),
            dob: NULL.into(),
            wins: "0".into(),
            losses: "0".into(),
            draws: "0".into(),
            no_contests: "0".into(),
        }
    }

    fn event(id: &str, date: &str) -> Event {
        Event {
            event_id: id.into(),
            name: format!("UFC {id}"),
            date: date.into(),
            city: NULL.into(),
            state: NULL.into(),
            country: NULL.into(),
        }
    }

    fn fight(id: &str, event_id: &str, red: &str, blue: &str) -> Fight {
        Fight {
            fight_id: id.into(),
            event_id: event_id.into(),
            referee: NULL.into(),
            fighter_1: red.into(),
            fighter_2: blue.into(),
            winner: NULL.into(),
            num_rounds: "5".into(),
            title_fight: "T".into(),
            weight_class: "Heavyweight".into(),
            gender: "M".into(),
            result: NULL.into(),
            result_details: NULL.into(),
            finish_round: 0,
            finish_time: NULL.into(),
            time_format: "5 Rnd (5-5-5-5-5)".into(),
        }
    }

    fn store_all<T: Record>(folder: &Path, records: &[T]) {
        let store = RecordStore::open(folder, T::TABLE).unwrap();
        let mut appender = store.appender().unwrap();
        for record in records {
            appender.append(record).unwrap();
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    /// Jones fought Miocic in November 2024 and again in a made-up rematch
    /// a year later; Zhang fought Suarez in February 2025.
    fn seeded() -> (tempfile::TempDir, ScrapeConfig) {
        let dir = tempfile::tempdir().unwrap();
        store_all(
            dir.path(),
            &[
                fighter("jj", "Jon", "Jones"),
                fighter("sm", "Stipe", "Miocic"),
                fighter("wz", "Weili", "Zhang"),
                fighter("ts", "Tatiana", "Suarez"),
            ],
        );
        store_all(
            dir.path(),
            &[
                event("309", "2024-11-16"),
                event("312", "2025-02-08"),
                event("325", "2025-11-15"),
            ],
        );
        store_all(
            dir.path(),
            &[
                fight("f1", "309", "jj", "sm"),
                fight("f2", "312", "wz", "ts"),
                fight("f3", "325", "sm", "jj"),
            ],
        );
        let config = ScrapeConfig {
            data_folder: dir.path().to_path_buf(),
            ..ScrapeConfig::default()
        };
        (dir, config)
    }

    fn line(date: NaiveDate, fighter: &str, opponent: &str, odds: (f64, f64)) -> Bet365Odds {
        Bet365Odds {
            captured_at: at(2024, 11, 10, 12),
            fight_date: date,
            fighter_name: fighter.into(),
            opponent_name: opponent.into(),
            fighter_odds: Some(odds.0),
            opponent_odds: Some(odds.1),
        }
    }

    #[test]
    fn odds_page_is_stored_once() {
        let (dir, config) = seeded();
        let page = dir.path().join("odds.html");
        fs::write(
            &page,
            r#"<div class="gl-MarketGroupContainer"><div>
                <div class="rcl-MarketHeaderLabel">Sat 16 Nov</div>
                <div><div class="src-ParticipantFixtureDetailsHigher_TeamWrapper">Jon Jones</div>
                <div class="src-ParticipantFixtureDetailsHigher_TeamWrapper">Stipe Miocic</div></div>
            </div><div>
                <span class="src-ParticipantOddsOnly50_Odds">1.22</span>
                <span class="src-ParticipantOddsOnly50_Odds">4.50</span>
            </div></div>"#,
        )
        .unwrap();
        let captured = at(2024, 11, 10, 12);

        let first = read_bet365_odds(&config, &page, Some(captured)).unwrap();
        assert_eq!(first.table("bet365_odds.csv").scraped, 1);
        let again = read_bet365_odds(&config, &page, Some(captured)).unwrap();
        assert_eq!(again.table("bet365_odds.csv").skipped, 1);

        let rows = stored::<Bet365Odds>(dir.path()).unwrap();
        assert_eq!(
            rows,
            [line(NaiveDate::from_ymd_opt(2024, 11, 16).unwrap(), "Jon Jones", "Stipe Miocic", (1.22, 4.5))]
        );
    }

    #[test]
    fn consolidation_picks_the_closest_fight_in_either_corner_order() {
        let (dir, config) = seeded();
        let nov_16 = NaiveDate::from_ymd_opt(2024, 11, 16).unwrap();
        store_all(
            dir.path(),
            &[
                // listed a day late, corners reversed against the stored fight
                line(nov_16.succ_opt().unwrap(), "Stipe Miocic", "Jon Jones", (4.5, 1.22)),
                line(NaiveDate::from_ymd_opt(2025, 2, 8).unwrap(), "Weili Zhang", "Tatiana Suarez", (1.57, 2.4)),
            ],
        );

        let summary = consolidate_bet365_odds(&config, DEFAULT_MAX_DATE_DIFF_DAYS, 90).unwrap();
        assert_eq!(
            summary.table("bet365_fight_odds.csv"),
            TableSummary {
                scraped: 4,
                skipped: 0,
                failed: 0
            }
        );

        let stored_odds = stored::<Bet365FightOdds>(dir.path()).unwrap();
        let pairs = stored_odds
            .iter()
            .map(|o| (o.fight_id.as_str(), o.fighter_id.as_str(), o.odds))
            .collect::<Vec<_>>();
        assert_eq!(
            pairs,
            [
                ("f1", "sm", Some(4.5)),
                ("f1", "jj", Some(1.22)),
                ("f2", "wz", Some(1.57)),
                ("f2", "ts", Some(2.4)),
            ]
        );

        let names = FighterNameTable::open(dir.path()).unwrap();
        assert_eq!(names.of_fighter("sm", &Source::Bet365).count(), 1);

        let rerun = consolidate_bet365_odds(&config, DEFAULT_MAX_DATE_DIFF_DAYS, 90).unwrap();
        assert_eq!(rerun.table("bet365_fight_odds.csv").skipped, 4);
        assert_eq!(rerun.table("fighter_names.csv").scraped, 0);
    }

    #[test]
    fn unresolved_names_and_far_dates_are_counted_as_failed() {
        let (dir, config) = seeded();
        store_all(
            dir.path(),
            &[
                line(NaiveDate::from_ymd_opt(2024, 11, 16).unwrap(), "Conor McGregor", "Jon Jones", (2.0, 1.8)),
                line(NaiveDate::from_ymd_opt(2024, 11, 30).unwrap(), "Jon Jones", "Stipe Miocic", (1.22, 4.5)),
            ],
        );

        let summary = consolidate_bet365_odds(&config, DEFAULT_MAX_DATE_DIFF_DAYS, 90).unwrap();
        assert_eq!(
            summary.table("bet365_fight_odds.csv"),
            TableSummary {
                scraped: 0,
                skipped: 0,
                failed: 4
            }
        );
        assert!(stored::<Bet365FightOdds>(dir.path()).unwrap().is_empty());
        let names = FighterNameTable::open(dir.path()).unwrap();
        assert_eq!(names.in_source(&Source::Bet365).count(), 0);
    }

    #[test]
    fn ambiguous_bet365_name_is_not_consolidated() {
        let (dir, config) = seeded();
        let mut names = FighterNameTable::open(dir.path()).unwrap();
        names
            .append_once([bet365_name("jj", "J. Jones"), bet365_name("sm", "J. Jones")])
            .unwrap();
        store_all(
            dir.path(),
            &[line(NaiveDate::from_ymd_opt(2024, 11, 16).unwrap(), "J. Jones", "Stipe Miocic", (1.22, 4.5))],
        );

        let summary = consolidate_bet365_odds(&config, DEFAULT_MAX_DATE_DIFF_DAYS, 90).unwrap();
        assert_eq!(summary.table("bet365_fight_odds.csv").failed, 2);
        assert!(stored::<Bet365FightOdds>(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn bets_land_on_the_next_fight_of_the_selection() {
        let (dir, config) = seeded();
        let page = dir.path().join("bets.html");
        fs::write(
            &page,
            r#"<div class="h-BetSummary">
                <div class="h-BetSummary_DateAndTime">14/11/2024 20:00</div>
                <div class="h-StakeReturnSection_StakeContainer"><div>Stake €10.00</div></div>
                <div class="h-StakeReturnSection_ReturnText">Return €12.20</div>
                <div class="h-BetSelection">
                  <div class="h-BetSelection_Name">Jon Jones por KO/TKO</div>
                  <div class="h-BetSelection_Odds"><span>2.60</span></div>
                </div>
                <div class="h-BetSelection">
                  <div class="h-BetSelection_Name">Khabib Nurmagomedov</div>
                  <div class="h-BetSelection_Odds"><span>1.10</span></div>
                </div>
            </div>"#,
        )
        .unwrap();

        let summary = record_bet365_bets(&config, &page, 90).unwrap();
        assert_eq!(
            summary.table("bet365_bets.csv"),
            TableSummary {
                scraped: 1,
                skipped: 0,
                failed: 1
            }
        );
        let bets = stored::<Bet365Bet>(dir.path()).unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].fight_id, "f1", "earliest fight on or after the bet");
        assert_eq!(bets[0].bet_type, "Method");
        assert_eq!(bets[0].stake, Some(10.0));
        assert_eq!(bets[0].returns, Some(12.2));
        assert_eq!(bets[0].odds, Some(2.6));

        let names = FighterNameTable::open(dir.path()).unwrap();
        let jones = names.of_fighter("jj", &Source::Bet365).collect::<Vec<_>>();
        assert_eq!(jones.len(), 1);
        assert_eq!(jones[0].name, "Jon Jones");
    }
}
