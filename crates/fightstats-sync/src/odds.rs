//! BestFightOdds odds scrape and the missing-odds report.
//!
//! Each stored fight is looked at from both corners. Pairs that already have
//! odds are skipped, the rest are grouped per fighter so every fighter's
//! profiles are fetched once by one pool task. Profile entries are matched to
//! the fight by date window and opponent name, and every confirmed name is
//! written back to the identity table.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use fightstats_adapters::bestfightodds::{
    parse_profile, parse_search, pick_search_hit, profile_url, search_url, FighterProfile,
    OddsEntry, SearchPage,
};
use fightstats_core::{id_from_url, Event, Fight, Fighter, FighterName, OddsRecord, Record, Source, TableSpec};
use fightstats_storage::{FanOut, PageFetch, RecordStore, SessionFactory, TaskHandler};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::identity::FighterNameTable;
use crate::matcher::{MatchOutcome, WindowedMatcher};
use crate::{ScrapeConfig, ScrapeSummary, TableSummary};

/// One fight seen from one fighter's corner.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Perspective {
    fight_id: String,
    event_id: String,
    fighter_id: String,
    opponent_id: String,
    date: NaiveDate,
}

/// Both corners of every fight whose event is dated on or after `min_date`.
/// Fights whose event is unknown or undated are left out.
fn perspectives(events: &[Event], fights: &[Fight], min_date: NaiveDate) -> Vec<Perspective> {
    let dates = events
        .iter()
        .filter_map(|event| Some((event.event_id.as_str(), event.parsed_date()?)))
        .collect::<HashMap<_, _>>();

    fights
        .iter()
        .filter_map(|fight| Some((fight, *dates.get(fight.event_id.as_str())?)))
        .filter(|(_, date)| *date >= min_date)
        .flat_map(|(fight, date)| {
            let [red, blue] = fight.fighters();
            [(red, blue), (blue, red)].map(|(fighter, opponent)| Perspective {
                fight_id: fight.fight_id.clone(),
                event_id: fight.event_id.clone(),
                fighter_id: fighter.to_string(),
                opponent_id: opponent.to_string(),
                date,
            })
        })
        .collect()
}

fn open_store(folder: &Path, spec: TableSpec) -> Result<RecordStore> {
    RecordStore::open(folder, spec).with_context(|| format!("opening {}", spec.file_name))
}

fn stored<T: Record>(folder: &Path) -> Result<Vec<T>> {
    let store = open_store(folder, T::TABLE)?;
    store
        .records()
        .with_context(|| format!("decoding {}", T::TABLE.file_name))
}

/// `(fight_id, fighter_id)` pairs already in the odds table.
fn pairs_with_odds(folder: &Path) -> Result<HashSet<(String, String)>> {
    Ok(stored::<OddsRecord>(folder)?
        .into_iter()
        .map(|odds| (odds.fight_id, odds.fighter_id))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ProfileTask {
    fighter_id: String,
    /// Known BestFightOdds profile ids.
    bfo_ids: Vec<String>,
    /// Names to search for; only used when no profile id is known.
    search_names: Vec<String>,
}

impl ProfileTask {
    fn for_fighter(names: &FighterNameTable, fighter_id: &str) -> Self {
        let mut bfo_ids = Vec::new();
        for row in names.of_fighter(fighter_id, &Source::BestFightOdds) {
            if !bfo_ids.contains(&row.database_id) {
                bfo_ids.push(row.database_id.clone());
            }
        }
        let search_names = if bfo_ids.is_empty() {
            names
                .of_fighter(fighter_id, &Source::UfcStats)
                .map(|row| row.name.clone())
                .collect()
        } else {
            Vec::new()
        };
        Self {
            fighter_id: fighter_id.to_string(),
            bfo_ids,
            search_names,
        }
    }
}

/// Resolves a fighter's BestFightOdds profiles, searching by name when needed.
struct ProfileHandler {
    base_url: String,
    min_score: u8,
}

#[async_trait]
impl<S> TaskHandler<S> for ProfileHandler
where
    S: PageFetch + Send + 'static,
{
    type Task = ProfileTask;
    type Output = Vec<(String, FighterProfile)>;

    async fn run(&self, session: &mut S, task: &ProfileTask) -> Result<Self::Output> {
        let mut profiles: Vec<(String, FighterProfile)> = Vec::new();
        let mut ids = task.bfo_ids.clone();

        for name in &task.search_names {
            let body = session.fetch_page(&search_url(&self.base_url, name)?).await?;
            match parse_search(&body)? {
                SearchPage::Results(hits) => match pick_search_hit(name, &hits, self.min_score) {
                    Some((hit, score)) => {
                        debug!(fighter_id = %task.fighter_id, query = %name, hit = %hit.name, score, "search hit");
                        ids.push(id_from_url(&hit.href));
                    }
                    None => info!(fighter_id = %task.fighter_id, query = %name, "no close search hit"),
                },
                SearchPage::Profile {
                    id: Some(id),
                    profile,
                    ..
                } => profiles.push((id, profile)),
                SearchPage::Profile { name: shown, .. } => {
                    warn!(fighter_id = %task.fighter_id, query = %name, %shown, "profile page without canonical id")
                }
                SearchPage::NoResults => info!(fighter_id = %task.fighter_id, query = %name, "no search results"),
            }
        }

        for id in ids {
            if profiles.iter().any(|(known, _)| *known == id) {
                continue;
            }
            let body = session.fetch_page(&profile_url(&self.base_url, &id)).await?;
            let profile = parse_profile(&body).with_context(|| format!("profile {id}"))?;
            profiles.push((id, profile));
        }
        Ok(profiles)
    }
}

/// Every name the opponent is known by: UFCStats names first, then confirmed
/// BestFightOdds names.
fn opponent_aliases(names: &FighterNameTable, opponent_id: &str) -> Vec<String> {
    let mut aliases: Vec<String> = Vec::new();
    for source in [Source::UfcStats, Source::BestFightOdds] {
        for row in names.of_fighter(opponent_id, &source) {
            if !aliases.contains(&row.name) {
                aliases.push(row.name.clone());
            }
        }
    }
    aliases
}

/// Scrape opening and closing odds for every stored fight still missing them.
pub async fn scrape_odds<F>(config: &ScrapeConfig, factory: Arc<F>) -> Result<ScrapeSummary>
where
    F: SessionFactory,
    F::Session: PageFetch,
{
    let run_id = Uuid::new_v4();
    let span = info_span!("scrape", %run_id, source = "bestfightodds");
    async move {
        let folder = config.data_folder.as_path();
        let mut summary = ScrapeSummary::start(run_id);

        let fighters = stored::<Fighter>(folder)?;
        let events = stored::<Event>(folder)?;
        let fights = stored::<Fight>(folder)?;
        let mut names = FighterNameTable::open(folder).context("opening fighter names")?;
        let reference_rows = names.ensure_reference_names(&fighters)?;

        let done = pairs_with_odds(folder)?;
        let (pending, already): (Vec<_>, Vec<_>) = perspectives(&events, &fights, config.min_date)
            .into_iter()
            .partition(|p| !done.contains(&(p.fight_id.clone(), p.fighter_id.clone())));

        let mut by_fighter: BTreeMap<String, Vec<Perspective>> = BTreeMap::new();
        for perspective in pending {
            by_fighter
                .entry(perspective.fighter_id.clone())
                .or_default()
                .push(perspective);
        }
        info!(
            fighters = by_fighter.len(),
            pending = by_fighter.values().map(Vec::len).sum::<usize>(),
            skipped = already.len(),
            min_date = %config.min_date,
            "scraping odds"
        );

        let tasks = by_fighter
            .keys()
            .map(|id| (id.clone(), ProfileTask::for_fighter(&names, id)))
            .collect::<Vec<_>>();
        let handler = Arc::new(ProfileHandler {
            base_url: config.bestfightodds_base_url.clone(),
            min_score: config.min_score,
        });
        let mut pool = FanOut::spawn(factory, handler, tasks, config.pool_config());

        let matcher = WindowedMatcher::new(config.min_score);
        let odds_store = open_store(folder, OddsRecord::TABLE)?;
        let mut appender = odds_store.appender()?;
        let mut odds = TableSummary {
            skipped: already.len(),
            ..TableSummary::default()
        };
        let mut identities = TableSummary {
            scraped: reference_rows,
            ..TableSummary::default()
        };

        while let Some(result) = pool.next().await {
            let todo = by_fighter.remove(&result.key).unwrap_or_default();
            let Some(profiles) = result.output else {
                odds.failed += todo.len();
                continue;
            };

            let mut owners = Vec::new();
            let mut entries: Vec<OddsEntry> = Vec::new();
            for (bfo_id, profile) in &profiles {
                for entry in &profile.entries {
                    owners.push((bfo_id.as_str(), profile.name.as_str()));
                    entries.push(entry.clone());
                }
            }

            let mut confirmed = Vec::new();
            for p in &todo {
                let aliases = opponent_aliases(&names, &p.opponent_id);
                let aliases = aliases.iter().map(String::as_str).collect::<Vec<_>>();
                match matcher.match_record(p.date, &aliases, &entries) {
                    MatchOutcome::Matched { candidate, score } => {
                        let entry = &entries[candidate];
                        let (bfo_id, bfo_name) = owners[candidate];
                        appender.append(&OddsRecord {
                            fight_id: p.fight_id.clone(),
                            fighter_id: p.fighter_id.clone(),
                            odds: entry.odds,
                        })?;
                        odds.scraped += 1;
                        debug!(fight_id = %p.fight_id, fighter_id = %p.fighter_id, score, "odds matched");
                        confirmed.push(FighterName {
                            fighter_id: p.opponent_id.clone(),
                            database: Source::BestFightOdds,
                            name: entry.opponent_name.clone(),
                            database_id: entry.opponent_id.clone(),
                        });
                        confirmed.push(FighterName {
                            fighter_id: p.fighter_id.clone(),
                            database: Source::BestFightOdds,
                            name: bfo_name.to_string(),
                            database_id: bfo_id.to_string(),
                        });
                    }
                    MatchOutcome::NoCandidates => {
                        info!(fight_id = %p.fight_id, fighter_id = %p.fighter_id, date = %p.date, "no odds entry near fight date");
                        odds.failed += 1;
                    }
                    MatchOutcome::BelowThreshold { best_score } => {
                        info!(fight_id = %p.fight_id, fighter_id = %p.fighter_id, best_score, "opponent name not matched");
                        odds.failed += 1;
                    }
                }
            }
            identities.scraped += names.append_once(confirmed)?;
        }
        pool.finish().await?;
        drop(appender);
        let dropped = odds_store.remove_duplicates()?;
        debug!(dropped, "odds table deduplicated");

        summary.record(OddsRecord::TABLE.file_name, odds);
        summary.record(FighterName::TABLE.file_name, identities);
        let summary = summary.finish();
        info!(tables = ?summary.tables, "odds scrape finished");
        Ok(summary)
    }
    .instrument(span)
    .await
}

/// A fight on or after the cut-off date lacking odds for some of its fighters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingOdds {
    pub fight_id: String,
    pub event_id: String,
    pub date: NaiveDate,
    pub fighter_ids: Vec<String>,
}

/// Fights dated on or after `config.min_date` with no odds row for one or both fighters.
pub fn check_missing_odds(config: &ScrapeConfig) -> Result<Vec<MissingOdds>> {
    let folder = config.data_folder.as_path();
    let events = stored::<Event>(folder)?;
    let fights = stored::<Fight>(folder)?;
    let done = pairs_with_odds(folder)?;

    let mut missing: Vec<MissingOdds> = Vec::new();
    for p in perspectives(&events, &fights, config.min_date) {
        if done.contains(&(p.fight_id.clone(), p.fighter_id.clone())) {
            continue;
        }
        match missing.last_mut() {
            Some(last) if last.fight_id == p.fight_id => last.fighter_ids.push(p.fighter_id),
            _ => missing.push(MissingOdds {
                fight_id: p.fight_id,
                event_id: p.event_id,
                date: p.date,
                fighter_ids: vec![p.fighter_id],
            }),
        }
    }

    for fight in &missing {
        info!(fight_id = %fight.fight_id, date = %fight.date, fighters = ?fight.fighter_ids, "fight missing odds");
    }
    if !missing.is_empty() {
        warn!(fights = missing.len(), min_date = %config.min_date, "fights without odds");
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fightstats_adapters::FixtureSite;
    use fightstats_core::{MoneyLine, NULL};
    use std::fs;
    use std::path::PathBuf;

    use crate::scrape_ufcstats;

    fn event(id: &str, date: &str) -> Event {
        Event {
            event_id: id.into(),
            name: format!("Event {id}"),
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
            winner: red.into(),
            num_rounds: "3".into(),
            title_fight: "F".into(),
            weight_class: "Lightweight".into(),
            gender: "M".into(),
            result: "KO/TKO".into(),
            result_details: "Punch".into(),
            finish_round: 1,
            finish_time: "1:00".into(),
            time_format: "3 Rnd (5-5-5)".into(),
        }
    }

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

    fn bfo_name(id: &str, name: &str, bfo_id: &str) -> FighterName {
        FighterName {
            fighter_id: id.into(),
            database: Source::BestFightOdds,
            name: name.into(),
            database_id: bfo_id.into(),
        }
    }

    fn store_all<T: Record>(folder: &Path, records: &[T]) {
        let store = RecordStore::open(folder, T::TABLE).unwrap();
        let mut appender = store.appender().unwrap();
        for record in records {
            appender.append(record).unwrap();
        }
    }

    fn config(folder: &Path) -> ScrapeConfig {
        ScrapeConfig {
            data_folder: folder.to_path_buf(),
            n_sessions: 2,
            max_retries: 0,
            ..ScrapeConfig::default()
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn perspectives_cover_both_corners_after_cutoff() {
        let events = [
            event("old", "2005-02-05"),
            event("new", "2024-11-16"),
            event("undated", NULL),
        ];
        let fights = [
            fight("f1", "old", "a", "b"),
            fight("f2", "new", "c", "d"),
            fight("f3", "undated", "e", "f"),
            fight("f4", "unknown", "g", "h"),
        ];
        let found = perspectives(&events, &fights, date(2008, 8, 1));
        let corners = found
            .iter()
            .map(|p| (p.fighter_id.as_str(), p.opponent_id.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(corners, [("c", "d"), ("d", "c")]);
        assert!(found.iter().all(|p| p.fight_id == "f2" && p.date == date(2024, 11, 16)));
    }

    #[test]
    fn profile_task_searches_only_without_known_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut names = FighterNameTable::open(dir.path()).unwrap();
        let row = |id: &str, database: Source, name: &str, source_id: &str| FighterName {
            fighter_id: id.into(),
            database,
            name: name.into(),
            database_id: source_id.into(),
        };
        names
            .append_once([
                row("jj", Source::UfcStats, "Jon Jones", "jj"),
                row("jj", Source::BestFightOdds, "Jon Jones", "Jon-Jones-819"),
                row("jj", Source::BestFightOdds, "Jonathan Jones", "Jon-Jones-819"),
                row("sm", Source::UfcStats, "Stipe Miocic", "sm"),
            ])
            .unwrap();

        let known = ProfileTask::for_fighter(&names, "jj");
        assert_eq!(known.bfo_ids, ["Jon-Jones-819"]);
        assert!(known.search_names.is_empty());

        let searched = ProfileTask::for_fighter(&names, "sm");
        assert!(searched.bfo_ids.is_empty());
        assert_eq!(searched.search_names, ["Stipe Miocic"]);

        assert_eq!(opponent_aliases(&names, "jj"), ["Jon Jones", "Jonathan Jones"]);
    }

    fn site(name: &str) -> FixtureSite {
        let manifest = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures")
            .join(name)
            .join("site.json");
        FixtureSite::load(manifest).expect("fixture manifest")
    }

    fn odds_site() -> FixtureSite {
        site("bestfightodds")
    }

    fn handler() -> ProfileHandler {
        ProfileHandler {
            base_url: fightstats_adapters::bestfightodds::BASE_URL.to_string(),
            min_score: 90,
        }
    }

    #[tokio::test]
    async fn handler_follows_search_results_and_profile_redirects() {
        let mut site = odds_site();
        let task = ProfileTask {
            fighter_id: "zw".into(),
            bfo_ids: Vec::new(),
            search_names: vec!["Zhang Weili".into(), "Tatiana Suarez".into()],
        };
        let profiles = handler().run(&mut site, &task).await.unwrap();
        let ids = profiles.iter().map(|(id, _)| id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["Tatiana-Suarez-6190", "Weili-Zhang-7003"]);
        assert_eq!(profiles[1].1.name, "Weili Zhang");
        assert_eq!(profiles[1].1.entries[0].opponent_name, "Tatiana Suarez");
    }

    #[tokio::test]
    async fn handler_fails_on_unknown_profile_id() {
        let mut site = odds_site();
        let task = ProfileTask {
            fighter_id: "x".into(),
            bfo_ids: vec!["Nobody-1".into()],
            search_names: Vec::new(),
        };
        assert!(handler().run(&mut site, &task).await.is_err());
    }

    #[tokio::test]
    async fn failed_profile_task_fails_every_pending_corner_of_its_fighter() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path();
        store_all(folder, &[event("e1", "2024-11-16")]);
        store_all(
            folder,
            &[
                fighter("jj", "Jon", "Jones"),
                fighter("sm", "Stipe", "Miocic"),
                fighter("nb", "Nobody", "Else"),
            ],
        );
        store_all(
            folder,
            &[fight("f1", "e1", "jj", "sm"), fight("f2", "e1", "sm", "nb")],
        );
        // profiles missing from the site make the sm and nb tasks fail
        FighterNameTable::open(folder)
            .unwrap()
            .append_once([
                bfo_name("jj", "Jon Jones", "Jon-Jones-819"),
                bfo_name("sm", "Stipe Miocic", "Stipe-Miocic-0"),
                bfo_name("nb", "Nobody Else", "Nobody-Else-1"),
            ])
            .unwrap();

        let summary = scrape_odds(&config(folder), Arc::new(odds_site()))
            .await
            .unwrap();
        let odds = summary.table(OddsRecord::TABLE.file_name);
        assert_eq!(odds.scraped, 1);
        assert_eq!(odds.failed, 3, "both sm corners and the nb corner");

        let stored = stored::<OddsRecord>(folder).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!((stored[0].fight_id.as_str(), stored[0].fighter_id.as_str()), ("f1", "jj"));
    }

    #[tokio::test]
    async fn rerun_for_one_missing_corner_adds_no_identity_rows() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path();
        let config = config(folder);
        scrape_ufcstats(&config, Arc::new(site("ufcstats")), false)
            .await
            .unwrap();
        FighterNameTable::open(folder)
            .unwrap()
            .append_once([bfo_name("1338e2c7480bdf9e", "Jon Jones", "Jon-Jones-819")])
            .unwrap();
        scrape_odds(&config, Arc::new(odds_site())).await.unwrap();

        let odds_path = folder.join(OddsRecord::TABLE.file_name);
        let text = fs::read_to_string(&odds_path).unwrap();
        let mut lines = text.lines().collect::<Vec<_>>();
        let removed = lines.pop().unwrap().to_string();
        fs::write(&odds_path, lines.join("\n") + "\n").unwrap();
        let names_path = folder.join(FighterName::TABLE.file_name);
        let names_before = fs::read(&names_path).unwrap();

        let rerun = scrape_odds(&config, Arc::new(odds_site())).await.unwrap();
        assert_eq!(rerun.table(OddsRecord::TABLE.file_name).scraped, 1);
        assert_eq!(rerun.table(OddsRecord::TABLE.file_name).skipped, 3);
        assert_eq!(rerun.table(FighterName::TABLE.file_name).scraped, 0);
        assert_eq!(fs::read(&names_path).unwrap(), names_before);
        assert!(fs::read_to_string(&odds_path)
            .unwrap()
            .lines()
            .any(|line| line == removed));
    }

    #[test]
    fn missing_report_lists_only_corners_without_odds() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path();
        store_all(folder, &[event("old", "2007-03-03"), event("309", "2024-11-16")]);
        store_all(
            folder,
            &[
                fight("f0", "old", "rc", "gg"),
                fight("f1", "309", "jj", "sm"),
                fight("f2", "309", "cp", "mc"),
            ],
        );
        let priced = |fight_id: &str, fighter_id: &str| OddsRecord {
            fight_id: fight_id.into(),
            fighter_id: fighter_id.into(),
            odds: MoneyLine {
                opening: Some(-250),
                closing_range_min: Some(-300),
                closing_range_max: Some(-275),
            },
        };
        store_all(folder, &[priced("f1", "jj"), priced("f2", "cp"), priced("f2", "mc")]);

        let missing = check_missing_odds(&config(folder)).unwrap();
        assert_eq!(
            missing,
            [MissingOdds {
                fight_id: "f1".into(),
                event_id: "309".into(),
                date: date(2024, 11, 16),
                fighter_ids: vec!["sm".into()],
            }]
        );
    }
}
