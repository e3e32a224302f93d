//! Incremental UFCStats scrape: fighters, events, then fights with their rounds.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use fightstats_adapters::ufcstats as pages;
use fightstats_core::{id_from_url, Event, Fight, Fighter, Record, RoundStats, TableSpec};
use fightstats_storage::{fetch_pages, PageFetch, RecordStore, SessionFactory};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{ScrapeConfig, ScrapeSummary, TableSummary};

/// Scrape every UFCStats table not yet stored under `config.data_folder`.
///
/// With `get_all_events` the fight links of every stored event are collected
/// again; otherwise only events without any stored fight are revisited.
pub async fn scrape_ufcstats<F>(
    config: &ScrapeConfig,
    factory: Arc<F>,
    get_all_events: bool,
) -> Result<ScrapeSummary>
where
    F: SessionFactory,
    F::Session: PageFetch,
{
    let run_id = Uuid::new_v4();
    let span = info_span!("scrape", %run_id, source = "ufcstats");
    async move {
        let mut summary = ScrapeSummary::start(run_id);

        let fighters = scrape_fighters(config, &factory).await?;
        summary.record(Fighter::TABLE.file_name, fighters);

        let (events, mut fight_links) = scrape_events(config, &factory).await?;
        summary.record(Event::TABLE.file_name, events);

        collect_fight_links(config, &factory, &mut fight_links, get_all_events).await?;
        let (fights, rounds) = scrape_fights(config, &factory, fight_links).await?;
        summary.record(Fight::TABLE.file_name, fights);
        summary.record(RoundStats::TABLE.file_name, rounds);

        let summary = summary.finish();
        info!(tables = ?summary.tables, "ufcstats scrape finished");
        Ok(summary)
    }
    .instrument(span)
    .await
}

/// Listing pages that could be fetched, as `(url, body)`.
async fn fetch_listings<F>(
    config: &ScrapeConfig,
    factory: &Arc<F>,
    urls: Vec<String>,
) -> Result<Vec<(String, String)>>
where
    F: SessionFactory,
    F::Session: PageFetch,
{
    let mut pool = fetch_pages(Arc::clone(factory), urls, config.pool_config());
    let mut listings = Vec::with_capacity(pool.total());
    while let Some(result) = pool.next().await {
        match result.output {
            Some(body) => listings.push((result.key, body)),
            None => warn!(url = %result.key, "listing unavailable, treating as empty"),
        }
    }
    pool.finish().await?;
    Ok(listings)
}

/// Order-preserving unique ids not in `known`, plus how many were known.
fn split_new(ids: impl IntoIterator<Item = String>, known: &HashSet<String>) -> (Vec<String>, usize) {
    let mut seen = HashSet::new();
    let mut skipped = 0;
    let mut fresh = Vec::new();
    for id in ids {
        if !seen.insert(id.clone()) {
            continue;
        }
        if known.contains(&id) {
            skipped += 1;
        } else {
            fresh.push(id);
        }
    }
    (fresh, skipped)
}

fn known_ids(store: &RecordStore, column: &str) -> HashSet<String> {
    store.column_values(column).map(str::to_string).collect()
}

fn open_store(folder: &Path, spec: TableSpec) -> Result<RecordStore> {
    RecordStore::open(folder, spec).with_context(|| format!("opening {}", spec.file_name))
}

/// Rewrite a table without the duplicate rows this run may have appended.
fn dedupe(store: &RecordStore) -> Result<()> {
    let dropped = store
        .remove_duplicates()
        .with_context(|| format!("deduplicating {}", store.spec().file_name))?;
    debug!(table = store.spec().file_name, dropped, "table deduplicated");
    Ok(())
}

async fn scrape_fighters<F>(config: &ScrapeConfig, factory: &Arc<F>) -> Result<TableSummary>
where
    F: SessionFactory,
    F::Session: PageFetch,
{
    let base = config.ufcstats_base_url.as_str();
    let store = open_store(&config.data_folder, Fighter::TABLE)?;

    let mut listed = Vec::new();
    for (url, body) in fetch_listings(config, factory, pages::fighter_list_urls(base)).await? {
        match pages::parse_fighter_list(&body) {
            Ok(links) => listed.extend(links.iter().map(|link| id_from_url(link))),
            Err(err) => warn!(%url, error = %err, "unreadable fighter listing"),
        }
    }
    let (fresh, skipped) = split_new(listed, &known_ids(&store, "fighter_id"));
    info!(new = fresh.len(), skipped, "scraping fighters");

    let mut counts = TableSummary {
        skipped,
        ..TableSummary::default()
    };
    let urls = fresh.iter().map(|id| pages::fighter_url(base, id)).collect();
    let mut appender = store.appender()?;
    let mut pool = fetch_pages(Arc::clone(factory), urls, config.pool_config());
    while let Some(result) = pool.next().await {
        let Some(body) = result.output else {
            counts.failed += 1;
            continue;
        };
        match pages::parse_fighter(&body, &id_from_url(&result.key)) {
            Ok(fighter) => {
                appender.append(&fighter)?;
                counts.scraped += 1;
            }
            Err(err) => {
                warn!(url = %result.key, error = %err, "skipping fighter page");
                counts.failed += 1;
            }
        }
    }
    pool.finish().await?;
    drop(appender);
    dedupe(&store)?;
    Ok(counts)
}

/// Scrape new events. Fight links seen on the fetched event pages are returned
/// keyed by event id so they need not be fetched twice.
async fn scrape_events<F>(
    config: &ScrapeConfig,
    factory: &Arc<F>,
) -> Result<(TableSummary, HashMap<String, Vec<String>>)>
where
    F: SessionFactory,
    F::Session: PageFetch,
{
    let base = config.ufcstats_base_url.as_str();
    let store = open_store(&config.data_folder, Event::TABLE)?;

    let mut listed = Vec::new();
    for (url, body) in fetch_listings(config, factory, vec![pages::events_list_url(base)]).await? {
        match pages::parse_event_list(&body) {
            Ok(links) => listed.extend(links.iter().map(|link| id_from_url(link))),
            Err(err) => warn!(%url, error = %err, "unreadable event listing"),
        }
    }
    let (fresh, skipped) = split_new(listed, &known_ids(&store, "event_id"));
    info!(new = fresh.len(), skipped, "scraping events");

    let mut counts = TableSummary {
        skipped,
        ..TableSummary::default()
    };
    let mut fight_links = HashMap::new();
    let urls = fresh.iter().map(|id| pages::event_url(base, id)).collect();
    let mut appender = store.appender()?;
    let mut pool = fetch_pages(Arc::clone(factory), urls, config.pool_config());
    while let Some(result) = pool.next().await {
        let Some(body) = result.output else {
            counts.failed += 1;
            continue;
        };
        let event_id = id_from_url(&result.key);
        let parsed = pages::parse_event(&body, &event_id)
            .and_then(|event| Ok((event, pages::parse_event_fight_links(&body)?)));
        match parsed {
            Ok((event, links)) => {
                appender.append(&event)?;
                counts.scraped += 1;
                fight_links.insert(event_id, links.iter().map(|l| id_from_url(l)).collect());
            }
            Err(err) => {
                warn!(url = %result.key, error = %err, "skipping event page");
                counts.failed += 1;
            }
        }
    }
    pool.finish().await?;
    drop(appender);
    dedupe(&store)?;
    Ok((counts, fight_links))
}

/// Fill in fight links for stored events that still need visiting.
async fn collect_fight_links<F>(
    config: &ScrapeConfig,
    factory: &Arc<F>,
    fight_links: &mut HashMap<String, Vec<String>>,
    get_all_events: bool,
) -> Result<()>
where
    F: SessionFactory,
    F::Session: PageFetch,
{
    let base = config.ufcstats_base_url.as_str();
    let events = open_store(&config.data_folder, Event::TABLE)?;
    let fights = open_store(&config.data_folder, Fight::TABLE)?;
    let with_fights = known_ids(&fights, "event_id");

    let pending = events
        .column_values("event_id")
        .filter(|id| !fight_links.contains_key(*id))
        .filter(|id| get_all_events || !with_fights.contains(*id))
        .map(|id| pages::event_url(base, id))
        .collect::<Vec<_>>();
    if pending.is_empty() {
        return Ok(());
    }
    info!(events = pending.len(), get_all_events, "collecting fight links");

    for (url, body) in fetch_listings(config, factory, pending).await? {
        match pages::parse_event_fight_links(&body) {
            Ok(links) => {
                fight_links.insert(id_from_url(&url), links.iter().map(|l| id_from_url(l)).collect());
            }
            Err(err) => warn!(%url, error = %err, "unreadable event page"),
        }
    }
    Ok(())
}

async fn scrape_fights<F>(
    config: &ScrapeConfig,
    factory: &Arc<F>,
    fight_links: HashMap<String, Vec<String>>,
) -> Result<(TableSummary, TableSummary)>
where
    F: SessionFactory,
    F::Session: PageFetch,
{
    let base = config.ufcstats_base_url.as_str();
    let fight_store = open_store(&config.data_folder, Fight::TABLE)?;
    let round_store = open_store(&config.data_folder, RoundStats::TABLE)?;

    let mut event_ids = fight_links.keys().collect::<Vec<_>>();
    event_ids.sort();
    let listed = event_ids
        .into_iter()
        .flat_map(|event_id| fight_links[event_id].iter().cloned());
    let (fresh, skipped) = split_new(listed, &known_ids(&fight_store, "fight_id"));
    info!(new = fresh.len(), skipped, "scraping fights");

    let mut fights = TableSummary {
        skipped,
        ..TableSummary::default()
    };
    let mut rounds = TableSummary::default();
    let urls = fresh.iter().map(|id| pages::fight_url(base, id)).collect();
    let mut fight_appender = fight_store.appender()?;
    let mut round_appender = round_store.appender()?;
    let mut pool = fetch_pages(Arc::clone(factory), urls, config.pool_config());
    while let Some(result) = pool.next().await {
        let Some(body) = result.output else {
            fights.failed += 1;
            continue;
        };
        match pages::parse_fight(&body, &id_from_url(&result.key)) {
            Ok(page) => {
                // rounds first: a fight row implies its rounds are stored
                for round in &page.rounds {
                    round_appender.append(round)?;
                }
                fight_appender.append(&page.fight)?;
                rounds.scraped += page.rounds.len();
                fights.scraped += 1;
                debug!(fight_id = %page.fight.fight_id, rounds = page.rounds.len(), "stored fight");
            }
            Err(err) => {
                warn!(url = %result.key, error = %err, "skipping fight page");
                fights.failed += 1;
            }
        }
    }
    pool.finish().await?;
    drop(fight_appender);
    drop(round_appender);
    dedupe(&round_store)?;
    dedupe(&fight_store)?;
    Ok((fights, rounds))
}
