//! UFCStats listing and detail page extractors.

use std::sync::LazyLock;

use chrono::NaiveDate;
use fightstats_core::{id_from_url, Event, Fight, Fighter, RoundStats, NULL};
use regex::Regex;
use scraper::Html;

use crate::rounds::decode_round;
use crate::{
    after_colon, labelled, labelled_items, select_all_texts, select_first_attr, select_first_text,
    selector, AdapterError,
};

pub const BASE_URL: &str = "http://www.ufcstats.com";

pub fn events_list_url(base: &str) -> String {
    format!("{base}/statistics/events/completed?page=all")
}

pub fn fighter_list_urls(base: &str) -> Vec<String> {
    ('a'..='z')
        .map(|letter| format!("{base}/statistics/fighters?char={letter}&page=all"))
        .collect()
}

pub fn event_url(base: &str, id: &str) -> String {
    format!("{base}/event-details/{id}")
}

pub fn fighter_url(base: &str, id: &str) -> String {
    format!("{base}/fighter-details/{id}")
}

pub fn fight_url(base: &str, id: &str) -> String {
    format!("{base}/fight-details/{id}")
}

fn unique_hrefs(document: &Html, css: &str, needle: &str) -> Result<Vec<String>, AdapterError> {
    let sel = selector(css)?;
    let mut seen = std::collections::HashSet::new();
    Ok(document
        .select(&sel)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| href.contains(needle))
        .filter(|href| seen.insert(href.to_string()))
        .map(str::to_string)
        .collect())
}

/// Event detail links on the completed-events listing.
pub fn parse_event_list(html: &str) -> Result<Vec<String>, AdapterError> {
    unique_hrefs(&Html::parse_document(html), "a[href]", "event-details")
}

/// Fighter detail links on one alphabetical fighter listing.
pub fn parse_fighter_list(html: &str) -> Result<Vec<String>, AdapterError> {
    unique_hrefs(&Html::parse_document(html), "a[href]", "fighter-details")
}

/// Fight detail links on an event page.
pub fn parse_event_fight_links(html: &str) -> Result<Vec<String>, AdapterError> {
    unique_hrefs(
        &Html::parse_document(html),
        "a.b-flag.b-flag_style_green",
        "fight-details",
    )
}

pub fn parse_event(html: &str, event_id: &str) -> Result<Event, AdapterError> {
    let document = Html::parse_document(html);
    let name = select_first_text(&document, "h2")?.ok_or(AdapterError::Missing("event name"))?;
    let items = labelled_items(&document)?;

    let date_text = labelled(&items, "date").ok_or(AdapterError::Missing("event date"))?;
    let date = NaiveDate::parse_from_str(date_text, "%B %d, %Y")
        .map_err(|_| AdapterError::parse("event date", date_text))?;

    let location = labelled(&items, "location").ok_or(AdapterError::Missing("event location"))?;
    let parts = location.split(',').map(str::trim).collect::<Vec<_>>();
    let city = parts.first().copied().unwrap_or_default();
    let country = parts.last().copied().unwrap_or_default();
    let state = if parts.len() > 2 { parts[1] } else { NULL };

    Ok(Event {
        event_id: event_id.to_string(),
        name,
        date: date.format("%Y-%m-%d").to_string(),
        city: city.to_string(),
        state: state.to_string(),
        country: country.to_string(),
    })
}

/// Shortest round-trip decimal, always with a fractional part.
fn decimal(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn is_missing(value: &str) -> bool {
    value.is_empty() || value.contains("--")
}

fn split_name(tokens: &[&str]) -> (String, String) {
    let first = tokens.first().copied().unwrap_or(NULL).to_string();
    let last = match tokens.len() {
        2..=4 => tokens[1..].join(" "),
        _ => NULL.to_string(),
    };
    (first, last)
}

fn height_cm(value: &str) -> Result<String, AdapterError> {
    if is_missing(value) {
        return Ok(NULL.to_string());
    }
    let (feet, inches) = value
        .split_once('\'')
        .ok_or_else(|| AdapterError::parse("height", value))?;
    let feet: u32 = feet
        .trim()
        .parse()
        .map_err(|_| AdapterError::parse("height", value))?;
    let inches: u32 = inches
        .trim()
        .trim_matches('"')
        .trim()
        .parse()
        .map_err(|_| AdapterError::parse("height", value))?;
    Ok(decimal(f64::from(feet) * 12.0 * 2.54 + f64::from(inches) * 2.54))
}

fn weight_lbs(value: &str) -> String {
    if is_missing(value) {
        return NULL.to_string();
    }
    value.split_whitespace().next().unwrap_or(NULL).to_string()
}

fn reach_cm(value: &str) -> Result<String, AdapterError> {
    if is_missing(value) {
        return Ok(NULL.to_string());
    }
    let inches: u32 = value
        .trim()
        .trim_matches('"')
        .parse()
        .map_err(|_| AdapterError::parse("reach", value))?;
    let cm = (f64::from(inches) * 2.54 * 100.0).round() / 100.0;
    Ok(decimal(cm))
}

fn dob(value: &str) -> Result<String, AdapterError> {
    if is_missing(value) {
        return Ok(NULL.to_string());
    }
    NaiveDate::parse_from_str(value, "%b %d, %Y")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| AdapterError::parse("dob", value))
}

/// `W-L-D` or `W-L-D (N NC)` as `(wins, losses, draws, no contests)`.
fn record(value: &str) -> Result<(String, String, String, String), AdapterError> {
    let parts = value.trim().split('-').map(str::trim).collect::<Vec<_>>();
    if parts.len() < 3 {
        return Err(AdapterError::parse("record", value));
    }
    let tail = parts[parts.len() - 1];
    let draws = tail
        .split_whitespace()
        .next()
        .ok_or_else(|| AdapterError::parse("record", value))?;
    let no_contests = match tail.split_once('(') {
        Some((_, nc)) => nc
            .split_whitespace()
            .next()
            .filter(|n| n.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| AdapterError::parse("record", value))?,
        None => NULL,
    };
    Ok((
        parts[0].to_string(),
        parts[1].to_string(),
        draws.to_string(),
        no_contests.to_string(),
    ))
}

pub fn parse_fighter(html: &str, fighter_id: &str) -> Result<Fighter, AdapterError> {
    let document = Html::parse_document(html);

    let name = select_first_text(&document, "span.b-content__title-highlight")?
        .ok_or(AdapterError::Missing("fighter name"))?;
    let (first_name, last_name) = split_name(&name.split_whitespace().collect::<Vec<_>>());

    let nickname = select_first_text(&document, "p.b-content__Nickname")?
        .unwrap_or_else(|| NULL.to_string());

    let record_text = select_first_text(&document, "span.b-content__title-record")?
        .ok_or(AdapterError::Missing("fighter record"))?;
    let record_value = after_colon(&record_text).unwrap_or(&record_text);
    let (wins, losses, draws, no_contests) = record(record_value)?;

    let items = labelled_items(&document)?;
    let detail = |label: &str| labelled(&items, label).unwrap_or("--");

    Ok(Fighter {
        fighter_id: fighter_id.to_string(),
        first_name,
        last_name,
        nickname,
        height_cm: height_cm(detail("height"))?,
        weight_lbs: weight_lbs(detail("weight")),
        reach_cm: reach_cm(detail("reach"))?,
        stance: match detail("stance") {
            s if is_missing(s) => NULL.to_string(),
            s => s.to_string(),
        },
        dob: dob(detail("dob"))?,
        wins,
        losses,
        draws,
        no_contests,
    })
}

/// A fight row and the round rows decoded from the same page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FightPage {
    pub fight: Fight,
    pub rounds: Vec<RoundStats>,
}

static WEIGHT_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w*weight").expect("weight word pattern"));
static CLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d:\d\d").expect("clock pattern"));

fn weight_word(title: &str) -> Option<&str> {
    WEIGHT_WORD.find(title).map(|m| m.as_str())
}

fn weight_class(title: &str) -> String {
    if title.contains("Light Heavyweight") {
        "Light Heavyweight".to_string()
    } else if title.contains("Women") {
        weight_word(title)
            .map(|w| format!("Women's {w}"))
            .unwrap_or_else(|| NULL.to_string())
    } else if title.contains("Catch Weight") {
        "Catch Weight".to_string()
    } else if title.contains("Open Weight") {
        "Open Weight".to_string()
    } else {
        weight_word(title).unwrap_or(NULL).to_string()
    }
}

/// First `d:dd` clock reading in `text`.
fn clock(text: &str) -> Option<&str> {
    CLOCK.find(text).map(|m| m.as_str())
}

fn winner(statuses: &[String], fighter_1: &str, fighter_2: &str) -> String {
    let status = |i: usize| statuses.get(i).map(String::as_str).unwrap_or_default();
    match (status(0), status(1)) {
        ("D", "D") => "Draw".to_string(),
        ("W", _) => fighter_1.to_string(),
        (_, "W") => fighter_2.to_string(),
        _ => NULL.to_string(),
    }
}

fn result(method: &str, details: &[String]) -> (String, String) {
    if method.contains("Decision") {
        let mut words = method.split_whitespace();
        let first = words.next().unwrap_or(NULL).to_string();
        let last = words.last().map(str::to_string).unwrap_or_else(|| first.clone());
        (first, last)
    } else {
        let detail = details
            .get(1)
            .and_then(|d| d.rsplit(':').next())
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(NULL);
        (method.to_string(), detail.to_string())
    }
}

fn fighter_ids(document: &Html) -> Result<(String, String), AdapterError> {
    let cells = selector("p.b-fight-details__table-text")?;
    let link = selector("a.b-link.b-link_style_black")?;
    let from_cells = document
        .select(&cells)
        .take(2)
        .filter_map(|cell| cell.select(&link).next()?.value().attr("href"))
        .collect::<Vec<_>>();

    let hrefs = if from_cells.len() == 2 {
        from_cells
    } else {
        let person = selector("a.b-fight-details__person-link")?;
        document
            .select(&person)
            .take(2)
            .filter_map(|a| a.value().attr("href"))
            .collect()
    };
    match hrefs.as_slice() {
        [a, b] => Ok((id_from_url(a), id_from_url(b))),
        _ => Err(AdapterError::Missing("fighter links")),
    }
}

pub fn parse_fight(html: &str, fight_id: &str) -> Result<FightPage, AdapterError> {
    let document = Html::parse_document(html);

    let event_href = select_first_attr(&document, "h2 a.b-link", "href")?
        .ok_or(AdapterError::Missing("event link"))?;
    let event_id = id_from_url(&event_href);

    let overview = select_all_texts(&document, "i.b-fight-details__text-item")?;
    let overview_value = |i: usize, field: &'static str| {
        overview
            .get(i)
            .and_then(|t| after_colon(t))
            .ok_or(AdapterError::Missing(field))
    };

    let round_text = overview_value(0, "finish round")?;
    let finish_round: u32 = round_text
        .parse()
        .map_err(|_| AdapterError::parse("finish round", round_text))?;
    let time_text = overview.get(1).ok_or(AdapterError::Missing("finish time"))?;
    let finish_time = clock(time_text).ok_or_else(|| AdapterError::parse("finish time", time_text.as_str()))?;
    let time_format = overview_value(2, "time format")?;
    let num_rounds = time_format
        .chars()
        .next()
        .ok_or_else(|| AdapterError::parse("time format", time_format))?;
    let referee = overview
        .get(3)
        .and_then(|t| after_colon(t))
        .filter(|r| !r.is_empty())
        .unwrap_or(NULL);

    let method_text = select_first_text(&document, "i.b-fight-details__text-item_first")?
        .ok_or(AdapterError::Missing("method"))?;
    let method = after_colon(&method_text).ok_or_else(|| AdapterError::parse("method", method_text.as_str()))?;
    let details = select_all_texts(&document, "p.b-fight-details__text")?;
    let (result, result_details) = result(method, &details);

    let title = select_first_text(&document, "i.b-fight-details__fight-title")?
        .ok_or(AdapterError::Missing("fight title"))?;

    let (fighter_1, fighter_2) = fighter_ids(&document)?;
    let statuses = select_all_texts(&document, "i.b-fight-details__person-status")?;

    let cells = select_all_texts(&document, "p.b-fight-details__table-text")?;
    let mut rounds = Vec::with_capacity(2 * finish_round as usize);
    for (index, fighter_id) in [&fighter_1, &fighter_2].into_iter().enumerate() {
        for round in 1..=finish_round {
            rounds.push(RoundStats {
                fight_id: fight_id.to_string(),
                fighter_id: fighter_id.clone(),
                round,
                stats: decode_round(&cells, index, round, finish_round)?,
            });
        }
    }

    let fight = Fight {
        fight_id: fight_id.to_string(),
        event_id,
        referee: referee.to_string(),
        winner: winner(&statuses, &fighter_1, &fighter_2),
        fighter_1,
        fighter_2,
        num_rounds: num_rounds.to_string(),
        title_fight: if title.contains("Title") { "T" } else { "F" }.to_string(),
        weight_class: weight_class(&title),
        gender: if title.contains("Women") { "F" } else { "M" }.to_string(),
        result,
        result_details,
        finish_round,
        finish_time: finish_time.to_string(),
        time_format: time_format.to_string(),
    };

    Ok(FightPage { fight, rounds })
}
