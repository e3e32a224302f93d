//! BestFightOdds fighter profiles and search results.

use std::sync::LazyLock;

use chrono::NaiveDate;
use fightstats_core::{best_match, id_from_url, MoneyLine};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html};

use crate::{element_text, select_first_attr, select_first_text, selector, AdapterError};

pub const BASE_URL: &str = "https://www.bestfightodds.com";

pub fn profile_url(base: &str, id: &str) -> String {
    format!("{base}/fighters/{id}")
}

/// Search page URL with `query` form-encoded.
pub fn search_url(base: &str, query: &str) -> Result<String, AdapterError> {
    let url = format!("{base}/search");
    let parsed = Url::parse_with_params(&url, &[("query", query)])
        .map_err(|err| AdapterError::parse("search url", format!("{url}: {err}")))?;
    Ok(parsed.into())
}

static ORDINAL_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d)(?:st|nd|rd|th)").expect("ordinal suffix pattern"));

/// Drop ordinal suffixes glued to a digit: `Dec 14th 2024` → `Dec 14 2024`.
pub fn clean_date(text: &str) -> String {
    ORDINAL_SUFFIX.replace_all(text, "$1").into_owned()
}

const DATE_FORMATS: [&str; 5] = ["%b %d %Y", "%B %d %Y", "%b %d, %Y", "%B %d, %Y", "%Y-%m-%d"];

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let cleaned = clean_date(text.trim());
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&cleaned, format).ok())
}

/// One past bout on a fighter profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OddsEntry {
    pub date: NaiveDate,
    pub opponent_name: String,
    pub opponent_id: String,
    pub odds: MoneyLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FighterProfile {
    pub name: String,
    pub entries: Vec<OddsEntry>,
}

fn joined_text(element: ElementRef<'_>) -> String {
    element.text().map(str::trim).collect::<String>()
}

fn money_line(row: ElementRef<'_>) -> Result<MoneyLine, AdapterError> {
    let sel = selector("td.moneyline")?;
    let values = row.select(&sel).map(joined_text).collect::<Vec<_>>();
    let value = |i: usize| values.get(i).and_then(|v| v.parse::<i32>().ok());
    if values.first().map_or(true, |v| v.is_empty()) {
        return Ok(MoneyLine::default());
    }
    Ok(MoneyLine {
        opening: value(0),
        closing_range_min: value(1),
        closing_range_max: value(2),
    })
}

/// Parse the first `.team-stats-table`. Rows come in triples after the
/// header: event, fighter line, opponent line. Undated rows are skipped.
pub fn parse_profile(html: &str) -> Result<FighterProfile, AdapterError> {
    let document = Html::parse_document(html);
    let table_sel = selector(".team-stats-table")?;
    let row_sel = selector("tr")?;
    let link_sel = selector("a")?;
    let date_sel = selector(".item-non-mobile")?;

    let table = document
        .select(&table_sel)
        .next()
        .ok_or(AdapterError::Missing("odds table"))?;
    let rows = table.select(&row_sel).collect::<Vec<_>>();
    let fighter_rows = rows.iter().skip(2).step_by(3);
    let opponent_rows = rows.iter().skip(3).step_by(3);

    let name = rows
        .get(2)
        .and_then(|row| row.select(&link_sel).next())
        .map(element_text)
        .ok_or(AdapterError::Missing("profile fighter name"))?;

    let mut entries = Vec::new();
    for (fighter_row, opponent_row) in fighter_rows.zip(opponent_rows) {
        let date_text = opponent_row
            .select(&date_sel)
            .next()
            .map(element_text)
            .unwrap_or_default();
        if date_text.is_empty() {
            continue;
        }
        let date = parse_date(&date_text).ok_or_else(|| AdapterError::parse("odds date", date_text.as_str()))?;

        let opponent = opponent_row
            .select(&link_sel)
            .next()
            .ok_or(AdapterError::Missing("opponent link"))?;
        let opponent_id = opponent
            .value()
            .attr("href")
            .map(id_from_url)
            .ok_or(AdapterError::Missing("opponent href"))?;

        entries.push(OddsEntry {
            date,
            opponent_name: element_text(opponent),
            opponent_id,
            odds: money_line(*fighter_row)?,
        });
    }

    Ok(FighterProfile { name, entries })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub name: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPage {
    /// Result listing.
    Results(Vec<SearchHit>),
    /// The search redirected straight to a profile.
    Profile {
        name: String,
        id: Option<String>,
        profile: FighterProfile,
    },
    NoResults,
}

pub fn parse_search(html: &str) -> Result<SearchPage, AdapterError> {
    let document = Html::parse_document(html);

    if let Some(name) = select_first_text(&document, "#team-name")? {
        let id = select_first_attr(&document, "link[rel=canonical]", "href")?
            .or(select_first_attr(&document, "meta[property='og:url']", "content")?)
            .map(|url| id_from_url(&url));
        return Ok(SearchPage::Profile {
            name,
            id,
            profile: parse_profile(html)?,
        });
    }

    let list_sel = selector(".content-list")?;
    let Some(list) = document.select(&list_sel).next() else {
        return Ok(SearchPage::NoResults);
    };
    let row_sel = selector("tr")?;
    let link_sel = selector("a")?;
    let hits = list
        .select(&row_sel)
        .filter_map(|row| {
            let link = row.select(&link_sel).next()?;
            Some(SearchHit {
                name: element_text(link),
                href: link.value().attr("href")?.to_string(),
            })
        })
        .collect::<Vec<_>>();

    if hits.is_empty() {
        Ok(SearchPage::NoResults)
    } else {
        Ok(SearchPage::Results(hits))
    }
}

/// Best-scoring hit for `query`, kept only when its score beats `min_score`.
pub fn pick_search_hit<'a>(query: &str, hits: &'a [SearchHit], min_score: u8) -> Option<(&'a SearchHit, u8)> {
    let (index, score) = best_match(query, hits.iter().map(|h| h.name.as_str()))?;
    (score > min_score).then(|| (&hits[index], score))
}
