//! Page extractors for UFCStats, BestFightOdds and saved bet365 pages, plus an
//! offline fixture site.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use fightstats_storage::{FetchError, PageFetch, SessionFactory};
use scraper::{ElementRef, Html, Selector};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

pub mod bestfightodds;
pub mod bet365;
pub mod rounds;
pub mod ufcstats;

pub use rounds::decode_round;

pub const CRATE_NAME: &str = "fightstats-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid selector {selector:?}: {message}")]
    Selector { selector: String, message: String },
    #[error("page has no {0}")]
    Missing(&'static str),
    #[error("cannot parse {field} from {value:?}")]
    Parse { field: &'static str, value: String },
    #[error("fighter index must be 0 or 1, got {0}")]
    FighterIndex(usize),
}

impl AdapterError {
    pub(crate) fn parse(field: &'static str, value: impl Into<String>) -> Self {
        AdapterError::Parse {
            field,
            value: value.into(),
        }
    }
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn select_first_text(document: &Html, css: &str) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>())))
}

/// Trimmed text of every match, blanks included so positions stay meaningful.
pub(crate) fn select_all_texts(document: &Html, css: &str) -> Result<Vec<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document.select(&sel).map(element_text).collect())
}

pub(crate) fn select_first_attr(
    document: &Html,
    css: &str,
    attr: &str,
) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string())))
}

/// Text after the first `:` of a `Label: value` string.
pub(crate) fn after_colon(text: &str) -> Option<&str> {
    text.split_once(':').map(|(_, value)| value.trim())
}

/// `label: value` pairs from `li.b-list__box-list-item`, labels lowercased.
pub(crate) fn labelled_items(document: &Html) -> Result<Vec<(String, String)>, AdapterError> {
    Ok(select_all_texts(document, "li.b-list__box-list-item")?
        .into_iter()
        .filter_map(|text| {
            let (label, value) = text.split_once(':')?;
            Some((label.trim().to_lowercase(), value.trim().to_string()))
        })
        .collect())
}

pub(crate) fn labelled<'a>(items: &'a [(String, String)], label: &str) -> Option<&'a str> {
    items
        .iter()
        .find(|(l, _)| l == label)
        .map(|(_, v)| v.as_str())
}

/// URL → HTML file mapping, stored as `site.json` next to the pages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureManifest {
    pub pages: HashMap<String, String>,
}

/// Serves pages from local files instead of the network.
#[derive(Debug, Clone)]
pub struct FixtureSite {
    root: PathBuf,
    pages: Arc<HashMap<String, PathBuf>>,
}

impl FixtureSite {
    pub fn load(manifest_path: impl AsRef<Path>) -> Result<Self> {
        let manifest_path = manifest_path.as_ref();
        let manifest: FixtureManifest = read_json_file(manifest_path)?;
        let root = manifest_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let pages = manifest
            .pages
            .into_iter()
            .map(|(url, rel)| (normalize_url(&url), root.join(rel)))
            .collect();
        Ok(Self {
            root,
            pages: Arc::new(pages),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[async_trait]
impl PageFetch for FixtureSite {
    async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let path = self
            .pages
            .get(&normalize_url(url))
            .ok_or_else(|| FetchError::NotFound(url.to_string()))?;
        fs::read_to_string(path)
            .map_err(|e| FetchError::Other(format!("reading fixture {}: {e}", path.display())))
    }
}

#[async_trait]
impl SessionFactory for FixtureSite {
    type Session = FixtureSite;

    async fn open(&self) -> Result<FixtureSite> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    #[test]
    fn labelled_items_split_on_first_colon() {
        let html = Html::parse_document(
            r#"<ul>
                <li class="b-list__box-list-item"><i>Date:</i> March 2, 2024</li>
                <li class="b-list__box-list-item"><i>Location:</i> Las Vegas, Nevada, USA</li>
                <li class="b-list__box-list-item">no label</li>
            </ul>"#,
        );
        let items = labelled_items(&html).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(labelled(&items, "date"), Some("March 2, 2024"));
        assert_eq!(labelled(&items, "location"), Some("Las Vegas, Nevada, USA"));
        assert_eq!(labelled(&items, "referee"), None);
    }

    #[test]
    fn select_all_texts_keeps_blank_cells() {
        let html = Html::parse_document("<p class='c'>1</p><p class='c'> </p><p class='c'>3</p>");
        assert_eq!(select_all_texts(&html, "p.c").unwrap(), vec!["1", "", "3"]);
    }

    #[test]
    fn invalid_selector_is_reported() {
        let html = Html::parse_document("<p></p>");
        assert!(matches!(
            select_first_text(&html, "p[["),
            Err(AdapterError::Selector { .. })
        ));
    }

    #[tokio::test]
    async fn fixture_site_serves_manifest_pages() {
        let site = FixtureSite::load(workspace_root().join("fixtures/ufcstats/site.json"))
            .expect("fixture manifest");
        assert!(!site.is_empty());

        let page = site
            .fetch_page("http://www.ufcstats.com/statistics/events/completed?page=all")
            .await
            .expect("events page");
        assert!(page.contains("event-details"));

        assert!(matches!(
            site.fetch_page("http://www.ufcstats.com/nowhere").await,
            Err(FetchError::NotFound(_))
        ));
    }
}
