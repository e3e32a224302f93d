//! Saved bet365 pages: the MMA odds market and the settled-bets history.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use fightstats_core::Bet365Odds;
use regex::Regex;
use scraper::{ElementRef, Html};

use crate::{element_text, selector, AdapterError};

fn child_divs(element: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| child.value().name() == "div")
}

fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|c| c == class)
}

/// Read a market date header such as `Sat 16 Nov`. Without a year the
/// capture year is assumed, rolling over to the next year when the month is
/// already behind the capture month.
pub fn parse_market_date(text: &str, captured_at: NaiveDateTime) -> Result<NaiveDate, AdapterError> {
    let tokens = text.split_whitespace().collect::<Vec<_>>();
    let invalid = || AdapterError::parse("market date", text);
    // the weekday is dropped; it only matches the real year
    match tokens.as_slice() {
        [_, day, month] => {
            let year = captured_at.year();
            let date = NaiveDate::parse_from_str(&format!("{day} {month} {year}"), "%d %b %Y")
                .map_err(|_| invalid())?;
            if date.month() < captured_at.month() {
                date.with_year(year + 1).ok_or_else(invalid)
            } else {
                Ok(date)
            }
        }
        [_, day, month, year] => {
            NaiveDate::parse_from_str(&format!("{day} {month} {year}"), "%d %b %Y").map_err(|_| invalid())
        }
        _ => Err(invalid()),
    }
}

/// Fight lines of the last market group on a saved odds page. Prices are
/// listed separately, two per fight, in the same order as the fights.
pub fn parse_odds_page(html: &str, captured_at: NaiveDateTime) -> Result<Vec<Bet365Odds>, AdapterError> {
    let document = Html::parse_document(html);
    let group_sel = selector("div.gl-MarketGroupContainer")?;
    let team_sel = selector("div.src-ParticipantFixtureDetailsHigher_TeamWrapper")?;
    let odds_sel = selector("span.src-ParticipantOddsOnly50_Odds")?;

    let group = document
        .select(&group_sel)
        .last()
        .ok_or(AdapterError::Missing("market group"))?;
    let fixtures = child_divs(group)
        .next()
        .ok_or(AdapterError::Missing("fixture column"))?;

    let mut fights: Vec<(NaiveDate, String, String)> = Vec::new();
    let mut current: Option<NaiveDate> = None;
    for element in child_divs(fixtures) {
        if element_text(element).is_empty() {
            continue;
        }
        if has_class(element, "rcl-MarketHeaderLabel") {
            current = Some(parse_market_date(&element_text(element), captured_at)?);
            continue;
        }
        let date = current.ok_or(AdapterError::Missing("date header before fixture"))?;
        let names = element.select(&team_sel).map(element_text).collect::<Vec<_>>();
        match <[String; 2]>::try_from(names) {
            Ok([fighter, opponent]) => fights.push((date, fighter, opponent)),
            Err(names) => return Err(AdapterError::parse("fixture fighters", names.join(" / "))),
        }
    }

    let prices = document
        .select(&odds_sel)
        .map(|span| element_text(span).parse::<f64>().ok())
        .collect::<Vec<_>>();

    Ok(fights
        .into_iter()
        .zip(prices.chunks_exact(2))
        .map(|((fight_date, fighter_name, opponent_name), pair)| Bet365Odds {
            captured_at,
            fight_date,
            fighter_name,
            opponent_name,
            fighter_odds: pair[0],
            opponent_odds: pair[1],
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetType {
    Winner,
    Method,
}

impl BetType {
    pub fn as_str(self) -> &'static str {
        match self {
            BetType::Winner => "Winner",
            BetType::Method => "Method",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BetSelection {
    /// Selection label as shown, e.g. `Jon Jones por KO/TKO`.
    pub label: String,
    pub fighter_name: String,
    pub odds: Option<f64>,
    pub bet_type: BetType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacedBet {
    pub placed_at: NaiveDateTime,
    pub stake: Option<f64>,
    pub acca_boost: Option<f64>,
    pub bonus: Option<f64>,
    pub returns: Option<f64>,
    pub selections: Vec<BetSelection>,
}

static AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("amount pattern"));

/// First number in a money or percentage label; a decimal comma is accepted.
pub fn parse_amount(text: &str) -> Option<f64> {
    AMOUNT
        .find(text)
        .and_then(|m| m.as_str().replace(',', ".").parse().ok())
}

// two-digit years first: `%Y` would also accept `24` as year 24
const BET_DATETIME_FORMATS: [&str; 4] = [
    "%d/%m/%y %H:%M:%S",
    "%d/%m/%y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

fn parse_bet_datetime(text: &str) -> Result<NaiveDateTime, AdapterError> {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    BET_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&text, format).ok())
        .ok_or_else(|| AdapterError::parse("bet datetime", text))
}

fn first_text(element: ElementRef<'_>, css: &str) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(element
        .select(&sel)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty()))
}

fn parse_selection(element: ElementRef<'_>) -> Result<Option<BetSelection>, AdapterError> {
    let Some(label) = first_text(element, "div.h-BetSelection_Name")? else {
        return Ok(None);
    };
    let Some(odds) = first_text(element, "div.h-BetSelection_Odds span")? else {
        return Ok(None);
    };
    let (fighter_name, bet_type) = match label.split_once(" por ") {
        Some((fighter, _)) => (fighter.trim().to_string(), BetType::Method),
        None => (label.clone(), BetType::Winner),
    };
    Ok(Some(BetSelection {
        label,
        fighter_name,
        odds: odds.parse().ok(),
        bet_type,
    }))
}

/// Every `h-BetSummary` block of a settled-bets page.
pub fn parse_bets(html: &str) -> Result<Vec<PlacedBet>, AdapterError> {
    let document = Html::parse_document(html);
    let bet_sel = selector("div.h-BetSummary")?;
    let selection_sel = selector("div.h-BetSelection")?;

    let mut bets = Vec::new();
    for bet in document.select(&bet_sel) {
        let placed_at = first_text(bet, "div.h-BetSummary_DateAndTime")?
            .ok_or(AdapterError::Missing("bet datetime"))?;
        let amount = |css: &str| -> Result<Option<f64>, AdapterError> {
            Ok(first_text(bet, css)?.as_deref().and_then(parse_amount))
        };
        let mut selections = Vec::new();
        for element in bet.select(&selection_sel) {
            selections.extend(parse_selection(element)?);
        }
        bets.push(PlacedBet {
            placed_at: parse_bet_datetime(&placed_at)?,
            stake: amount(".h-StakeReturnSection_StakeContainer > div")?,
            acca_boost: amount("div.hob-OfferBadgeSettled_BonusText")?,
            bonus: amount("div.h-StakeReturnSection_BonusText")?,
            returns: amount("div.h-StakeReturnSection_ReturnText")?,
            selections,
        });
    }
    Ok(bets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(18, 30, 0)
            .unwrap()
    }

    const ODDS_HTML: &str = r#"
<div class="gl-MarketGroupContainer"><div><div>Featured</div></div></div>
<div class="gl-MarketGroupContainer">
  <div>
    <div class="rcl-MarketHeaderLabel">Sat 28 Dec</div>
    <div class="rcl-ParticipantFixtureDetails">
      <div class="src-ParticipantFixtureDetailsHigher_TeamWrapper">Max Holloway</div>
      <div class="src-ParticipantFixtureDetailsHigher_TeamWrapper">Ilia Topuria</div>
    </div>
    <div></div>
    <div class="rcl-MarketHeaderLabel">Sat 18 Jan</div>
    <div class="rcl-ParticipantFixtureDetails">
      <div class="src-ParticipantFixtureDetailsHigher_TeamWrapper">Islam Makhachev</div>
      <div class="src-ParticipantFixtureDetailsHigher_TeamWrapper">Arman Tsarukyan</div>
    </div>
    <div class="rcl-ParticipantFixtureDetails">
      <div class="src-ParticipantFixtureDetailsHigher_TeamWrapper">Weili Zhang</div>
      <div class="src-ParticipantFixtureDetailsHigher_TeamWrapper">Tatiana Suarez</div>
    </div>
  </div>
  <div>
    <span class="src-ParticipantOddsOnly50_Odds">3.40</span><span class="src-ParticipantOddsOnly50_Odds">1.33</span>
    <span class="src-ParticipantOddsOnly50_Odds">1.40</span><span class="src-ParticipantOddsOnly50_Odds">2.90</span>
    <span class="src-ParticipantOddsOnly50_Odds">1.57</span><span class="src-ParticipantOddsOnly50_Odds">SP</span>
  </div>
</div>"#;

    #[test]
    fn market_dates_roll_into_next_year() {
        let captured = at(2024, 12, 20);
        assert_eq!(
            parse_market_date("Sat 28 Dec", captured).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 28).unwrap()
        );
        assert_eq!(
            parse_market_date("Sat 18 Jan", captured).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 18).unwrap()
        );
        assert_eq!(
            parse_market_date("Sat 18 Jan 2025", captured).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 18).unwrap()
        );
        assert!(parse_market_date("Tomorrow", captured).is_err());
        assert!(parse_market_date("Sat 31 Feb", captured).is_err());
    }

    #[test]
    fn odds_page_pairs_fights_with_prices_in_order() {
        let rows = parse_odds_page(ODDS_HTML, at(2024, 12, 20)).unwrap();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].fighter_name, "Max Holloway");
        assert_eq!(rows[0].fight_date, NaiveDate::from_ymd_opt(2024, 12, 28).unwrap());
        assert_eq!((rows[0].fighter_odds, rows[0].opponent_odds), (Some(3.4), Some(1.33)));

        assert_eq!(rows[2].opponent_name, "Tatiana Suarez");
        assert_eq!(rows[2].fight_date, NaiveDate::from_ymd_opt(2025, 1, 18).unwrap());
        assert_eq!(rows[2].opponent_odds, None, "unpriced line is kept as NULL");
    }

    #[test]
    fn fixture_before_any_date_header_is_an_error() {
        let html = r#"<div class="gl-MarketGroupContainer"><div>
            <div><div class="src-ParticipantFixtureDetailsHigher_TeamWrapper">A</div>
            <div class="src-ParticipantFixtureDetailsHigher_TeamWrapper">B</div></div>
        </div></div>"#;
        assert!(matches!(
            parse_odds_page(html, at(2024, 12, 20)),
            Err(AdapterError::Missing(_))
        ));
        assert!(parse_odds_page("<p>logged out</p>", at(2024, 12, 20)).is_err());
    }

    #[test]
    fn amounts_accept_currency_and_decimal_commas() {
        assert_eq!(parse_amount("Stake €10.00"), Some(10.0));
        assert_eq!(parse_amount("12,50 €"), Some(12.5));
        assert_eq!(parse_amount("+ €1.25 bonus"), Some(1.25));
        assert_eq!(parse_amount("20% Boost"), Some(20.0));
        assert_eq!(parse_amount("Return"), None);
    }

    #[test]
    fn settled_bets_split_into_selections() {
        let html = r#"
<div class="h-BetSummary">
  <div class="h-BetSummary_DateAndTime">16/11/2024 21:05:12</div>
  <div class="hob-OfferBadgeSettled_BonusText">10%</div>
  <div class="h-StakeReturnSection_StakeContainer"><div>Stake €10.00</div></div>
  <div class="h-StakeReturnSection_ReturnText">Return €25.30</div>
  <div class="h-StakeReturnSection_BonusText">+€2.30 bonus</div>
  <div class="h-BetSelection">
    <div class="h-BetSelection_Name">Jon Jones</div>
    <div class="h-BetSelection_Odds"><span>1.22</span></div>
  </div>
  <div class="h-BetSelection">
    <div class="h-BetSelection_Name">Weili Zhang por Decisión</div>
    <div class="h-BetSelection_Odds"><span>2.10</span></div>
  </div>
  <div class="h-BetSelection"><div class="h-BetSelection_Name">Void leg</div></div>
</div>
<div class="h-BetSummary">
  <div class="h-BetSummary_DateAndTime">01/03/25 23:40</div>
  <div class="h-StakeReturnSection_StakeContainer"><div>Stake 5,00 €</div></div>
  <div class="h-BetSelection">
    <div class="h-BetSelection_Name">Tatiana Suarez</div>
    <div class="h-BetSelection_Odds"><span>2.75</span></div>
  </div>
</div>"#;
        let bets = parse_bets(html).unwrap();
        assert_eq!(bets.len(), 2);

        let first = &bets[0];
        assert_eq!(
            first.placed_at,
            NaiveDate::from_ymd_opt(2024, 11, 16)
                .unwrap()
                .and_hms_opt(21, 5, 12)
                .unwrap()
        );
        assert_eq!(first.stake, Some(10.0));
        assert_eq!(first.acca_boost, Some(10.0));
        assert_eq!(first.bonus, Some(2.3));
        assert_eq!(first.returns, Some(25.3));
        assert_eq!(first.selections.len(), 2, "selection without odds is dropped");
        assert_eq!(first.selections[1].fighter_name, "Weili Zhang");
        assert_eq!(first.selections[1].bet_type, BetType::Method);
        assert_eq!(first.selections[0].bet_type, BetType::Winner);

        assert_eq!(bets[1].placed_at.date(), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
        assert_eq!(bets[1].stake, Some(5.0));
        assert_eq!(bets[1].returns, None);
    }
}
