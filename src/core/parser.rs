//! Turns the partner-locator HTML fragment into [`PartnerRecord`]s.
//!
//! The service answers with a list of `<h3>` category headings ("3CX Gold
//! Partners", ...) each followed by `div.xcx_partner_box` cards. Every card
//! carries four `display:flex` blocks: telephone, website, address and
//! `Partner ID: <id>`.

use crate::domain::model::{LocationKey, PartnerRecord};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use thiserror::Error;

static HEADING_OR_BOX: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3, div.xcx_partner_box").expect("static selector"));
static STRONG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("strong").expect("static selector"));
static FIRST_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("static selector"));
static FLEX_BLOCK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"div[style*="display:flex"]"#).expect("static selector"));
static LEVEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"3CX\s+([\w\s]+)\s+Partners").expect("static regex"));

const UNKNOWN_LEVEL: &str = "Unknown";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("response is not an HTML fragment")]
    NotHtml,

    #[error("partner card #{index} has no company name")]
    MissingCompanyName { index: usize },

    #[error("partner card #{index} ({company}) has no partner id")]
    MissingPartnerId { index: usize, company: String },
}

/// Parses one response body. A blank body or one without partner cards is a
/// valid "no partners here" answer; anything that cannot be trusted is an error.
pub fn parse_partners(
    html: &str,
    key: &LocationKey,
) -> std::result::Result<Vec<PartnerRecord>, ParseError> {
    if html.trim().is_empty() {
        return Ok(Vec::new());
    }
    if !html.contains('<') {
        return Err(ParseError::NotHtml);
    }

    let document = Html::parse_fragment(html);
    let mut level = UNKNOWN_LEVEL.to_string();
    let mut records = Vec::new();

    // 依文件順序走訪：標題決定之後卡片的等級
    for element in document.select(&HEADING_OR_BOX) {
        if element.value().name() == "h3" {
            level = partner_level(&joined_text(element, " "));
            continue;
        }
        records.push(parse_card(element, records.len(), &level, key)?);
    }

    Ok(records)
}

fn parse_card(
    card: ElementRef<'_>,
    index: usize,
    level: &str,
    key: &LocationKey,
) -> std::result::Result<PartnerRecord, ParseError> {
    let company_name = card
        .select(&FIRST_LINK)
        .next()
        .and_then(|link| link.select(&STRONG).next())
        .map(|strong| joined_text(strong, ""))
        .filter(|name| !name.is_empty())
        .ok_or(ParseError::MissingCompanyName { index })?;

    let blocks: Vec<String> = card
        .select(&FLEX_BLOCK)
        .map(|block| joined_text(block, ""))
        .collect();

    let partner_id = blocks
        .get(3)
        .map(|raw| raw.replace("Partner ID:", "").trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ParseError::MissingPartnerId {
            index,
            company: company_name.clone(),
        })?;

    Ok(PartnerRecord {
        partner_id,
        company_name,
        partner_level: level.to_string(),
        telephone: blocks[0].clone(),
        website: blocks[1].clone(),
        address: blocks[2].clone(),
        country: key.country().to_string(),
        state: key.region().to_string(),
        city: key.city().map(str::to_string),
        locations: vec![key.clone()],
    })
}

fn partner_level(heading: &str) -> String {
    LEVEL
        .captures(heading)
        .and_then(|caps| caps.get(1))
        .map(|m| format!("{} Partners", m.as_str().trim()))
        .unwrap_or_else(|| UNKNOWN_LEVEL.to_string())
}

/// Text of every descendant text node, trimmed, empty nodes dropped.
fn joined_text(element: ElementRef<'_>, separator: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn partner_card(id: &str, name: &str) -> String {
        format!(
            r#"<div class="xcx_partner_box">
                 <a href="https://partners.example/{id}"><strong> {name} </strong></a>
                 <div style="display:flex;gap:4px"><img src="tel.svg"> +1 555 0100 </div>
                 <div style="display:flex;"> www.{id}.example </div>
                 <div style="display:flex;"> 1 Main St, Springfield </div>
                 <div style="display:flex;"> Partner ID: {id} </div>
               </div>"#
        )
    }

    pub(crate) fn partner_page(level: &str, cards: &[String]) -> String {
        format!(
            r#"<h3><img src="badge.png"> 3CX {level} Partners</h3>
               <div class="xcx_partner_category_row">{}</div>"#,
            cards.join("\n")
        )
    }

    fn key() -> LocationKey {
        LocationKey::new("United States", "US", "Texas", "TX", Some("Austin")).unwrap()
    }

    #[test]
    fn test_parses_cards_with_levels() {
        let html = format!(
            "{}{}",
            partner_page("Platinum", &[partner_card("111", "Acme Telecom")]),
            partner_page("Silver", &[partner_card("222", "Beta Voice"), partner_card("333", "Gamma")])
        );

        let records = parse_partners(&html, &key()).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].partner_id, "111");
        assert_eq!(records[0].company_name, "Acme Telecom");
        assert_eq!(records[0].partner_level, "Platinum Partners");
        assert_eq!(records[0].telephone, "+1 555 0100");
        assert_eq!(records[0].website, "www.111.example");
        assert_eq!(records[0].address, "1 Main St, Springfield");
        assert_eq!(records[0].state, "Texas");
        assert_eq!(records[0].city.as_deref(), Some("Austin"));
        assert_eq!(records[0].locations, vec![key()]);
        assert_eq!(records[1].partner_level, "Silver Partners");
        assert_eq!(records[2].partner_id, "333");
    }

    #[test]
    fn test_unmatched_heading_gives_unknown_level() {
        let html = format!("<h3>Resellers</h3>{}", partner_card("9", "Delta"));
        let records = parse_partners(&html, &key()).unwrap();
        assert_eq!(records[0].partner_level, "Unknown");
    }

    #[test]
    fn test_empty_and_cardless_bodies_are_valid() {
        assert!(parse_partners("", &key()).unwrap().is_empty());
        assert!(parse_partners("  \n", &key()).unwrap().is_empty());
        assert!(parse_partners("<p>No partners found</p>", &key()).unwrap().is_empty());
    }

    #[test]
    fn test_fails_closed_on_untrustworthy_payloads() {
        assert_eq!(parse_partners("Service Unavailable", &key()), Err(ParseError::NotHtml));

        let no_id = r#"<div class="xcx_partner_box"><a><strong>Acme</strong></a>
                       <div style="display:flex">123</div></div>"#;
        assert!(matches!(
            parse_partners(no_id, &key()),
            Err(ParseError::MissingPartnerId { .. })
        ));

        let no_name = r#"<div class="xcx_partner_box">
                         <div style="display:flex">1</div><div style="display:flex">2</div>
                         <div style="display:flex">3</div><div style="display:flex">Partner ID: 4</div>
                         </div>"#;
        assert!(matches!(
            parse_partners(no_name, &key()),
            Err(ParseError::MissingCompanyName { .. })
        ));
    }
}
