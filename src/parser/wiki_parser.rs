// Registry-specific HTML parsing: wikitable rows of person, inscription, location, year
use crate::model::{Marker, ParserError};
use crate::utils::parse_install_year;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

const WIKI_HEAD: &str = "https://en.wikipedia.org";

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("valid regex"));
static LIFESPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}\s*[-–]\s*\d{4}").expect("valid regex"));

pub trait Parser {
    fn parse(&self, html: &str) -> Result<Vec<Marker>, ParserError>;
}

pub struct RegistryParser;

impl RegistryParser {
    pub fn new() -> Self {
        Self
    }

    /// Absolute URLs of the continuation pages linked from navigation hatnotes.
    pub fn linked_pages(&self, html: &str) -> Result<Vec<String>, ParserError> {
        let document = Html::parse_document(html);
        let link_selector = selector("div.hatnote a")?;

        let mut pages = Vec::new();
        for link in document.select(&link_selector) {
            if let Some(href) = link.value().attr("href") {
                if href.starts_with("/wiki/") && !href.contains(':') {
                    let url = format!("{}{}", WIKI_HEAD, href);
                    if !pages.contains(&url) {
                        pages.push(url);
                    }
                }
            }
        }
        Ok(pages)
    }
}

impl Default for RegistryParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for RegistryParser {
    fn parse(&self, html: &str) -> Result<Vec<Marker>, ParserError> {
        let document = Html::parse_document(html);

        let table_selector = selector("table.wikitable")?;
        let row_selector = selector("tr")?;
        let cell_selector = selector("th, td")?;
        let data_selector = selector("td")?;
        let link_selector = selector("a")?;
        let coord_selector = selector("span.plainlinks")?;

        let mut markers = Vec::new();
        for table in document.select(&table_selector) {
            for row in table.select(&row_selector) {
                // Heading rows carry only <th> cells.
                if row.select(&data_selector).next().is_none() {
                    continue;
                }
                let columns: Vec<ElementRef> = row.select(&cell_selector).collect();
                if columns.len() < 4 {
                    continue;
                }

                let person = clean_person(&cell_text(columns[0]));
                let wiki_reference = columns[0]
                    .select(&link_selector)
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .map(|href| format!("{}{}", WIKI_HEAD, href));

                let mut address = cell_text(columns[2]);
                for coord in columns[2].select(&coord_selector) {
                    address = address.replace(&cell_text(coord), "");
                }
                let address = address.replace('\u{a0}', " ").trim().to_string();
                if address.is_empty() {
                    continue;
                }

                let install_year_raw = clean_year(&cell_text(columns[3]));

                markers.push(Marker {
                    raw_address: address,
                    person_name: (!person.is_empty()).then_some(person),
                    wiki_reference,
                    install_year: parse_install_year(&install_year_raw),
                    install_year_raw,
                });
            }
        }

        Ok(markers)
    }
}

fn selector(css: &str) -> Result<Selector, ParserError> {
    Selector::parse(css).map_err(|e| ParserError::HtmlParseError(e.to_string()))
}

fn cell_text(cell: ElementRef) -> String {
    cell.text().collect::<String>()
}

/// Drops bracketed notes, lifespans and layout whitespace from a name.
fn clean_person(text: &str) -> String {
    let text = BRACKETED.replace_all(text, "");
    let text = LIFESPAN.replace_all(&text, "");
    text.replace(['\n', '\u{a0}'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn clean_year(text: &str) -> String {
    let text = BRACKETED.replace_all(text, "");
    text.replace(['\n', '\u{a0}'], " ").trim().to_string()
}
