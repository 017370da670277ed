//! Turns free-text plaque addresses into the (postal code, house identifier,
//! street) triple used to look up price-paid records.
//!
//! Every field is found by an ordered list of matchers; the first matcher
//! that returns something wins. Fields nobody can find stay `None`, which
//! callers treat as "unmatchable" rather than as an error.

use crate::model::{Marker, NormalizedAddress, NormalizedMarker, Transaction};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static POSTAL_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z]{1,2}[0-9R][0-9A-Z]? [0-9][A-Z]{2}\b").expect("valid regex")
});
static NUMERIC_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+) ?- ?([0-9]+)").expect("valid regex"));
static LEADING_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+[A-Z]?)(?:[\s,]|$)").expect("valid regex"));
static NAMED_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Z' ]*), ([0-9]+) ?- ?([0-9]+)").expect("valid regex")
});
static NAMED_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z][A-Z' ]*), ([0-9]+)(?:[\s,]|$)").expect("valid regex"));
static HOUSE_NUMBER_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+[A-Z]?(?: ?- ?[0-9]+[A-Z]?)?(?:\s+|$)").expect("valid regex")
});
static STREET_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][A-Z'.\-]*(?:\s+[A-Z][A-Z'.\-]*)*\s+(?:ROAD|LANE|STREET|SQUARE|AVENUE|PLACE|GARDENS|TERRACE|HILL|GROVE|CRESCENT|WALK|ROW|COURT|CLOSE|DRIVE|WAY|PARK|GREEN|MEWS|VILLAS|PARADE|YARD|RISE|VALE|EMBANKMENT|GATE))\b",
    )
    .expect("valid regex")
});

/// House identifiers and streets seen in the price-paid data for one postal code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostcodeEntry {
    pub house_identifiers: BTreeSet<String>,
    pub streets: BTreeSet<String>,
}

/// Directory of known addresses, limited to the postal codes markers mention.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownAddresses {
    by_postal_code: BTreeMap<String, PostcodeEntry>,
}

impl KnownAddresses {
    /// Starts an empty directory that only records the given postal codes.
    pub fn watching<I, S>(postal_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let by_postal_code = postal_codes
            .into_iter()
            .map(|code| (code.into(), PostcodeEntry::default()))
            .collect();
        Self { by_postal_code }
    }

    /// Records a transaction if its postal code is being watched.
    pub fn record(&mut self, tx: &Transaction) {
        if let Some(entry) = self.by_postal_code.get_mut(&tx.postal_code) {
            let house = tx.house_identifier.trim().to_uppercase();
            if !house.is_empty() {
                entry.house_identifiers.insert(house);
            }
            if let Some(street) = &tx.street {
                entry.streets.insert(street.trim().to_uppercase());
            }
        }
    }

    pub fn get(&self, postal_code: &str) -> Option<&PostcodeEntry> {
        self.by_postal_code.get(postal_code)
    }
}

/// One step of a first-match-wins cascade.
pub trait Matcher: Send + Sync {
    fn name(&self) -> &'static str;
    /// `text` is upper-cased with the postal code removed.
    fn find(&self, text: &str, known: Option<&PostcodeEntry>) -> Option<String>;
}

/// "12 - 14 HIGH STREET" -> "12 - 14"
struct NumericRange;

impl Matcher for NumericRange {
    fn name(&self) -> &'static str {
        "numeric_range"
    }

    fn find(&self, text: &str, _known: Option<&PostcodeEntry>) -> Option<String> {
        let caps = NUMERIC_RANGE.captures(text)?;
        Some(format!("{} - {}", &caps[1], &caps[2]))
    }
}

/// "2 HOPPING LANE" -> "2", "12A HIGH STREET" -> "12A"
struct LeadingNumber;

impl Matcher for LeadingNumber {
    fn name(&self) -> &'static str {
        "leading_number"
    }

    fn find(&self, text: &str, _known: Option<&PostcodeEntry>) -> Option<String> {
        LEADING_NUMBER.captures(text).map(|caps| caps[1].to_string())
    }
}

/// "ROSE COURT, 3-5 HIGH STREET" -> "ROSE COURT, 3 - 5"
struct NamedRange;

impl Matcher for NamedRange {
    fn name(&self) -> &'static str {
        "named_range"
    }

    fn find(&self, text: &str, _known: Option<&PostcodeEntry>) -> Option<String> {
        let caps = NAMED_RANGE.captures(text)?;
        Some(format!("{}, {} - {}", caps[1].trim(), &caps[2], &caps[3]))
    }
}

/// "ROSE COURT, 3 HIGH STREET" -> "ROSE COURT, 3"
struct NamedNumber;

impl Matcher for NamedNumber {
    fn name(&self) -> &'static str {
        "named_number"
    }

    fn find(&self, text: &str, _known: Option<&PostcodeEntry>) -> Option<String> {
        let caps = NAMED_NUMBER.captures(text)?;
        Some(format!("{}, {}", caps[1].trim(), &caps[2]))
    }
}

/// First house identifier on file for the postal code that appears in the text.
struct KnownHouse;

impl Matcher for KnownHouse {
    fn name(&self) -> &'static str {
        "known_house"
    }

    fn find(&self, text: &str, known: Option<&PostcodeEntry>) -> Option<String> {
        known?
            .house_identifiers
            .iter()
            .find(|house| text.contains(house.as_str()))
            .cloned()
    }
}

/// The postal code has exactly one street on file.
struct SingleKnownStreet;

impl Matcher for SingleKnownStreet {
    fn name(&self) -> &'static str {
        "single_known_street"
    }

    fn find(&self, _text: &str, known: Option<&PostcodeEntry>) -> Option<String> {
        let streets = &known?.streets;
        if streets.len() == 1 {
            streets.iter().next().cloned()
        } else {
            None
        }
    }
}

/// First street on file whose name appears in the text, apostrophes ignored.
struct KnownStreetInText;

impl Matcher for KnownStreetInText {
    fn name(&self) -> &'static str {
        "known_street_in_text"
    }

    fn find(&self, text: &str, known: Option<&PostcodeEntry>) -> Option<String> {
        let haystack = text.replace('\'', "");
        known?
            .streets
            .iter()
            .find(|street| haystack.contains(&street.replace('\'', "")))
            .cloned()
    }
}

/// Falls back to words ending in a common street-type suffix.
struct StreetSuffix;

impl Matcher for StreetSuffix {
    fn name(&self) -> &'static str {
        "street_suffix"
    }

    fn find(&self, text: &str, _known: Option<&PostcodeEntry>) -> Option<String> {
        text.split([',', '\n'])
            .find_map(|part| STREET_SUFFIX.captures(part.trim()))
            .map(|caps| caps[1].trim().to_string())
    }
}

/// Returns the first UK postal code in the text, upper-cased.
pub fn extract_postal_code(raw_address: &str) -> Option<String> {
    let upper = raw_address.to_uppercase();
    POSTAL_CODE.find(&upper).map(|m| m.as_str().to_string())
}

pub struct AddressNormalizer<'a> {
    known: &'a KnownAddresses,
    house_matchers: Vec<Box<dyn Matcher>>,
    street_matchers: Vec<Box<dyn Matcher>>,
}

impl<'a> AddressNormalizer<'a> {
    pub fn new(known: &'a KnownAddresses) -> Self {
        Self {
            known,
            house_matchers: vec![
                Box::new(NumericRange),
                Box::new(LeadingNumber),
                Box::new(NamedRange),
                Box::new(NamedNumber),
                Box::new(KnownHouse),
            ],
            street_matchers: vec![
                Box::new(SingleKnownStreet),
                Box::new(KnownStreetInText),
                Box::new(StreetSuffix),
            ],
        }
    }

    pub fn normalize(&self, raw_address: &str) -> NormalizedAddress {
        let (address, _) = self.normalize_with_text(raw_address);
        address
    }

    pub fn normalize_marker(&self, marker: Marker) -> NormalizedMarker {
        let (address, text) = self.normalize_with_text(&marker.raw_address);
        let components = address_components(&text, address.house_identifier.as_deref());
        NormalizedMarker {
            marker,
            address,
            components,
        }
    }

    /// Returns the normalized address plus the upper-cased text it was read from.
    fn normalize_with_text(&self, raw_address: &str) -> (NormalizedAddress, String) {
        let upper = raw_address.to_uppercase().replace('–', "-");
        let postal_code = extract_postal_code(&upper);
        let text = match &postal_code {
            Some(code) => upper.replacen(code.as_str(), "", 1),
            None => upper,
        };
        let text = text.trim().to_string();
        let known = postal_code.as_deref().and_then(|code| self.known.get(code));

        let house_identifier = first_match(&self.house_matchers, &text, known);
        let street = first_match(&self.street_matchers, &text, known);

        (
            NormalizedAddress {
                postal_code,
                house_identifier,
                street,
            },
            text,
        )
    }
}

fn first_match(
    matchers: &[Box<dyn Matcher>],
    text: &str,
    known: Option<&PostcodeEntry>,
) -> Option<String> {
    matchers.iter().find_map(|matcher| {
        let found = matcher.find(text, known)?;
        tracing::trace!("{} matched {:?}", matcher.name(), found);
        Some(found)
    })
}

/// Splits the text into comma/newline separated parts, stripping the house identifier.
/// A leading number or range is removed from every part, whatever its spacing, so
/// "12-14 HIGH STREET" and the "3 HIGH STREET" of "ROSE COURT, 3 HIGH STREET" both
/// leave "HIGH STREET".
fn address_components(text: &str, house_identifier: Option<&str>) -> Vec<String> {
    text.split([',', '\n'])
        .map(str::trim)
        .map(|part| match house_identifier {
            Some(house) => match HOUSE_NUMBER_PREFIX.find(part) {
                Some(number) => part[number.end()..].trim(),
                None => part.strip_prefix(house).unwrap_or(part).trim(),
            },
            None => part,
        })
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalizes every marker once against the known-address directory.
pub fn normalize_all(markers: Vec<Marker>, known: &KnownAddresses) -> Vec<NormalizedMarker> {
    let normalizer = AddressNormalizer::new(known);
    markers
        .into_iter()
        .map(|marker| normalizer.normalize_marker(marker))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn tx(postal_code: &str, house: &str, street: Option<&str>) -> Transaction {
        Transaction {
            id: format!("{postal_code}-{house}"),
            row: 0,
            price: 100.0,
            sale_date: NaiveDate::from_ymd_opt(2014, 1, 1).expect("valid date"),
            postal_code: postal_code.to_string(),
            house_identifier: house.to_string(),
            sub_identifier: None,
            street: street.map(str::to_string),
            locality: None,
            town: None,
            district: None,
            county: None,
        }
    }

    #[test]
    fn normalizes_plain_address_without_directory() {
        let known = KnownAddresses::default();
        let normalizer = AddressNormalizer::new(&known);
        let address = normalizer.normalize("2 Hopping Lane, Islington, London, N1 2NU");
        assert_eq!(address.postal_code.as_deref(), Some("N1 2NU"));
        assert_eq!(address.house_identifier.as_deref(), Some("2"));
        assert_eq!(address.street.as_deref(), Some("HOPPING LANE"));
    }

    #[test]
    fn extracts_only_the_postal_code_substring() {
        for (text, expected) in [
            ("1 Main Road, London N1 2NU", "N1 2NU"),
            ("Flat 2, W1A 1AA, London", "W1A 1AA"),
            ("10 Briars Lane AL10 8RY Hatfield", "AL10 8RY"),
            ("EC1A 1BB", "EC1A 1BB"),
            ("21 Bloomsbury Square, WC1A 2NS", "WC1A 2NS"),
        ] {
            assert_eq!(extract_postal_code(text).as_deref(), Some(expected), "{text}");
        }
        assert_eq!(extract_postal_code("No postcode here"), None);
    }

    #[test]
    fn house_identifier_cascade_order() {
        let known = KnownAddresses::default();
        let normalizer = AddressNormalizer::new(&known);
        let house = |text: &str| normalizer.normalize(text).house_identifier;

        assert_eq!(house("12-14 High Street, N1 2NU").as_deref(), Some("12 - 14"));
        assert_eq!(house("12A High Street, N1 2NU").as_deref(), Some("12A"));
        assert_eq!(house("Rose Court, 3-5 High Street").as_deref(), Some("ROSE COURT, 3 - 5"));
        assert_eq!(house("Rose Court, 3 High Street").as_deref(), Some("ROSE COURT, 3"));
        assert_eq!(house("The Old Vicarage, Church Lane"), None);
    }

    #[test]
    fn falls_back_to_known_house_for_postal_code() {
        let mut known = KnownAddresses::watching(["NW3 1AB"]);
        known.record(&tx("NW3 1AB", "KEATS HOUSE", Some("KEATS GROVE")));
        known.record(&tx("NW3 1AB", "THE LODGE", Some("KEATS GROVE")));

        let normalizer = AddressNormalizer::new(&known);
        let address = normalizer.normalize("Keats House, Keats Grove, Hampstead NW3 1AB");
        assert_eq!(address.house_identifier.as_deref(), Some("KEATS HOUSE"));
        assert_eq!(address.street.as_deref(), Some("KEATS GROVE"));
    }

    #[test]
    fn picks_street_mentioned_in_text_when_several_are_known() {
        let mut known = KnownAddresses::watching(["SE1 7PB"]);
        known.record(&tx("SE1 7PB", "1", Some("LAMBETH ROAD")));
        known.record(&tx("SE1 7PB", "3", Some("ST GEORGE'S ROAD")));

        let normalizer = AddressNormalizer::new(&known);
        let address = normalizer.normalize("3 St Georges Road, Southwark SE1 7PB");
        assert_eq!(address.street.as_deref(), Some("ST GEORGE'S ROAD"));
    }

    #[test]
    fn unknown_fields_are_none() {
        let known = KnownAddresses::default();
        let normalizer = AddressNormalizer::new(&known);
        let address = normalizer.normalize("Somewhere in Soho");
        assert_eq!(address, NormalizedAddress::default());
    }

    #[test]
    fn components_drop_postal_code_and_house_identifier() {
        let known = KnownAddresses::default();
        let marker = Marker {
            raw_address: "2 Hopping Lane\nIslington\nLondon, N1 2NU".to_string(),
            person_name: Some("Matt Barson".to_string()),
            wiki_reference: None,
            install_year_raw: "2015".to_string(),
            install_year: Some(2015),
        };
        let normalized = AddressNormalizer::new(&known).normalize_marker(marker);
        assert_eq!(normalized.components, vec!["HOPPING LANE", "ISLINGTON", "LONDON"]);
        assert!(normalized.is_linkable());
        assert_eq!(normalized.outward_code(), Some("N1"));
    }

    #[test]
    fn components_drop_ranges_and_numbers_after_a_house_name() {
        let known = KnownAddresses::default();
        let normalizer = AddressNormalizer::new(&known);
        let components = |raw: &str| {
            let marker = Marker {
                raw_address: raw.to_string(),
                person_name: None,
                wiki_reference: None,
                install_year_raw: "2015".to_string(),
                install_year: Some(2015),
            };
            normalizer.normalize_marker(marker).components
        };

        assert_eq!(components("12-14 High Street, N1 2NU"), vec!["HIGH STREET"]);
        assert_eq!(components("12 - 14 High Street, N1 2NU"), vec!["HIGH STREET"]);
        assert_eq!(
            components("Rose Court, 3 High Street, N1 2NU"),
            vec!["ROSE COURT", "HIGH STREET"]
        );
    }

    #[test]
    fn directory_ignores_unwatched_postal_codes() {
        let mut known = KnownAddresses::watching(["N1 2NU"]);
        known.record(&tx("N7 2NU", "4", Some("HOPPING LANE")));
        assert!(known.get("N7 2NU").is_none());
        assert_eq!(known.get("N1 2NU"), Some(&PostcodeEntry::default()));
    }
}
