//! Record linkage between normalized marker addresses and price-paid rows.
//!
//! Two tables are produced. The exact table maps a marker address to the
//! transactions sold at that very house; the area table maps each marker
//! outward code to every transaction in it. A key whose postal code never
//! appeared in the data maps to `None`, which later stages keep apart from
//! "present but filtered down to nothing".

use crate::model::{NormalizedMarker, Transaction};
use crate::utils::numeric_identifier;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    Exact,
    Area,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTable {
    pub mode: LinkMode,
    entries: BTreeMap<String, Option<BTreeSet<String>>>,
}

impl LinkTable {
    pub fn new(mode: LinkMode) -> Self {
        Self {
            mode,
            entries: BTreeMap::new(),
        }
    }

    /// `None` when the key is unknown, `Some(None)` when it had no candidates at all.
    pub fn entry(&self, key: &str) -> Option<Option<&BTreeSet<String>>> {
        self.entries.get(key).map(Option::as_ref)
    }

    /// Like [`LinkTable::entry`], also handing back the stored key.
    pub fn lookup(&self, key: &str) -> Option<(&str, Option<&BTreeSet<String>>)> {
        self.entries
            .get_key_value(key)
            .map(|(key, ids)| (key.as_str(), ids.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every linked transaction id, across all keys.
    pub fn ids(&self) -> BTreeSet<&str> {
        self.entries
            .values()
            .flatten()
            .flat_map(|ids| ids.iter().map(String::as_str))
            .collect()
    }

    /// Keys whose postal code had no candidate transactions.
    pub fn unlinked(&self) -> usize {
        self.entries.values().filter(|ids| ids.is_none()).count()
    }

    fn declare(&mut self, key: String) {
        self.entries.entry(key).or_insert(None);
    }

    fn candidates(&mut self, key: &str) -> &mut BTreeSet<String> {
        let slot = self.entries.entry(key.to_string()).or_insert(None);
        slot.get_or_insert_with(BTreeSet::new)
    }

    /// Set union; a present entry absorbs `None`.
    pub fn merge(&mut self, other: LinkTable) {
        for (key, ids) in other.entries {
            match ids {
                Some(ids) => self.candidates(&key).extend(ids),
                None => self.declare(key),
            }
        }
    }
}

/// Links markers to the transactions sold at their exact address.
pub struct ExactLinker<'a> {
    by_postal_code: HashMap<&'a str, Vec<&'a NormalizedMarker>>,
    linkable: Vec<&'a NormalizedMarker>,
    unmatchable: usize,
}

impl<'a> ExactLinker<'a> {
    pub fn new(markers: &'a [NormalizedMarker]) -> Self {
        let mut by_postal_code: HashMap<&str, Vec<&NormalizedMarker>> = HashMap::new();
        let mut linkable = Vec::new();
        let mut unmatchable = 0;
        for marker in markers {
            match marker.address.postal_code.as_deref() {
                Some(code) if marker.is_linkable() => {
                    by_postal_code.entry(code).or_default().push(marker);
                    linkable.push(marker);
                }
                _ => unmatchable += 1,
            }
        }
        Self {
            by_postal_code,
            linkable,
            unmatchable,
        }
    }

    /// Markers lacking a postal code or house identifier.
    pub fn unmatchable(&self) -> usize {
        self.unmatchable
    }

    /// A table holding `None` for every linkable marker; chunk results merge into it.
    pub fn empty_table(&self) -> LinkTable {
        let mut table = LinkTable::new(LinkMode::Exact);
        for marker in &self.linkable {
            table.declare(marker.key());
        }
        table
    }

    pub fn link_chunk(&self, chunk: &[Transaction]) -> LinkTable {
        let mut table = LinkTable::new(LinkMode::Exact);
        for tx in chunk {
            let Some(markers) = self.by_postal_code.get(tx.postal_code.as_str()) else {
                continue;
            };
            for marker in markers {
                let ids = table.candidates(&marker.key());
                let house = marker.address.house_identifier.as_deref().unwrap_or_default();
                if house_matches(house, &tx.house_identifier) && disambiguates(marker, tx) {
                    ids.insert(tx.id.clone());
                }
            }
        }
        table
    }

    pub fn link(&self, transactions: &[Transaction]) -> LinkTable {
        let mut table = self.empty_table();
        table.merge(self.link_chunk(transactions));
        table
    }
}

/// Links each marker outward code to every transaction sharing it.
pub struct AreaLinker {
    outward_codes: BTreeSet<String>,
}

impl AreaLinker {
    pub fn new(markers: &[NormalizedMarker]) -> Self {
        let outward_codes = markers
            .iter()
            .filter_map(|marker| marker.outward_code())
            .map(str::to_string)
            .collect();
        Self { outward_codes }
    }

    pub fn empty_table(&self) -> LinkTable {
        let mut table = LinkTable::new(LinkMode::Area);
        for code in &self.outward_codes {
            table.declare(code.clone());
        }
        table
    }

    pub fn link_chunk(&self, chunk: &[Transaction]) -> LinkTable {
        let mut table = LinkTable::new(LinkMode::Area);
        for tx in chunk {
            let outward = tx.outward_code();
            if self.outward_codes.contains(outward) {
                table.candidates(outward).insert(tx.id.clone());
            }
        }
        table
    }

    pub fn link(&self, transactions: &[Transaction]) -> LinkTable {
        let mut table = self.empty_table();
        table.merge(self.link_chunk(transactions));
        table
    }
}

/// Exact text match, or equal once both sides are read as integers.
fn house_matches(marker_house: &str, tx_house: &str) -> bool {
    let marker_house = marker_house.trim().to_uppercase();
    let tx_house = tx_house.trim().to_uppercase();
    if marker_house.is_empty() || tx_house.is_empty() {
        return false;
    }
    if marker_house == tx_house {
        return true;
    }
    match (numeric_identifier(&marker_house), numeric_identifier(&tx_house)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Street, locality or town of the sale must be one of the marker's address parts.
fn disambiguates(marker: &NormalizedMarker, tx: &Transaction) -> bool {
    let fields: Vec<String> = [&tx.street, &tx.locality, &tx.town]
        .into_iter()
        .flatten()
        .map(|field| field.trim().to_lowercase())
        .filter(|field| !field.is_empty())
        .collect();

    marker.components.iter().any(|component| {
        let component = component.trim().to_lowercase();
        fields.iter().any(|field| *field == component)
    })
}
