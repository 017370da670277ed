//! Before/after extraction.
//!
//! Every transaction exactly linked to a marker is classified against the
//! marker's install year and recorded, weighted by its area/year baseline,
//! into a series keyed by (address, house identifier, sub identifier). Sales
//! in the install year itself are dropped. Transactions that share an
//! outward code with a marker but are not exactly linked become controls.

use crate::analyzer::baseline::BaselineTable;
use crate::config::{AverageType, CoveragePolicy};
use crate::linker::LinkTable;
use crate::model::{ExtractError, NormalizedMarker, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Composite key of one before/after series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub address: String,
    pub house_identifier: String,
    pub sub_identifier: Option<String>,
}

/// A weighted sale, remembered with its source row so that merges stay ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalePoint {
    pub row: u64,
    pub transaction_id: String,
    pub weighted_price: f64,
}

/// How several sales in the same year collapse to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// The sale recorded last (highest row) wins the year.
    #[default]
    OverwriteOnConflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Before,
    After,
}

/// Sales of one series on either side of the install year, by sale year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeforeAfter {
    pub before: BTreeMap<i32, Vec<SalePoint>>,
    pub after: BTreeMap<i32, Vec<SalePoint>>,
}

impl BeforeAfter {
    fn record(&mut self, side: Side, year: i32, point: SalePoint) {
        let points = match side {
            Side::Before => self.before.entry(year).or_default(),
            Side::After => self.after.entry(year).or_default(),
        };
        insert_by_row(points, point);
    }

    /// Only complete series feed the repeated-measures comparison.
    pub fn is_complete(&self) -> bool {
        !self.before.is_empty() && !self.after.is_empty()
    }

    pub fn resolved_before(&self, policy: MergePolicy) -> BTreeMap<i32, f64> {
        resolve(&self.before, policy)
    }

    pub fn resolved_after(&self, policy: MergePolicy) -> BTreeMap<i32, f64> {
        resolve(&self.after, policy)
    }

    /// Every recorded weighted price before install, by year then row.
    pub fn before_prices(&self) -> impl Iterator<Item = f64> + '_ {
        self.before.values().flatten().map(|p| p.weighted_price)
    }

    pub fn after_prices(&self) -> impl Iterator<Item = f64> + '_ {
        self.after.values().flatten().map(|p| p.weighted_price)
    }

    fn merge(&mut self, other: BeforeAfter) {
        for (year, points) in other.before {
            for point in points {
                self.record(Side::Before, year, point);
            }
        }
        for (year, points) in other.after {
            for point in points {
                self.record(Side::After, year, point);
            }
        }
    }
}

fn insert_by_row(points: &mut Vec<SalePoint>, point: SalePoint) {
    let at = points.partition_point(|p| p.row < point.row);
    points.insert(at, point);
}

fn resolve(side: &BTreeMap<i32, Vec<SalePoint>>, policy: MergePolicy) -> BTreeMap<i32, f64> {
    side.iter()
        .filter_map(|(year, points)| match policy {
            MergePolicy::OverwriteOnConflict => points.last().map(|p| (*year, p.weighted_price)),
        })
        .collect()
}

/// Series and controls gathered from one or more chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(with = "series_rows")]
    series: BTreeMap<SeriesKey, BeforeAfter>,
    controls: Vec<SalePoint>,
    /// Marker addresses dropped for missing baseline coverage.
    coverage_gaps: BTreeSet<String>,
    skipped_controls: u64,
}

impl Extraction {
    pub fn series(&self) -> impl Iterator<Item = (&SeriesKey, &BeforeAfter)> {
        self.series.iter()
    }

    pub fn get(&self, key: &SeriesKey) -> Option<&BeforeAfter> {
        self.series.get(key)
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Control weighted prices in source row order.
    pub fn controls(&self) -> &[SalePoint] {
        &self.controls
    }

    pub fn coverage_gaps(&self) -> &BTreeSet<String> {
        &self.coverage_gaps
    }

    pub fn skipped_controls(&self) -> u64 {
        self.skipped_controls
    }

    /// Concatenating union; the result does not depend on merge order.
    pub fn merge(&mut self, other: Extraction) {
        for (key, series) in other.series {
            self.series.entry(key).or_default().merge(series);
        }
        for point in other.controls {
            insert_by_row(&mut self.controls, point);
        }
        self.coverage_gaps.extend(other.coverage_gaps);
        self.skipped_controls += other.skipped_controls;
    }

    /// Drops every series of a marker that hit a coverage gap in any chunk.
    pub fn finish(mut self) -> Self {
        if !self.coverage_gaps.is_empty() {
            let gaps = &self.coverage_gaps;
            self.series.retain(|key, _| !gaps.contains(&key.address));
        }
        self
    }
}

mod series_rows {
    use super::{BeforeAfter, SeriesKey};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        series: &BTreeMap<SeriesKey, BeforeAfter>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(series.iter())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<SeriesKey, BeforeAfter>, D::Error> {
        let rows: Vec<(SeriesKey, BeforeAfter)> = Vec::deserialize(deserializer)?;
        Ok(rows.into_iter().collect())
    }
}

/// Marker-level counts fixed before any transaction is read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub linked: usize,
    pub skipped_install_year: usize,
    pub duplicates: usize,
    /// Linkable markers whose postal code had no transactions at all.
    pub unlinked: usize,
    /// Markers missing from the exact table (no postal code or house identifier).
    pub unmatchable: usize,
}

/// The first marker with a usable install year owns its address.
pub fn owners(markers: &[NormalizedMarker]) -> BTreeMap<String, &NormalizedMarker> {
    let mut owners = BTreeMap::new();
    for marker in markers {
        if marker.marker.install_year.is_some() {
            owners.entry(marker.key()).or_insert(marker);
        }
    }
    owners
}

pub struct Extractor<'a> {
    baselines: &'a BaselineTable,
    average: AverageType,
    coverage: CoveragePolicy,
    /// Transaction id to the (address, install year) pairs it is linked to.
    linked: HashMap<&'a str, Vec<(&'a str, i32)>>,
    controls: HashSet<&'a str>,
    summary: ExtractionSummary,
}

impl<'a> Extractor<'a> {
    pub fn new(
        exact: &'a LinkTable,
        area: &'a LinkTable,
        markers: &'a [NormalizedMarker],
        baselines: &'a BaselineTable,
        average: AverageType,
        coverage: CoveragePolicy,
    ) -> Self {
        let mut summary = ExtractionSummary::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut linked: HashMap<&str, Vec<(&str, i32)>> = HashMap::new();

        for marker in markers {
            let Some(year) = marker.marker.install_year else {
                debug!("Skipping marker with install year {:?}", marker.marker.install_year_raw);
                summary.skipped_install_year += 1;
                continue;
            };
            if !seen.insert(marker.key()) {
                summary.duplicates += 1;
                continue;
            }
            match exact.lookup(&marker.key()) {
                Some((key, Some(ids))) => {
                    summary.linked += 1;
                    for id in ids {
                        linked.entry(id.as_str()).or_default().push((key, year));
                    }
                }
                Some((_, None)) => summary.unlinked += 1,
                None => summary.unmatchable += 1,
            }
        }

        let marker_ids = exact.ids();
        let controls = area
            .ids()
            .into_iter()
            .filter(|id| !marker_ids.contains(id))
            .collect();

        Self {
            baselines,
            average,
            coverage,
            linked,
            controls,
            summary,
        }
    }

    pub fn summary(&self) -> &ExtractionSummary {
        &self.summary
    }

    pub fn extract_chunk(&self, chunk: &[Transaction]) -> Result<Extraction, ExtractError> {
        let mut extraction = Extraction::default();
        for tx in chunk {
            if let Some(owners) = self.linked.get(tx.id.as_str()) {
                for &(address, install_year) in owners {
                    self.record_linked(&mut extraction, tx, address, install_year)?;
                }
            } else if self.controls.contains(tx.id.as_str()) {
                self.record_control(&mut extraction, tx)?;
            }
        }
        Ok(extraction)
    }

    pub fn extract(&self, transactions: &[Transaction]) -> Result<Extraction, ExtractError> {
        Ok(self.extract_chunk(transactions)?.finish())
    }

    fn record_linked(
        &self,
        extraction: &mut Extraction,
        tx: &Transaction,
        address: &str,
        install_year: i32,
    ) -> Result<(), ExtractError> {
        let year = tx.sale_year();
        let side = match year.cmp(&install_year) {
            std::cmp::Ordering::Less => Side::Before,
            std::cmp::Ordering::Greater => Side::After,
            std::cmp::Ordering::Equal => return Ok(()),
        };

        let weighted = match self
            .baselines
            .weight(tx.price, tx.outward_code(), year, self.average)
        {
            Ok(weighted) => weighted,
            Err(source) => match self.coverage {
                CoveragePolicy::Abort => {
                    return Err(ExtractError::Coverage {
                        address: address.to_string(),
                        source,
                    });
                }
                CoveragePolicy::SkipMarker => {
                    warn!("Dropping marker {:?}: {}", address, source);
                    extraction.coverage_gaps.insert(address.to_string());
                    return Ok(());
                }
            },
        };

        let key = SeriesKey {
            address: address.to_string(),
            house_identifier: tx.house_identifier.clone(),
            sub_identifier: tx.sub_identifier.clone(),
        };
        extraction.series.entry(key).or_default().record(
            side,
            year,
            SalePoint {
                row: tx.row,
                transaction_id: tx.id.clone(),
                weighted_price: weighted,
            },
        );
        Ok(())
    }

    fn record_control(
        &self,
        extraction: &mut Extraction,
        tx: &Transaction,
    ) -> Result<(), ExtractError> {
        match self
            .baselines
            .weight(tx.price, tx.outward_code(), tx.sale_year(), self.average)
        {
            Ok(weighted) => {
                insert_by_row(
                    &mut extraction.controls,
                    SalePoint {
                        row: tx.row,
                        transaction_id: tx.id.clone(),
                        weighted_price: weighted,
                    },
                );
                Ok(())
            }
            Err(source) => match self.coverage {
                CoveragePolicy::Abort => Err(ExtractError::ControlCoverage {
                    id: tx.id.clone(),
                    source,
                }),
                CoveragePolicy::SkipMarker => {
                    warn!("Skipping control {}: {}", tx.id, source);
                    extraction.skipped_controls += 1;
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::assembler::assemble;
    use crate::analyzer::baseline::build_baselines;
    use crate::analyzer::test_support::{marker, sale};
    use crate::config::Measurement;
    use crate::linker::{AreaLinker, ExactLinker};
    use crate::model::BaselineError;

    const ADDRESS: &str = "2 Hopping Lane, Islington, London, N1 2NU";

    fn sales() -> Vec<Transaction> {
        vec![
            sale("tx-00", 0, 100.0, 2017, "N1 2NU", "2"),
            sale("tx-01", 1, 200.0, 2017, "N1 2NU", "2"),
            sale("tx-02", 2, 300.0, 2017, "N1 2NU", "2"),
            sale("tx-03", 3, 400.0, 2014, "N1 2NU", "2"),
            sale("tx-04", 4, 500.0, 2014, "N1 2NU", "2"),
            sale("tx-05", 5, 600.0, 2014, "N1 2NU", "2"),
            sale("tx-06", 6, 700.0, 2014, "N1 2NU", "4"),
            sale("tx-07", 7, 800.0, 2014, "N1 2NU", "4"),
            sale("tx-08", 8, 900.0, 2014, "N7 2NU", "2"),
            sale("tx-09", 9, 250.0, 2015, "N1 2NU", "2"),
            sale("tx-11", 11, 900.0, 2016, "N7 2NU", "2"),
        ]
    }

    fn markers() -> Vec<NormalizedMarker> {
        vec![
            marker(ADDRESS, Some("Matt Barson"), "2015"),
            marker("4 Hopping Lane, Islington, London, N7 2NU", Some("Chris Barson"), "2015"),
            marker("4 Hopping Lane, Islington, London, N7 2NU", Some("Chris Barson"), "nan"),
            marker("4 Hopping Lane, Islington, London, N7 2NU", None, "2015"),
        ]
    }

    fn key() -> SeriesKey {
        SeriesKey {
            address: ADDRESS.to_uppercase(),
            house_identifier: "2".to_string(),
            sub_identifier: None,
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-3
    }

    struct Fixture {
        markers: Vec<NormalizedMarker>,
        sales: Vec<Transaction>,
        exact: LinkTable,
        area: LinkTable,
        baselines: BaselineTable,
    }

    fn fixture() -> Fixture {
        let markers = markers();
        let sales = sales();
        let exact = ExactLinker::new(&markers).link(&sales);
        let area = AreaLinker::new(&markers).link(&sales);
        let baselines = build_baselines(&sales);
        Fixture {
            markers,
            sales,
            exact,
            area,
            baselines,
        }
    }

    #[test]
    fn splits_sales_around_install_year() {
        let f = fixture();
        let extractor = Extractor::new(
            &f.exact,
            &f.area,
            &f.markers,
            &f.baselines,
            AverageType::Mean,
            CoveragePolicy::Abort,
        );
        let extraction = extractor.extract(&f.sales).expect("covered");

        assert_eq!(extraction.series_count(), 1);
        let series = extraction.get(&key()).expect("series");
        let before: Vec<f64> = series.before_prices().collect();
        let after: Vec<f64> = series.after_prices().collect();
        assert_eq!(before.len(), 3);
        assert!(close(before[0], 0.6667) && close(before[2], 1.0));
        assert_eq!(after, vec![0.5, 1.0, 1.5]);
        // The 2015 sale tx-09 is the install year and is dropped.
        assert!(!series.before.contains_key(&2015) && !series.after.contains_key(&2015));
    }

    #[test]
    fn overwrite_on_conflict_keeps_highest_row() {
        let f = fixture();
        let extractor = Extractor::new(
            &f.exact,
            &f.area,
            &f.markers,
            &f.baselines,
            AverageType::Mean,
            CoveragePolicy::Abort,
        );
        let extraction = extractor.extract(&f.sales).expect("covered");
        let series = extraction.get(&key()).expect("series");

        let before = series.resolved_before(MergePolicy::OverwriteOnConflict);
        let after = series.resolved_after(MergePolicy::OverwriteOnConflict);
        assert_eq!(before.get(&2014), Some(&1.0));
        assert_eq!(after.get(&2017), Some(&1.5));
    }

    #[test]
    fn counts_each_excluded_marker_once() {
        let f = fixture();
        let extractor = Extractor::new(
            &f.exact,
            &f.area,
            &f.markers,
            &f.baselines,
            AverageType::Median,
            CoveragePolicy::Abort,
        );
        let summary = extractor.summary();
        assert_eq!(summary.skipped_install_year, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.linked, 2);
        assert_eq!(summary.unlinked, 0);
    }

    #[test]
    fn marker_without_install_year_feeds_no_dataset() {
        let markers = vec![marker(ADDRESS, Some("Matt Barson"), "nan")];
        let sales = vec![
            sale("tx-00", 0, 100.0, 2017, "N1 2NU", "2"),
            sale("tx-03", 3, 400.0, 2014, "N1 2NU", "2"),
            sale("tx-06", 6, 700.0, 2014, "N1 2NU", "4"),
        ];
        let exact = ExactLinker::new(&markers).link(&sales);
        let area = AreaLinker::new(&markers).link(&sales);
        let baselines = build_baselines(&sales);
        let extractor = Extractor::new(
            &exact,
            &area,
            &markers,
            &baselines,
            AverageType::Mean,
            CoveragePolicy::Abort,
        );
        assert_eq!(extractor.summary().skipped_install_year, 1);
        assert_eq!(extractor.summary().linked, 0);

        let extraction = extractor.extract(&sales).expect("covered");
        assert_eq!(extraction.series_count(), 0);
        let control_ids: Vec<&str> = extraction
            .controls()
            .iter()
            .map(|p| p.transaction_id.as_str())
            .collect();
        assert_eq!(control_ids, vec!["tx-06"]);

        let datasets = assemble(&extraction, Measurement::Mean, None);
        assert!(datasets.repeated.before.is_empty() && datasets.repeated.after.is_empty());
        assert!(datasets.single.sample.is_empty());
        assert!(datasets.independent.markers.is_empty());
        assert_eq!(datasets.independent.controls.len(), 1);
    }

    #[test]
    fn controls_are_area_sales_outside_the_exact_table() {
        let f = fixture();
        let extractor = Extractor::new(
            &f.exact,
            &f.area,
            &f.markers,
            &f.baselines,
            AverageType::Mean,
            CoveragePolicy::Abort,
        );
        let extraction = extractor.extract(&f.sales).expect("covered");
        let ids: Vec<&str> = extraction
            .controls()
            .iter()
            .map(|p| p.transaction_id.as_str())
            .collect();
        assert_eq!(ids, vec!["tx-06", "tx-07", "tx-08", "tx-11"]);
    }

    #[test]
    fn chunk_merge_is_commutative() {
        let f = fixture();
        let extractor = Extractor::new(
            &f.exact,
            &f.area,
            &f.markers,
            &f.baselines,
            AverageType::Mean,
            CoveragePolicy::Abort,
        );
        let (a, b) = f.sales.split_at(4);
        let a = extractor.extract_chunk(a).expect("chunk a");
        let b = extractor.extract_chunk(b).expect("chunk b");

        let mut forward = a.clone();
        forward.merge(b.clone());
        let mut backward = b;
        backward.merge(a);

        assert_eq!(forward, backward);
        assert_eq!(forward.finish(), extractor.extract(&f.sales).expect("whole"));
    }

    #[test]
    fn missing_coverage_aborts_or_drops_the_marker() {
        let f = fixture();
        let only_2014 = build_baselines(&f.sales[3..9]);

        let strict = Extractor::new(
            &f.exact,
            &f.area,
            &f.markers,
            &only_2014,
            AverageType::Mean,
            CoveragePolicy::Abort,
        );
        match strict.extract(&f.sales) {
            Err(ExtractError::Coverage { address, source }) => {
                assert_eq!(address, ADDRESS.to_uppercase());
                assert_eq!(
                    source,
                    BaselineError::MissingCoverage {
                        outward_code: "N1".to_string(),
                        year: 2017
                    }
                );
            }
            other => panic!("expected coverage error, got {other:?}"),
        }

        let lenient = Extractor::new(
            &f.exact,
            &f.area,
            &f.markers,
            &only_2014,
            AverageType::Mean,
            CoveragePolicy::SkipMarker,
        );
        let extraction = lenient.extract(&f.sales).expect("skips");
        assert_eq!(extraction.series_count(), 0);
        assert!(extraction.coverage_gaps().contains(&ADDRESS.to_uppercase()));
        assert_eq!(extraction.skipped_controls(), 1);
    }

    #[test]
    fn serializes_series_as_rows() {
        let f = fixture();
        let extractor = Extractor::new(
            &f.exact,
            &f.area,
            &f.markers,
            &f.baselines,
            AverageType::Mean,
            CoveragePolicy::Abort,
        );
        let extraction = extractor.extract(&f.sales).expect("covered");
        let bytes = serde_json::to_vec(&extraction).expect("serialize");
        let back: Extraction = serde_json::from_slice(&bytes).expect("deserialize");
        assert_eq!(back, extraction);
    }
}
