use crate::config::AverageType;
use crate::model::{BaselineError, Transaction};
use crate::utils::{mean, median};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Baseline bucket: outward code plus calendar year of sale.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AreaYear {
    pub outward_code: String,
    pub year: i32,
}

impl AreaYear {
    pub fn new(outward_code: impl Into<String>, year: i32) -> Self {
        Self {
            outward_code: outward_code.into(),
            year,
        }
    }
}

/// Price statistics for one area/year bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub count: u64,
    pub mean: f64,
    pub median: f64,
    /// Sample (n-1) standard deviation; zero for a single sale.
    pub sd: f64,
    pub sum: f64,
    pub sum_sqr: f64,
}

impl BaselineEntry {
    fn from_prices(prices: &[f64]) -> Option<Self> {
        let avg = mean(prices)?;
        let count = prices.len() as u64;
        let sum: f64 = prices.iter().sum();
        let sum_sqr: f64 = prices.iter().map(|p| p * p).sum();
        let sd = if count > 1 {
            (prices.iter().map(|p| (p - avg).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
        } else {
            0.0
        };

        Some(Self {
            count,
            mean: avg,
            median: median(prices)?,
            sd,
            sum,
            sum_sqr,
        })
    }

    pub fn average(&self, average: AverageType) -> f64 {
        match average {
            AverageType::Mean => self.mean,
            AverageType::Median => self.median,
        }
    }

    /// Population (n) standard deviation, derived from the sums.
    pub fn population_sd(&self) -> f64 {
        let n = self.count as f64;
        ((self.sum_sqr - self.sum * self.sum / n) / n).max(0.0).sqrt()
    }
}

/// Collects prices per bucket across chunks. Merging is order-independent.
#[derive(Debug, Default)]
pub struct BaselineAccumulator {
    prices: HashMap<AreaYear, Vec<f64>>,
}

impl BaselineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, tx: &Transaction) {
        self.prices
            .entry(AreaYear::new(tx.outward_code(), tx.sale_year()))
            .or_default()
            .push(tx.price);
    }

    pub fn record_chunk(&mut self, chunk: &[Transaction]) {
        for tx in chunk {
            self.record(tx);
        }
    }

    pub fn merge(&mut self, other: BaselineAccumulator) {
        for (key, prices) in other.prices {
            self.prices.entry(key).or_default().extend(prices);
        }
    }

    pub fn finish(self) -> BaselineTable {
        let entries = self
            .prices
            .into_iter()
            .filter_map(|(key, prices)| {
                BaselineEntry::from_prices(&prices).map(|entry| (key, entry))
            })
            .collect();
        BaselineTable { entries }
    }
}

/// Pooled weighted-price mean and variance over every baseline bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationParameters {
    pub mean: f64,
    pub variance: f64,
    pub count: u64,
}

/// Area/year baselines. A bucket that was never observed is a lookup error, not a neutral weight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<(AreaYear, BaselineEntry)>", into = "Vec<(AreaYear, BaselineEntry)>")]
pub struct BaselineTable {
    entries: BTreeMap<AreaYear, BaselineEntry>,
}

impl From<Vec<(AreaYear, BaselineEntry)>> for BaselineTable {
    fn from(rows: Vec<(AreaYear, BaselineEntry)>) -> Self {
        Self {
            entries: rows.into_iter().collect(),
        }
    }
}

impl From<BaselineTable> for Vec<(AreaYear, BaselineEntry)> {
    fn from(table: BaselineTable) -> Self {
        table.entries.into_iter().collect()
    }
}

impl BaselineTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, outward_code: &str, year: i32) -> Result<&BaselineEntry, BaselineError> {
        self.entries
            .get(&AreaYear::new(outward_code, year))
            .ok_or_else(|| BaselineError::MissingCoverage {
                outward_code: outward_code.to_string(),
                year,
            })
    }

    /// Price divided by the bucket average.
    pub fn weight(
        &self,
        price: f64,
        outward_code: &str,
        year: i32,
        average: AverageType,
    ) -> Result<f64, BaselineError> {
        let entry = self.get(outward_code, year)?;
        Ok(price / entry.average(average))
    }

    /// Sums-of-squares pooling across all buckets, each price weighted by its own bucket.
    pub fn population(&self, average: AverageType) -> Option<PopulationParameters> {
        let mut sum_w = 0.0;
        let mut sum_w2 = 0.0;
        let mut count = 0u64;
        for entry in self.entries.values() {
            let divisor = entry.average(average);
            if divisor <= 0.0 {
                continue;
            }
            sum_w += entry.sum / divisor;
            sum_w2 += entry.sum_sqr / (divisor * divisor);
            count += entry.count;
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(PopulationParameters {
            mean: sum_w / n,
            variance: (sum_w2 - sum_w * sum_w / n) / n,
            count,
        })
    }
}

/// Single-pass convenience over an in-memory table.
pub fn build_baselines(transactions: &[Transaction]) -> BaselineTable {
    let mut accumulator = BaselineAccumulator::new();
    accumulator.record_chunk(transactions);
    accumulator.finish()
}
