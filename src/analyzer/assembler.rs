use crate::analyzer::baseline::PopulationParameters;
use crate::analyzer::extractor::{Extraction, MergePolicy};
use crate::config::Measurement;
use crate::utils::mean;
use serde::Serialize;
use std::fmt;

/// Fewest observations a comparison can be run on.
pub const MIN_SAMPLE: usize = 2;

/// Parallel per-series scalars; `before[i]` and `after[i]` come from the same series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepeatedPairs {
    pub before: Vec<f64>,
    pub after: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SingleSample {
    pub sample: Vec<f64>,
    pub population: Option<PopulationParameters>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndependentPair {
    pub markers: Vec<f64>,
    /// Every non-marker sale in a marker outward code, whatever its year.
    pub controls: Vec<f64>,
}

/// The three datasets handed to the hypothesis tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Datasets {
    pub repeated: RepeatedPairs,
    pub single: SingleSample,
    pub independent: IndependentPair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleCheck {
    Sufficient { observations: usize },
    InsufficientSample { observations: usize, required: usize },
}

impl SampleCheck {
    fn of(observations: usize) -> Self {
        if observations < MIN_SAMPLE {
            SampleCheck::InsufficientSample {
                observations,
                required: MIN_SAMPLE,
            }
        } else {
            SampleCheck::Sufficient { observations }
        }
    }

    pub fn is_sufficient(&self) -> bool {
        matches!(self, SampleCheck::Sufficient { .. })
    }
}

impl fmt::Display for SampleCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleCheck::Sufficient { observations } => {
                write!(f, "ok ({} observations)", observations)
            }
            SampleCheck::InsufficientSample { observations, required } => write!(
                f,
                "insufficient sample: {} observations, at least {} required",
                observations, required
            ),
        }
    }
}

impl Datasets {
    /// One check per dataset, named for logging.
    pub fn checks(&self) -> [(&'static str, SampleCheck); 3] {
        [
            ("repeated", SampleCheck::of(self.repeated.before.len())),
            ("single", SampleCheck::of(self.single.sample.len())),
            (
                "independent",
                SampleCheck::of(
                    self.independent
                        .markers
                        .len()
                        .min(self.independent.controls.len()),
                ),
            ),
        ]
    }
}

/// Builds the repeated, single-sample and independent datasets from an extraction.
pub fn assemble(
    extraction: &Extraction,
    measurement: Measurement,
    population: Option<PopulationParameters>,
) -> Datasets {
    let mut datasets = Datasets {
        single: SingleSample {
            sample: Vec::new(),
            population,
        },
        ..Datasets::default()
    };

    for (_, series) in extraction.series() {
        datasets.single.sample.extend(series.after_prices());
        datasets.independent.markers.extend(series.after_prices());

        if !series.is_complete() {
            continue;
        }
        let pair = match measurement {
            Measurement::EitherSide => {
                let before = series.resolved_before(MergePolicy::OverwriteOnConflict);
                let after = series.resolved_after(MergePolicy::OverwriteOnConflict);
                before
                    .last_key_value()
                    .zip(after.first_key_value())
                    .map(|((_, b), (_, a))| (*b, *a))
            }
            Measurement::Mean => {
                let before: Vec<f64> = series.before_prices().collect();
                let after: Vec<f64> = series.after_prices().collect();
                mean(&before).zip(mean(&after))
            }
        };
        if let Some((before, after)) = pair {
            datasets.repeated.before.push(before);
            datasets.repeated.after.push(after);
        }
    }

    datasets.independent.controls = extraction
        .controls()
        .iter()
        .map(|p| p.weighted_price)
        .collect();
    datasets
}
