// Tabular report: one row per before/after series of a named marker
use crate::analyzer::extractor::{Extraction, MergePolicy, owners};
use crate::model::{NormalizedMarker, ReportError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub person: String,
    pub postal_code: String,
    pub house_identifier: String,
    pub install_year: i32,
    /// JSON object of sale year to weighted price.
    pub weighted_prices_before: String,
    pub weighted_prices_after: String,
}

/// Rows for every series whose owning marker names a person.
pub fn report_rows(
    extraction: &Extraction,
    markers: &[NormalizedMarker],
) -> Result<Vec<ReportRow>, ReportError> {
    let owners = owners(markers);
    let mut rows = Vec::new();
    for (key, series) in extraction.series() {
        let Some(marker) = owners.get(&key.address) else {
            continue;
        };
        let (Some(person), Some(install_year)) =
            (marker.marker.person_name.as_ref(), marker.marker.install_year)
        else {
            continue;
        };
        rows.push(ReportRow {
            person: person.clone(),
            postal_code: marker.address.postal_code.clone().unwrap_or_default(),
            house_identifier: key.house_identifier.clone(),
            install_year,
            weighted_prices_before: encode(
                &series.resolved_before(MergePolicy::OverwriteOnConflict),
            )?,
            weighted_prices_after: encode(&series.resolved_after(MergePolicy::OverwriteOnConflict))?,
        });
    }
    Ok(rows)
}

fn encode(prices: &BTreeMap<i32, f64>) -> Result<String, ReportError> {
    Ok(serde_json::to_string(prices)?)
}

pub fn write_report(
    path: impl AsRef<Path>,
    extraction: &Extraction,
    markers: &[NormalizedMarker],
) -> Result<usize, ReportError> {
    let path = path.as_ref();
    let io_error = |source| ReportError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    let file = std::fs::File::create(path).map_err(io_error)?;
    let rows = report_rows(extraction, markers)?;
    write_rows(file, &rows)?;
    Ok(rows.len())
}

fn write_rows<W: Write>(output: W, rows: &[ReportRow]) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_writer(output);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}
