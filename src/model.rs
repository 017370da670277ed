// Core records: Transaction, Marker, NormalizedMarker, and the error taxonomy
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One row of the price-paid file. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Ordinal of the row in the source file. Defines recording order.
    pub row: u64,
    pub price: f64,
    pub sale_date: NaiveDate,
    pub postal_code: String,
    pub house_identifier: String,
    pub sub_identifier: Option<String>,
    pub street: Option<String>,
    pub locality: Option<String>,
    pub town: Option<String>,
    pub district: Option<String>,
    pub county: Option<String>,
}

impl Transaction {
    pub fn outward_code(&self) -> &str {
        crate::utils::outward_code(&self.postal_code)
    }

    pub fn sale_year(&self) -> i32 {
        use chrono::Datelike;
        self.sale_date.year()
    }
}

/// A plaque as listed in the marker registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub raw_address: String,
    pub person_name: Option<String>,
    pub wiki_reference: Option<String>,
    /// Text as found in the registry, kept for the report.
    pub install_year_raw: String,
    pub install_year: Option<i32>,
}

impl Marker {
    /// Upper-cased raw address; the key used by the link table and the series.
    pub fn address_key(&self) -> String {
        self.raw_address.trim().to_uppercase()
    }
}

/// The postal code, house identifier and street extracted from a raw address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedAddress {
    pub postal_code: Option<String>,
    pub house_identifier: Option<String>,
    pub street: Option<String>,
}

/// A marker together with its normalized address, derived once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMarker {
    pub marker: Marker,
    pub address: NormalizedAddress,
    /// Upper-cased address parts with the postal code and house identifier removed.
    pub components: Vec<String>,
}

impl NormalizedMarker {
    pub fn key(&self) -> String {
        self.marker.address_key()
    }

    /// Postal code and house identifier are both required for exact linking.
    pub fn is_linkable(&self) -> bool {
        self.address.postal_code.is_some() && self.address.house_identifier.is_some()
    }

    pub fn outward_code(&self) -> Option<&str> {
        self.address
            .postal_code
            .as_deref()
            .map(crate::utils::outward_code)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BaselineError {
    #[error("no baseline coverage for area {outward_code} in {year}")]
    MissingCoverage { outward_code: String, year: i32 },
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("marker at {address}: {source}")]
    Coverage {
        address: String,
        #[source]
        source: BaselineError,
    },
    #[error("control transaction {id}: {source}")]
    ControlCoverage {
        id: String,
        #[source]
        source: BaselineError,
    },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("artifact serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("http error: {0}")]
    HttpError(String),
    #[error("invalid response status {0}")]
    InvalidResponse(u16),
    #[error(transparent)]
    Parse(#[from] ParserError),
}

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("html parse error: {0}")]
    HtmlParseError(String),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("price list encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Anything that can stop a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Report(#[from] ReportError),
}
