use serde::Deserialize;
use std::fs;

/// Which area/year average divides a raw price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AverageType {
    Mean,
    Median,
}

impl AverageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AverageType::Mean => "mean",
            AverageType::Median => "median",
        }
    }
}

/// How a before/after series collapses to one scalar per side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measurement {
    /// Latest year before and earliest year after installation.
    EitherSide,
    /// Mean of every recorded sale on each side.
    Mean,
}

/// What to do when a marker references an area/year with no baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoveragePolicy {
    Abort,
    SkipMarker,
}

impl CoveragePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoveragePolicy::Abort => "abort",
            CoveragePolicy::SkipMarker => "skip_marker",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub transactions_path: String,
    pub markers_path: String,
    pub cache_path: String,
    #[serde(default)]
    pub report_path: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_average_type")]
    pub average_type: AverageType,
    #[serde(default = "default_measurement")]
    pub measurement: Measurement,
    #[serde(default = "default_coverage_policy")]
    pub coverage_policy: CoveragePolicy,
    /// Drop every cached artifact before running.
    #[serde(default)]
    pub rebuild: bool,
    /// Registry page scraped when the marker file does not exist yet.
    #[serde(default)]
    pub registry_url: Option<String>,
}

fn default_chunk_size() -> usize {
    1_000_000
}

fn default_average_type() -> AverageType {
    AverageType::Median
}

fn default_measurement() -> Measurement {
    Measurement::EitherSide
}

fn default_coverage_policy() -> CoveragePolicy {
    CoveragePolicy::Abort
}

pub fn load_config(path: &str) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    if config.chunk_size == 0 {
        return Err("chunk_size must be greater than zero".into());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn optional_fields_take_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        write!(
            file,
            r#"{{"transactions_path": "pp.csv", "markers_path": "bp.csv", "cache_path": "cache.db"}}"#
        )
        .expect("write config");

        let path = file.path().to_str().expect("utf8 path");
        let config = load_config(path).expect("config loads");
        assert_eq!(config.chunk_size, 1_000_000);
        assert_eq!(config.average_type, AverageType::Median);
        assert_eq!(config.measurement, Measurement::EitherSide);
        assert_eq!(config.coverage_policy, CoveragePolicy::Abort);
        assert!(!config.rebuild);
        assert!(config.registry_url.is_none());
    }

    #[test]
    fn enums_are_snake_case() {
        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        write!(
            file,
            r#"{{"transactions_path": "a", "markers_path": "b", "cache_path": "c",
                "average_type": "mean", "measurement": "either_side",
                "coverage_policy": "skip_marker", "chunk_size": 10}}"#
        )
        .expect("write config");

        let config = load_config(file.path().to_str().expect("utf8 path")).expect("config loads");
        assert_eq!(config.average_type, AverageType::Mean);
        assert_eq!(config.coverage_policy, CoveragePolicy::SkipMarker);
        assert_eq!(config.chunk_size, 10);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        write!(
            file,
            r#"{{"transactions_path": "a", "markers_path": "b", "cache_path": "c", "chunk_size": 0}}"#
        )
        .expect("write config");

        assert!(load_config(file.path().to_str().expect("utf8 path")).is_err());
    }

    #[test]
    fn example_config_loads() {
        let config = load_config(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"))
            .expect("example config loads");
        assert_eq!(config.coverage_policy.as_str(), "abort");
        assert!(config.report_path.is_some());
    }
}
