// Marker registry CSV: address, person, wiki, year
use crate::model::{LoadError, Marker};
use crate::utils::{clean_field, parse_install_year};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct MarkerRow {
    #[serde(alias = "Address")]
    address: String,
    #[serde(alias = "Person", default)]
    person: Option<String>,
    #[serde(alias = "Wiki", default)]
    wiki: Option<String>,
    #[serde(alias = "Year", default)]
    year: Option<String>,
}

impl From<MarkerRow> for Marker {
    fn from(row: MarkerRow) -> Self {
        let install_year_raw = row.year.unwrap_or_default().trim().to_string();
        Marker {
            raw_address: row.address,
            person_name: row.person.as_deref().and_then(clean_field),
            wiki_reference: row.wiki.as_deref().and_then(clean_field),
            install_year: parse_install_year(&install_year_raw),
            install_year_raw,
        }
    }
}

impl From<&Marker> for MarkerRow {
    fn from(marker: &Marker) -> Self {
        MarkerRow {
            address: marker.raw_address.clone(),
            person: marker.person_name.clone(),
            wiki: marker.wiki_reference.clone(),
            year: Some(marker.install_year_raw.clone()),
        }
    }
}

pub fn load_markers(path: impl AsRef<Path>) -> Result<Vec<Marker>, LoadError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    read_markers(file)
}

pub fn read_markers<R: Read>(input: R) -> Result<Vec<Marker>, LoadError> {
    let mut reader = csv::Reader::from_reader(input);
    let mut markers = Vec::new();
    for row in reader.deserialize::<MarkerRow>() {
        markers.push(Marker::from(row?));
    }
    Ok(markers)
}

pub fn write_markers(path: impl AsRef<Path>, markers: &[Marker]) -> Result<(), LoadError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| LoadError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let file = std::fs::File::create(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    write_rows(file, markers)
}

fn write_rows<W: Write>(output: W, markers: &[Marker]) -> Result<(), LoadError> {
    let mut writer = csv::Writer::from_writer(output);
    for marker in markers {
        writer.serialize(MarkerRow::from(marker))?;
    }
    writer.flush().map_err(|source| LoadError::Io {
        path: "<markers>".to_string(),
        source,
    })?;
    Ok(())
}
