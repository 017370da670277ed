// Analyzer module: baselines, before/after extraction and dataset assembly.

pub mod assembler;
pub mod baseline;
pub mod extractor;

#[cfg(test)]
pub mod test_support {
    use crate::model::{Marker, NormalizedMarker, Transaction};
    use crate::normalizer::{AddressNormalizer, KnownAddresses};
    use crate::utils::parse_install_year;
    use chrono::NaiveDate;

    /// A sale on Hopping Lane, Islington, dated 1 January of `year`.
    pub fn sale(
        id: &str,
        row: u64,
        price: f64,
        year: i32,
        postal_code: &str,
        house: &str,
    ) -> Transaction {
        Transaction {
            id: id.to_string(),
            row,
            price,
            sale_date: NaiveDate::from_ymd_opt(year, 1, 1).expect("valid date"),
            postal_code: postal_code.to_string(),
            house_identifier: house.to_string(),
            sub_identifier: None,
            street: Some("HOPPING LANE".to_string()),
            locality: Some("ISLINGTON".to_string()),
            town: None,
            district: None,
            county: Some("GREATER LONDON".to_string()),
        }
    }

    pub fn marker(raw_address: &str, person: Option<&str>, year: &str) -> NormalizedMarker {
        let known = KnownAddresses::default();
        AddressNormalizer::new(&known).normalize_marker(Marker {
            raw_address: raw_address.to_string(),
            person_name: person.map(str::to_string),
            wiki_reference: None,
            install_year_raw: year.to_string(),
            install_year: parse_install_year(year),
        })
    }
}
