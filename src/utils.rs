// Utility functions
use chrono::{NaiveDate, NaiveDateTime};

/// Returns the area part of a postal code ("N1" from "N1 2NU").
pub fn outward_code(postal_code: &str) -> &str {
    let trimmed = postal_code.trim();
    trimmed.split_whitespace().next().unwrap_or(trimmed)
}

/// Treats empty cells and the literal "nan" left by spreadsheet exports as missing.
pub fn clean_field(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses sale dates as found in price-paid exports: "2017-01-01" or "2017-01-01 00:00".
pub fn parse_sale_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

/// Parses a price as a positive decimal.
pub fn parse_price(value: &str) -> Option<f64> {
    let price = value.trim().parse::<f64>().ok()?;
    (price.is_finite() && price > 0.0).then_some(price)
}

/// Install years arrive as "2015", "2015.0" or "nan".
pub fn parse_install_year(value: &str) -> Option<i32> {
    let trimmed = value.trim();
    if let Ok(year) = trimmed.parse::<i32>() {
        return Some(year);
    }
    let float = trimmed.parse::<f64>().ok()?;
    if float.is_finite() && float.fract() == 0.0 && float.abs() < 10_000.0 {
        Some(float as i32)
    } else {
        None
    }
}

/// Integer value of a house identifier, if it is one.
pub fn numeric_identifier(value: &str) -> Option<i64> {
    value.trim().parse::<i64>().ok()
}

/// Arithmetic mean. `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median of unsorted values. `None` for an empty slice.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outward_code_splits_on_space() {
        assert_eq!(outward_code("N1 2NU"), "N1");
        assert_eq!(outward_code("ALN 2NU"), "ALN");
        assert_eq!(outward_code("N31 2NU"), "N31");
        assert_eq!(outward_code("N7"), "N7");
    }

    #[test]
    fn install_year_accepts_integer_and_float_text() {
        assert_eq!(parse_install_year("2015"), Some(2015));
        assert_eq!(parse_install_year("2015.0"), Some(2015));
        assert_eq!(parse_install_year("nan"), None);
        assert_eq!(parse_install_year("c. 1950"), None);
        assert_eq!(parse_install_year(""), None);
    }

    #[test]
    fn sale_date_formats() {
        let expected = NaiveDate::from_ymd_opt(1995, 8, 9);
        assert_eq!(parse_sale_date("1995-08-09"), expected);
        assert_eq!(parse_sale_date("1995-08-09 00:00"), expected);
        assert_eq!(parse_sale_date("NaN"), None);
    }

    #[test]
    fn price_must_be_positive() {
        assert_eq!(parse_price("100"), Some(100.0));
        assert_eq!(parse_price("0"), None);
        assert_eq!(parse_price("Price"), None);
    }

    #[test]
    fn median_of_even_count_averages_middle() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[]), None);
    }
}
