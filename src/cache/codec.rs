//! Compact text encoding of cache documents.
//!
//! The output is plain JSON laid out so that every `(variable, year, month)` sits on its own
//! line. A day's value changing touches exactly one line, which keeps diffs of cache files
//! small when they are kept under version control.

use crate::cache::document::{CacheDocument, DayValues};
use crate::utils::round_to;
use serde::Serialize;
use std::fmt::Write;

/// Encodes `document` declaring `schema_version`, rounding values to each variable's precision.
pub fn encode(document: &CacheDocument, schema_version: u32) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    out.push_str("{\n");
    // Writing to a String cannot fail.
    let _ = writeln!(out, "  \"schema_version\": {},", schema_version);
    let _ = writeln!(out, "  \"place\": {},", serde_json::to_string(&document.place)?);

    out.push_str("  \"variables\": {");
    write_entries(&mut out, "    ", &document.variables, |meta| {
        serde_json::to_string(meta)
    })?;
    out.push_str("},\n");

    out.push_str("  \"data\": {");
    let mut first_var = true;
    for (variable, years) in &document.data {
        let precision = document.precision_of(variable);
        out.push_str(if first_var { "\n" } else { ",\n" });
        first_var = false;
        let _ = write!(out, "    {}: {{", serde_json::to_string(variable)?);
        let mut first_year = true;
        for (year, months) in years {
            out.push_str(if first_year { "\n" } else { ",\n" });
            first_year = false;
            let _ = write!(out, "      \"{}\": {{", year);
            let mut first_month = true;
            for (month, days) in months {
                out.push_str(if first_month { "\n" } else { ",\n" });
                first_month = false;
                let _ = write!(out, "        \"{}\": {}", month, encode_days(days, precision)?);
            }
            out.push_str(if first_month { "}" } else { "\n      }" });
        }
        out.push_str(if first_year { "}" } else { "\n    }" });
    }
    out.push_str(if first_var { "}\n" } else { "\n  }\n" });
    out.push_str("}\n");
    Ok(out)
}

/// Parses encoded text back into a raw JSON document, before any validation.
pub fn decode(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_str(text)
}

fn encode_days(days: &DayValues, precision: Option<u32>) -> Result<String, serde_json::Error> {
    let mut line = String::from("{");
    for (i, (day, value)) in days.iter().enumerate() {
        if i > 0 {
            line.push_str(", ");
        }
        let value = precision.map_or(*value, |p| round_to(*value, p));
        let _ = write!(line, "\"{}\": {}", day, serde_json::to_string(&value)?);
    }
    line.push('}');
    Ok(line)
}

fn write_entries<T: Serialize>(
    out: &mut String,
    indent: &str,
    entries: &std::collections::BTreeMap<String, T>,
    encode_value: impl Fn(&T) -> Result<String, serde_json::Error>,
) -> Result<(), serde_json::Error> {
    let mut first = true;
    for (key, value) in entries {
        out.push_str(if first { "\n" } else { ",\n" });
        first = false;
        let _ = write!(
            out,
            "{}{}: {}",
            indent,
            serde_json::to_string(key)?,
            encode_value(value)?
        );
    }
    if !first {
        out.push_str("\n  ");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::location::Location;
    use crate::types::measure::Measure;
    use chrono::NaiveDate;

    fn sample() -> CacheDocument {
        let loc = Location::with_timezone("Austin, TX", 30.27, -97.74, "America/Chicago").unwrap();
        let mut doc = CacheDocument::new(&loc, 2);
        doc.ensure_variable_metadata(Measure::NoonTemperature);
        for day in 1..=3 {
            let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
            doc.insert("noon_temp_C", date, 10.0 + f64::from(day) / 3.0);
        }
        doc.insert(
            "noon_temp_C",
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            5.0,
        );
        doc
    }

    #[test]
    fn one_line_per_month() {
        let text = encode(&sample(), 2).unwrap();
        let month_lines: Vec<_> = text
            .lines()
            .filter(|l| l.trim_start().starts_with("\"1\": {\"1\"") || l.trim_start().starts_with("\"2\": {\"1\""))
            .collect();
        assert_eq!(month_lines.len(), 2);
        assert!(text.contains("\"1\": {\"1\": 10.33, \"2\": 10.67, \"3\": 11.0}"));
    }

    #[test]
    fn encoded_text_is_valid_json() {
        let doc = sample();
        let value = decode(&encode(&doc, 2).unwrap()).unwrap();
        assert_eq!(value["schema_version"], 2);
        assert_eq!(value["place"]["timezone"], "America/Chicago");
        assert_eq!(value["data"]["noon_temp_C"]["2024"]["2"]["1"], 5.0);
        assert_eq!(value["variables"]["noon_temp_C"]["precision"], 2);
    }

    #[test]
    fn empty_document_encodes() {
        let loc = Location::with_timezone("Empty", 0.0, 0.0, "UTC").unwrap();
        let value = decode(&encode(&CacheDocument::new(&loc, 2), 2).unwrap()).unwrap();
        assert!(value["data"].as_object().unwrap().is_empty());
        assert!(value["variables"].as_object().unwrap().is_empty());
    }
}
