//! Human-readable markdown report of a job's payload.

use std::fmt::Write;

use chrono::SecondsFormat;
use serde_json::Value;

use crate::extraction::Confidence;

use super::payload::{NotificationPayload, PayloadUnit};

/// Renders the units report written next to the payload copy.
///
/// One section per unit with a field table (value, confidence, evidence),
/// then a summary over all units.
pub fn render_units_report(payload: &NotificationPayload) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Contract Extraction Report\n");
    let _ = writeln!(
        out,
        "**Job:** {} | **Status:** {} | **Processed:** {} | **Units:** {}\n",
        payload.job_id,
        payload.status.as_str(),
        payload
            .processed_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        payload.units.len()
    );

    if payload.units.is_empty() {
        out.push_str("No units were extracted.\n");
        return out;
    }

    for (index, unit) in payload.units.iter().enumerate() {
        write_unit(&mut out, index + 1, unit);
    }

    write_summary(&mut out, &payload.units);
    out
}

fn write_unit(out: &mut String, unit_index: usize, unit: &PayloadUnit) {
    let _ = writeln!(out, "## Unit {}\n", unit_index);
    out.push_str("| Field | Value | Confidence | Evidence |\n");
    out.push_str("|---|---|---|---|\n");

    for (field, value) in &unit.unit {
        let confidence = unit
            .confidence
            .get(field)
            .map(Confidence::as_str)
            .unwrap_or("unknown");
        let evidence = unit
            .sources
            .iter()
            .find(|s| &s.field == field)
            .and_then(|s| s.chunk_file_key.as_deref())
            .unwrap_or("-");
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            escape_cell(field),
            escape_cell(&format_value(value)),
            confidence,
            escape_cell(evidence)
        );
    }
    out.push('\n');
}

fn write_summary(out: &mut String, units: &[PayloadUnit]) {
    let ratings: Vec<Confidence> = units
        .iter()
        .flat_map(|u| u.confidence.values().copied())
        .collect();
    let count = |rating: Confidence| ratings.iter().filter(|r| **r == rating).count();
    let fields: usize = units.iter().map(|u| u.unit.len()).sum();
    let with_evidence = units
        .iter()
        .flat_map(|u| u.sources.iter())
        .filter(|s| s.chunk_file_key.is_some())
        .count();

    out.push_str("## Summary\n\n");
    let _ = writeln!(out, "- Fields: {}", fields);
    let _ = writeln!(out, "- With evidence: {} of {}", with_evidence, fields);
    let _ = writeln!(
        out,
        "- Confidence: {} high, {} medium, {} low",
        count(Confidence::High),
        count(Confidence::Medium),
        count(Confidence::Low)
    );
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "N/A".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Keeps a value on one table row.
fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::assembler::{assemble_at, assemble_error};
    use crate::notification::payload::PayloadStatus;
    use crate::extraction::{ExtractionUnit, SourceReference};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn payload() -> NotificationPayload {
        let mut unit = ExtractionUnit::default();
        unit.fields.insert("buyerName".to_string(), json!("Ana | Bruno"));
        unit.fields.insert("sellValue".to_string(), json!(100));
        unit.fields.insert("signingDate".to_string(), json!(null));
        unit.confidence.insert("buyerName".to_string(), Confidence::High);
        unit.confidence.insert("sellValue".to_string(), Confidence::Medium);

        let sources = vec![vec![SourceReference {
            field: "buyerName".to_string(),
            storage_key: Some("s3://b/contracts/c1/unit_1/buyerName.png".to_string()),
            region: None,
        }]];
        assemble_at(
            "c1",
            "b",
            &[unit.clone()],
            &sources,
            &[unit.confidence.clone()],
            PayloadStatus::Success,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_report_lists_fields_in_order() {
        let report = render_units_report(&payload());

        assert!(report.starts_with("# Contract Extraction Report\n"));
        assert!(report.contains("**Job:** c1 | **Status:** success | **Processed:** 2026-03-01T12:00:00Z | **Units:** 1"));
        assert!(report.contains(
            "| buyerName | Ana \\| Bruno | high | s3://b/contracts/c1/unit_1/buyerName.png |"
        ));
        assert!(report.contains("| sellValue | 100 | medium | - |"));
        assert!(report.contains("| signingDate | N/A | low | - |"));

        let buyer = report.find("| buyerName").unwrap();
        let sell = report.find("| sellValue").unwrap();
        assert!(buyer < sell);
    }

    #[test]
    fn test_report_summary() {
        let report = render_units_report(&payload());
        assert!(report.contains("- Fields: 3"));
        assert!(report.contains("- With evidence: 1 of 3"));
        assert!(report.contains("- Confidence: 1 high, 1 medium, 1 low"));
    }

    #[test]
    fn test_error_report_has_no_units() {
        let report = render_units_report(&assemble_error("c1", "b"));
        assert!(report.contains("**Status:** error"));
        assert!(report.contains("No units were extracted."));
        assert!(!report.contains("## Summary"));
    }
}
