use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-field reliability signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    // Declaration order gives Low < Medium < High
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Lowers the rating to `ceiling` when it is above it.
    pub fn capped_at(self, ceiling: Confidence) -> Confidence {
        self.min(ceiling)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logical sub-record found in a document.
///
/// Field order is preserved from the extraction response through to the
/// outbound payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionUnit {
    #[serde(default)]
    pub fields: IndexMap<String, Value>,
    #[serde(default)]
    pub confidence: IndexMap<String, Confidence>,
}

impl ExtractionUnit {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

/// Page location a value was read from. `bbox` is `[x0, y0, x1, y1]` in page
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceRegion {
    pub page: u32,
    pub bbox: [f64; 4],
}

/// Provenance as reported by an extraction pass, before evidence capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSource {
    pub field: String,
    /// Text chunk the value was read from, when the pass reports it.
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub region: Option<SourceRegion>,
}

/// A unit together with the provenance reported for its fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedUnit {
    pub unit: ExtractionUnit,
    #[serde(default)]
    pub sources: Vec<FieldSource>,
}

/// Provenance of one field after evidence capture.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReference {
    pub field: String,
    /// `s3://{bucket}/{key}` of the rendered crop; `None` when no evidence exists.
    pub storage_key: Option<String>,
    pub region: Option<SourceRegion>,
}

impl SourceReference {
    pub fn without_evidence(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            storage_key: None,
            region: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_ordering_and_cap() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
        assert_eq!(
            Confidence::High.capped_at(Confidence::Medium),
            Confidence::Medium
        );
        assert_eq!(Confidence::Low.capped_at(Confidence::Medium), Confidence::Low);
    }

    #[test]
    fn test_confidence_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Confidence::High).unwrap(), "\"high\"");
        let parsed: Confidence = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(parsed, Confidence::Medium);
    }

    #[test]
    fn test_extracted_unit_deserializes_with_defaults() {
        let json = r#"{
            "unit": {
                "fields": {"buyerName": "X", "sellValue": 100},
                "confidence": {"buyerName": "high"}
            }
        }"#;
        let extracted: ExtractedUnit = serde_json::from_str(json).unwrap();
        assert!(extracted.sources.is_empty());
        let keys: Vec<_> = extracted.unit.fields.keys().cloned().collect();
        assert_eq!(keys, vec!["buyerName", "sellValue"]);
    }
}
