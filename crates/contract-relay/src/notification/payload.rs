use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::extraction::Confidence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadStatus {
    Success,
    Error,
}

impl PayloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadStatus::Success => "success",
            PayloadStatus::Error => "error",
        }
    }
}

/// The externally observable result of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub job_id: String,
    pub bucket_name: String,
    pub status: PayloadStatus,
    #[serde(with = "millis_utc")]
    pub processed_at: DateTime<Utc>,
    pub units: Vec<PayloadUnit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadUnit {
    pub unit: IndexMap<String, Value>,
    pub sources: Vec<PayloadSource>,
    pub confidence: IndexMap<String, Confidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSource {
    pub field: String,
    /// Always serialized; `null` when no evidence exists for the field.
    pub chunk_file_key: Option<String>,
}

impl NotificationPayload {
    pub fn is_success(&self) -> bool {
        self.status == PayloadStatus::Success
    }

    pub fn subject(&self) -> String {
        notification_subject(&self.job_id)
    }
}

pub fn notification_subject(job_id: &str) -> String {
    format!("Contract Processing Complete - {}", job_id)
}

/// RFC 3339 with millisecond precision and a `Z` suffix.
mod millis_utc {
    use super::*;

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_payload_wire_shape() {
        let payload = NotificationPayload {
            job_id: "c1".to_string(),
            bucket_name: "evidence".to_string(),
            status: PayloadStatus::Success,
            processed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap(),
            units: vec![PayloadUnit {
                unit: IndexMap::from([("buyerName".to_string(), json!("X"))]),
                sources: vec![PayloadSource {
                    field: "buyerName".to_string(),
                    chunk_file_key: None,
                }],
                confidence: IndexMap::from([("buyerName".to_string(), Confidence::Medium)]),
            }],
        };

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({
                "jobId": "c1",
                "bucketName": "evidence",
                "status": "success",
                "processedAt": "2026-03-01T12:30:05.000Z",
                "units": [{
                    "unit": {"buyerName": "X"},
                    "sources": [{"field": "buyerName", "chunk_file_key": null}],
                    "confidence": {"buyerName": "medium"}
                }]
            })
        );

        let parsed: NotificationPayload = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_subject() {
        assert_eq!(
            notification_subject("c1"),
            "Contract Processing Complete - c1"
        );
    }
}
