//! Inbound job message parsing and validation.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ValidationError;

/// Raw inbound body as produced by the upstream writer.
///
/// Unknown fields are tolerated; `bucket_name` is recognised only so it can
/// be reported and ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct JobMessage {
    #[serde(default)]
    pub file_key: Option<Value>,
    #[serde(default)]
    pub contract_id: Option<Value>,
    #[serde(default)]
    pub bucket_name: Option<Value>,
}

/// A validated, normalized unit of work handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Stable logical identity of the job (the contract id).
    pub job_id: String,
    /// Object key of the source document inside the configured bucket.
    pub file_key: String,
    /// Queue message this job was read from.
    pub message_id: String,
    /// How many times this message has been received, including this delivery.
    pub receive_count: u32,
    /// Set when the body carried a `bucket_name` that was ignored.
    pub ignored_bucket_name: Option<String>,
}

impl JobMessage {
    pub fn parse(body: &str) -> Result<Self, ValidationError> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| ValidationError::MalformedBody(e.to_string()))?;
        if !value.is_object() {
            return Err(ValidationError::MalformedBody(format!(
                "expected an object, got {}",
                json_kind(&value)
            )));
        }
        serde_json::from_value(value).map_err(|e| ValidationError::MalformedBody(e.to_string()))
    }

    /// Checks required fields and produces the normalized descriptor.
    pub fn validate(
        self,
        message_id: &str,
        receive_count: u32,
    ) -> Result<JobDescriptor, ValidationError> {
        let file_key = required_string(self.file_key, "file_key")?;
        let job_id = required_string(self.contract_id, "contract_id")?;

        validate_job_id(&job_id)?;
        validate_file_key(&file_key)?;

        let ignored_bucket_name = self.bucket_name.map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        });

        Ok(JobDescriptor {
            job_id,
            file_key,
            message_id: message_id.to_string(),
            receive_count,
            ignored_bucket_name,
        })
    }
}

/// Parses and validates a raw body in one step.
pub fn parse_job(
    body: &str,
    message_id: &str,
    receive_count: u32,
) -> Result<JobDescriptor, ValidationError> {
    JobMessage::parse(body)?.validate(message_id, receive_count)
}

/// Best-effort group key for a raw body: its `contract_id` when readable.
pub fn group_id_for(body: &str) -> Option<String> {
    let message = JobMessage::parse(body).ok()?;
    required_string(message.contract_id, "contract_id").ok()
}

fn required_string(value: Option<Value>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Null) | None => Err(ValidationError::MissingField(field)),
        Some(Value::String(_)) => Err(ValidationError::MissingField(field)),
        Some(other) => Err(ValidationError::InvalidField {
            field,
            reason: format!("expected a string, got {}", json_kind(&other)),
        }),
    }
}

/// Job ids become object key and directory segments, so they must be a
/// single safe path component.
fn validate_job_id(job_id: &str) -> Result<(), ValidationError> {
    let safe = job_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !safe || job_id.starts_with('.') {
        return Err(ValidationError::InvalidField {
            field: "contract_id",
            reason: "must contain only ASCII letters, digits, '-', '_' or '.' and not start with '.'"
                .to_string(),
        });
    }
    Ok(())
}

fn validate_file_key(file_key: &str) -> Result<(), ValidationError> {
    if file_key.starts_with('/') || file_key.contains('\\') {
        return Err(ValidationError::InvalidField {
            field: "file_key",
            reason: "must be a relative object key".to_string(),
        });
    }
    if file_key.split('/').any(|segment| segment == ".." || segment == ".") {
        return Err(ValidationError::InvalidField {
            field: "file_key",
            reason: "must not contain '.' or '..' segments".to_string(),
        });
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
