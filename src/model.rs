//! Domain model for decoded log records.
//!
//! These are the shapes the ingestion gateway produces after decoding a wire batch.
//! A [`Process`] is usually shared by every record of a batch through an `Arc`;
//! once a batch has been tagged by the processor the shared `Process` is treated as
//! immutable, and any later change goes through copy-on-write (`Arc::make_mut`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Attribute value, mirroring the OTLP `AnyValue` scalar variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnyValue {
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Bytes(Vec<u8>),
}

impl AnyValue {
    /// Returns the string payload, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AnyValue {
    fn from(value: &str) -> Self {
        AnyValue::String(value.to_string())
    }
}

impl From<String> for AnyValue {
    fn from(value: String) -> Self {
        AnyValue::String(value)
    }
}

/// A single key/value attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AnyValue,
}

impl KeyValue {
    /// Create a string-valued attribute.
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: AnyValue::String(value.into()),
        }
    }
}

/// Identity of the service that emitted one or more records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub service_name: String,
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
}

impl Process {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Vec<KeyValue>) -> Self {
        self.attributes = attributes;
        self
    }

    /// True if an attribute with this key holds exactly this string value.
    pub fn has_string_attribute(&self, key: &str, value: &str) -> bool {
        self.attributes
            .iter()
            .any(|kv| kv.key == key && kv.value.as_str() == Some(value))
    }
}

/// Log severity, following the OTLP severity number ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Unspecified,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// Get all possible severities, excluding `Unspecified`.
    pub fn all() -> &'static [Severity] {
        &[
            Severity::Trace,
            Severity::Debug,
            Severity::Info,
            Severity::Warn,
            Severity::Error,
            Severity::Fatal,
        ]
    }

    /// The lowest OTLP severity number of this severity's range.
    pub fn number(&self) -> i32 {
        match self {
            Severity::Unspecified => 0,
            Severity::Trace => 1,
            Severity::Debug => 5,
            Severity::Info => 9,
            Severity::Warn => 13,
            Severity::Error => 17,
            Severity::Fatal => 21,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Unspecified => write!(f, "UNSPECIFIED"),
            Severity::Trace => write!(f, "TRACE"),
            Severity::Debug => write!(f, "DEBUG"),
            Severity::Info => write!(f, "INFO"),
            Severity::Warn => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// One decoded log event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Time the event occurred, in unix nanoseconds
    pub time_unix_nano: u64,

    /// Time the event was observed by the collection system, in unix nanoseconds
    pub observed_time_unix_nano: u64,

    pub severity_number: i32,

    pub severity_text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<AnyValue>,

    #[serde(default)]
    pub attributes: Vec<KeyValue>,

    #[serde(default)]
    pub dropped_attributes_count: u32,

    #[serde(default)]
    pub flags: u32,

    #[serde(default)]
    pub trace_id: Vec<u8>,

    #[serde(default)]
    pub span_id: Vec<u8>,

    /// Emitting service; shared with the other records of the batch
    pub process: Option<Arc<Process>>,
}

impl LogRecord {
    /// Create a record with the given severity and body, owned by `process`.
    pub fn new(process: Arc<Process>, severity: Severity, body: impl Into<String>) -> Self {
        Self {
            severity_number: severity.number(),
            severity_text: severity.to_string(),
            body: Some(AnyValue::String(body.into())),
            process: Some(process),
            ..Self::default()
        }
    }

    /// Service name of the owning process, if any.
    pub fn service_name(&self) -> Option<&str> {
        self.process.as_deref().map(|p| p.service_name.as_str())
    }

    /// Size of the record's JSON encoding in bytes.
    ///
    /// Used as the byte measure for queue sizing; a record that cannot be encoded
    /// counts as zero bytes.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}
