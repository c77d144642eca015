use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::Record;

pub const STATUS_KEY: &str = "status";

/// Why a field failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDesc {
    Missing,
    Invalid,
    MissingFromNested(&'static str),
    SkippedNonCmoRequest,
    SamplesMissingOrEmpty,
    AllSamplesFailed,
    NotAnObject,
    SampleMissingCmoPatientId,
    SampleMissingIds,
}

impl fmt::Display for ErrorDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDesc::Missing => write!(f, "missing"),
            ErrorDesc::Invalid => write!(f, "invalid"),
            ErrorDesc::MissingFromNested(parent) => write!(f, "missing from nested field {parent}"),
            ErrorDesc::SkippedNonCmoRequest => {
                write!(f, "cmo filter enabled but isCmoRequest=false")
            }
            ErrorDesc::SamplesMissingOrEmpty => write!(f, "samples missing or empty"),
            ErrorDesc::AllSamplesFailed => write!(f, "all samples failed validation"),
            ErrorDesc::NotAnObject => write!(f, "not a JSON object"),
            ErrorDesc::SampleMissingCmoPatientId => {
                write!(f, "sample dropped: cmoPatientId missing")
            }
            ErrorDesc::SampleMissingIds => write!(f, "sample missing igoId or patient id"),
        }
    }
}

/// The verdict attached to a record under `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub validation_status: bool,
    pub validation_report: BTreeMap<String, String>,
}

impl ValidationReport {
    pub fn reasons(&self) -> &BTreeMap<String, String> {
        &self.validation_report
    }

    pub fn has_reason(&self, field: &str) -> bool {
        self.validation_report.contains_key(field)
    }

    /// Read back a report previously attached to `record`.
    pub fn from_record(record: &Record) -> Option<Self> {
        serde_json::from_value(record.get(STATUS_KEY)?.clone()).ok()
    }

    /// Attach this report to `record`, replacing any earlier status.
    pub fn attach_to(&self, record: &mut Record) {
        // A struct of a bool and a string map always serializes.
        let status = serde_json::to_value(self).unwrap_or(Value::Null);
        record.insert(STATUS_KEY.to_owned(), status);
    }
}

/// Accumulates failing fields for a single validation call.
#[derive(Debug, Default)]
pub struct Reasons {
    entries: BTreeMap<String, String>,
}

impl Reasons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, desc: ErrorDesc) {
        self.entries.insert(field.into(), desc.to_string());
    }

    pub fn extend(&mut self, other: Reasons) {
        self.entries.extend(other.entries);
    }

    pub fn contains(&self, field: &str) -> bool {
        self.entries.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close the report with an explicit status.
    pub fn finish(self, validation_status: bool) -> ValidationReport {
        ValidationReport {
            validation_status,
            validation_report: self.entries,
        }
    }

    /// Close the report, passing only when nothing was recorded.
    pub fn into_report(self) -> ValidationReport {
        let passed = self.entries.is_empty();
        self.finish(passed)
    }
}
