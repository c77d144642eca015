use serde_json::{Map, Value};

/// A request or sample document, accessed by key.
pub type Record = Map<String, Value>;

/// One place a logical field may live in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Top(&'static str),
    /// `parent.key`, where `parent` must be a JSON object.
    Nested(&'static str, &'static str),
}

impl Lookup {
    pub fn find<'r>(&self, record: &'r Record) -> Option<&'r Value> {
        match *self {
            Lookup::Top(key) => record.get(key),
            Lookup::Nested(parent, key) => record.get(parent)?.as_object()?.get(key),
        }
    }
}

/// How to move from one lookup to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Keep going until a lookup yields a non-blank value.
    NonBlank,
    /// Stop at the first lookup holding any non-null value, even a blank one.
    Present,
}

/// A logical field and the ordered locations it is read from.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    lookups: &'static [Lookup],
    fallback: Fallback,
}

impl Field {
    pub const fn new(name: &'static str, lookups: &'static [Lookup], fallback: Fallback) -> Self {
        Self {
            name,
            lookups,
            fallback,
        }
    }

    /// Resolve the field to its text value. Blank values and non-scalar shapes are absent.
    pub fn resolve(&self, record: &Record) -> Option<String> {
        match self.fallback {
            Fallback::NonBlank => self
                .lookups
                .iter()
                .filter_map(|lookup| lookup.find(record))
                .filter_map(scalar_text)
                .find(|text| !is_blank(text)),
            Fallback::Present => {
                let value = self
                    .lookups
                    .iter()
                    .filter_map(|lookup| lookup.find(record))
                    .find(|value| !value.is_null())?;
                scalar_text(value).filter(|text| !is_blank(text))
            }
        }
    }

    pub fn is_present(&self, record: &Record) -> bool {
        self.resolve(record).is_some()
    }
}

pub const CMO_SAMPLE_ID_FIELDS: &str = "cmoSampleIdFields";

pub const REQUEST_ID: Field = Field::new(
    "requestId",
    &[
        Lookup::Top("requestId"),
        Lookup::Top("igoRequestId"),
        Lookup::Nested("additionalProperties", "requestId"),
        Lookup::Nested("additionalProperties", "igoRequestId"),
    ],
    Fallback::NonBlank,
);

pub const IS_CMO: Field = Field::new(
    "isCmoRequest",
    &[
        Lookup::Top("isCmoRequest"),
        Lookup::Nested("additionalProperties", "isCmoSample"),
    ],
    Fallback::Present,
);

pub const SAMPLE_ID: Field = Field::new(
    "igoId",
    &[Lookup::Top("igoId"), Lookup::Top("primaryId")],
    Fallback::Present,
);

pub const INVESTIGATOR_SAMPLE_ID: Field = Field::new(
    "investigatorSampleId",
    &[Lookup::Top("investigatorSampleId")],
    Fallback::NonBlank,
);

pub const CMO_PATIENT_ID: Field = Field::new(
    "cmoPatientId",
    &[Lookup::Top("cmoPatientId")],
    Fallback::NonBlank,
);

pub const BAIT_SET: Field = Field::new("baitSet", &[Lookup::Top("baitSet")], Fallback::NonBlank);

pub const RECIPE: Field = Field::new(
    "recipe",
    &[Lookup::Nested(CMO_SAMPLE_ID_FIELDS, "recipe")],
    Fallback::NonBlank,
);

pub const NORMALIZED_PATIENT_ID: Field = Field::new(
    "normalizedPatientId",
    &[Lookup::Nested(CMO_SAMPLE_ID_FIELDS, "normalizedPatientId")],
    Fallback::NonBlank,
);

pub const SPECIMEN_TYPE: Field = Field::new(
    "specimenType",
    &[Lookup::Top("specimenType"), Lookup::Top("sampleClass")],
    Fallback::Present,
);

pub const CMO_SAMPLE_CLASS: Field = Field::new(
    "cmoSampleClass",
    &[Lookup::Top("cmoSampleClass"), Lookup::Top("sampleType")],
    Fallback::Present,
);

pub const SAMPLE_ORIGIN: Field = Field::new(
    "sampleOrigin",
    &[Lookup::Top("sampleOrigin")],
    Fallback::NonBlank,
);

pub const NESTED_SAMPLE_TYPE: Field = Field::new(
    "sampleType",
    &[Lookup::Nested(CMO_SAMPLE_ID_FIELDS, "sampleType")],
    Fallback::NonBlank,
);

pub fn request_id(record: &Record) -> Option<String> {
    REQUEST_ID.resolve(record)
}

/// Absent or blank flags read as non-CMO.
pub fn is_cmo(record: &Record) -> bool {
    IS_CMO
        .resolve(record)
        .is_some_and(|flag| flag.trim().eq_ignore_ascii_case("true"))
}

pub fn sample_id(record: &Record) -> Option<String> {
    SAMPLE_ID.resolve(record)
}

/// True when `parent` is an object that has `key`, whatever its value.
pub fn has_nested_key(record: &Record, parent: &str, key: &str) -> bool {
    record
        .get(parent)
        .and_then(Value::as_object)
        .is_some_and(|nested| nested.contains_key(key))
}

pub fn is_blank(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed == "null"
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("test record must be an object")
    }

    #[test]
    fn request_id_prefers_current_key() {
        let r = record(json!({"requestId": "1456_T", "igoRequestId": "9999_B"}));
        assert_eq!(request_id(&r).as_deref(), Some("1456_T"));
    }

    #[test]
    fn request_id_from_legacy_schema() {
        let r = record(json!({"igoRequestId": "1456_T", "igoProjectId": "1456"}));
        assert_eq!(request_id(&r).as_deref(), Some("1456_T"));
    }

    #[test]
    fn request_id_skips_blank_and_null_literal() {
        let r = record(json!({
            "requestId": "null",
            "igoRequestId": "  ",
            "additionalProperties": {"requestId": "", "igoRequestId": "1456_T"}
        }));
        assert_eq!(request_id(&r).as_deref(), Some("1456_T"));
    }

    #[test]
    fn request_id_absent_when_nothing_matches() {
        let r = record(json!({"smileRequestId": "abc", "igoProjectId": "MOCKREQUEST1"}));
        assert_eq!(request_id(&r), None);
    }

    #[test]
    fn nested_lookup_tolerates_malformed_parent() {
        let r = record(json!({"additionalProperties": "not-an-object"}));
        assert_eq!(request_id(&r), None);
        let r = record(json!({"additionalProperties": ["requestId"]}));
        assert_eq!(request_id(&r), None);
        assert!(!has_nested_key(&r, "additionalProperties", "requestId"));
    }

    #[test]
    fn cmo_flag_from_bool_string_or_nested() {
        assert!(is_cmo(&record(json!({"isCmoRequest": true}))));
        assert!(is_cmo(&record(json!({"isCmoRequest": "TRUE"}))));
        assert!(is_cmo(&record(
            json!({"additionalProperties": {"isCmoSample": "true"}})
        )));
        assert!(!is_cmo(&record(json!({"isCmoRequest": false}))));
        assert!(!is_cmo(&record(json!({"isCmoRequest": ""}))));
        assert!(!is_cmo(&record(json!({}))));
    }

    #[test]
    fn blank_request_flag_is_not_overridden_by_sample_flag() {
        let r = record(json!({
            "isCmoRequest": "",
            "additionalProperties": {"isCmoSample": "true"}
        }));
        assert!(!is_cmo(&r));

        let r = record(json!({
            "isCmoRequest": null,
            "additionalProperties": {"isCmoSample": "true"}
        }));
        assert!(is_cmo(&r));
    }

    #[test]
    fn present_fallback_does_not_skip_blank_preferred_key() {
        let r = record(json!({"specimenType": "", "sampleClass": "Biopsy"}));
        assert_eq!(SPECIMEN_TYPE.resolve(&r), None);

        let r = record(json!({"specimenType": null, "sampleClass": "Biopsy"}));
        assert_eq!(SPECIMEN_TYPE.resolve(&r).as_deref(), Some("Biopsy"));
    }

    #[test]
    fn sample_id_falls_back_to_primary_id() {
        let r = record(json!({"primaryId": "1456_T_1"}));
        assert_eq!(sample_id(&r).as_deref(), Some("1456_T_1"));
    }

    #[test]
    fn numbers_resolve_to_text() {
        let r = record(json!({"requestId": 1456}));
        assert_eq!(request_id(&r).as_deref(), Some("1456"));
    }
}
