use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::fields::{
    self, has_nested_key, Record, BAIT_SET, CMO_PATIENT_ID, CMO_SAMPLE_CLASS, CMO_SAMPLE_ID_FIELDS,
    INVESTIGATOR_SAMPLE_ID, NESTED_SAMPLE_TYPE, NORMALIZED_PATIENT_ID, RECIPE, REQUEST_ID,
    SAMPLE_ID, SAMPLE_ORIGIN, SPECIMEN_TYPE,
};
use crate::report::{ErrorDesc, Reasons, ValidationReport};
use crate::vocabulary::{CmoSampleClass, SampleOrigin, SampleType, SpecimenType, Vocabulary};

pub const SAMPLES_KEY: &str = "samples";

/// Derived once per record, before any sample is looked at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    pub is_cmo: bool,
    pub has_request_id: bool,
}

impl Classification {
    pub fn of(record: &Record) -> Self {
        Self {
            is_cmo: fields::is_cmo(record),
            has_request_id: REQUEST_ID.is_present(record),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleTally {
    pub total: usize,
    pub valid: usize,
}

impl SampleTally {
    pub fn failed(&self) -> usize {
        self.total - self.valid
    }
}

/// A record with its status attached, plus what was learned while validating it.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub record: Record,
    pub status: ValidationReport,
    pub context: Classification,
    pub samples: SampleTally,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.status.validation_status
    }

    pub fn request_id(&self) -> Option<String> {
        fields::request_id(&self.record)
    }

    /// One line naming every failing field of the record and of its samples.
    /// `None` when nothing failed.
    pub fn summary(&self) -> Option<String> {
        let mut parts = Vec::new();

        if !self.status.reasons().is_empty() {
            let subject = self
                .request_id()
                .or_else(|| fields::sample_id(&self.record))
                .unwrap_or_else(|| "<unidentified>".to_owned());
            parts.push(format!("{subject}: {}", describe(self.status.reasons())));
        }

        if let Some(samples) = self.record.get(SAMPLES_KEY).and_then(Value::as_array) {
            for (index, sample) in samples.iter().enumerate() {
                let Some(sample) = sample.as_object() else {
                    continue;
                };
                let Some(report) = ValidationReport::from_record(sample) else {
                    continue;
                };
                if !report.reasons().is_empty() {
                    parts.push(format!(
                        "{}: {}",
                        sample_label(fields::sample_id(sample), index),
                        describe(report.reasons())
                    ));
                }
            }
        }

        (!parts.is_empty()).then(|| parts.join("; "))
    }
}

/// Stateless apart from configuration: every call builds and returns its own report, so one
/// checker is shared by all workers.
#[derive(Debug, Clone, Default)]
pub struct RequestChecker {
    cmo_request_filter: bool,
}

impl RequestChecker {
    /// With `cmo_request_filter` set, non-CMO requests fail request-level validation.
    pub fn new(cmo_request_filter: bool) -> Self {
        Self { cmo_request_filter }
    }

    pub fn classify(&self, record: &Record) -> Classification {
        Classification::of(record)
    }

    pub fn validate_request(&self, record: &Record) -> ValidationReport {
        let context = self.classify(record);
        self.request_reasons(record, &context).into_report()
    }

    pub fn validate_cmo_sample(&self, sample: &Record) -> ValidationReport {
        cmo_sample_reasons(sample).into_report()
    }

    pub fn validate_non_cmo_sample(&self, sample: &Record) -> ValidationReport {
        non_cmo_sample_reasons(sample).into_report()
    }

    /// The looser tier used for requests that were already admitted upstream.
    pub fn validate_promoted_sample(&self, sample: &Record) -> ValidationReport {
        promoted_sample_reasons(sample).into_report()
    }

    pub fn validate_sample(&self, sample: &Record, is_cmo: bool) -> ValidationReport {
        if is_cmo {
            self.validate_cmo_sample(sample)
        } else {
            self.validate_non_cmo_sample(sample)
        }
    }

    /// Validate a new request and each of its samples, attaching a status to all of them.
    ///
    /// CMO samples missing a `cmoPatientId` are removed from `samples` and listed in the
    /// request-level report instead. The request fails when its own metadata is invalid or
    /// when no sample passed.
    pub fn filter_valid_request(&self, mut record: Record) -> Verdict {
        let context = self.classify(&record);
        let mut reasons = self.request_reasons(&record, &context);
        let request_level_ok = reasons.is_empty();
        let mut tally = SampleTally::default();

        if let Some(Value::Array(entries)) = record.get_mut(SAMPLES_KEY) {
            let mut kept = Vec::with_capacity(entries.len());
            for (index, entry) in std::mem::take(entries).into_iter().enumerate() {
                tally.total += 1;
                let Value::Object(mut sample) = entry else {
                    reasons.add(report_key(&reasons, None, index), ErrorDesc::NotAnObject);
                    continue;
                };

                let report = self.validate_sample(&sample, context.is_cmo);
                if report.validation_status {
                    tally.valid += 1;
                }
                if context.is_cmo && report.has_reason(CMO_PATIENT_ID.name) {
                    let key = report_key(&reasons, fields::sample_id(&sample), index);
                    reasons.add(
                        key,
                        ErrorDesc::SampleMissingCmoPatientId,
                    );
                    continue;
                }
                report.attach_to(&mut sample);
                kept.push(Value::Object(sample));
            }
            *entries = kept;
        }

        if tally.total > 0 && tally.valid == 0 {
            reasons.add(SAMPLES_KEY, ErrorDesc::AllSamplesFailed);
        }

        let status = reasons.finish(request_level_ok && tally.valid > 0);
        status.attach_to(&mut record);
        debug!(
            request_id = ?fields::request_id(&record),
            is_cmo = context.is_cmo,
            total_samples = tally.total,
            valid_samples = tally.valid,
            "validated request"
        );

        Verdict {
            record,
            status,
            context,
            samples: tally,
        }
    }

    /// Promoted requests pass only when the request metadata is valid and every sample carries
    /// an identifier and a patient id.
    pub fn validate_promoted_request(&self, mut record: Record) -> Verdict {
        let context = self.classify(&record);
        let mut reasons = self.request_reasons(&record, &context);
        let request_level_ok = reasons.is_empty();
        let mut tally = SampleTally::default();

        if let Some(Value::Array(entries)) = record.get_mut(SAMPLES_KEY) {
            for (index, entry) in entries.iter_mut().enumerate() {
                tally.total += 1;
                let Value::Object(sample) = entry else {
                    reasons.add(report_key(&reasons, None, index), ErrorDesc::NotAnObject);
                    continue;
                };

                let report = self.validate_promoted_sample(sample);
                if report.validation_status {
                    tally.valid += 1;
                } else {
                    let key = report_key(&reasons, fields::sample_id(sample), index);
                    reasons.add(
                        key,
                        ErrorDesc::SampleMissingIds,
                    );
                }
                report.attach_to(sample);
            }
        }

        let passed = request_level_ok && tally.total > 0 && tally.failed() == 0;
        let status = reasons.finish(passed);
        status.attach_to(&mut record);

        Verdict {
            record,
            status,
            context,
            samples: tally,
        }
    }

    /// Request metadata updates carry no samples: only the request-level fields are checked.
    pub fn validate_request_update(&self, mut record: Record) -> Verdict {
        let context = self.classify(&record);
        let status = self.request_metadata_reasons(&context).into_report();
        status.attach_to(&mut record);

        Verdict {
            record,
            status,
            context,
            samples: SampleTally::default(),
        }
    }

    /// A sample update must name its request, then passes the tier its own CMO flag selects.
    pub fn validate_sample_update(&self, mut sample: Record) -> Verdict {
        let context = self.classify(&sample);
        let mut reasons = Reasons::new();
        if !context.has_request_id {
            reasons.add(REQUEST_ID.name, ErrorDesc::Missing);
        }
        reasons.extend(if context.is_cmo {
            cmo_sample_reasons(&sample)
        } else {
            non_cmo_sample_reasons(&sample)
        });

        let status = reasons.into_report();
        status.attach_to(&mut sample);

        Verdict {
            record: sample,
            status,
            context,
            samples: SampleTally::default(),
        }
    }

    fn request_metadata_reasons(&self, context: &Classification) -> Reasons {
        let mut reasons = Reasons::new();
        if !context.has_request_id {
            reasons.add(REQUEST_ID.name, ErrorDesc::Missing);
        }
        if self.cmo_request_filter && !context.is_cmo {
            reasons.add("isCmoRequest", ErrorDesc::SkippedNonCmoRequest);
        }
        reasons
    }

    fn request_reasons(&self, record: &Record, context: &Classification) -> Reasons {
        let mut reasons = self.request_metadata_reasons(context);
        let has_samples = record
            .get(SAMPLES_KEY)
            .and_then(Value::as_array)
            .is_some_and(|samples| !samples.is_empty());
        if !has_samples {
            reasons.add(SAMPLES_KEY, ErrorDesc::SamplesMissingOrEmpty);
        }
        reasons
    }
}

fn cmo_sample_reasons(sample: &Record) -> Reasons {
    let mut reasons = Reasons::new();

    if !INVESTIGATOR_SAMPLE_ID.is_present(sample) {
        reasons.add(INVESTIGATOR_SAMPLE_ID.name, ErrorDesc::Missing);
    }
    if !SAMPLE_ID.is_present(sample) {
        reasons.add(SAMPLE_ID.name, ErrorDesc::Missing);
    }
    if !BAIT_SET.is_present(sample) && !RECIPE.is_present(sample) {
        reasons.add(BAIT_SET.name, ErrorDesc::Missing);
        reasons.add(
            RECIPE.name,
            ErrorDesc::MissingFromNested(CMO_SAMPLE_ID_FIELDS),
        );
    }
    if !CMO_PATIENT_ID.is_present(sample) {
        reasons.add(CMO_PATIENT_ID.name, ErrorDesc::Missing);
    }
    // Either labeling strategy is enough; explain both only when neither works.
    if let Err(specimen) = specimen_type_chain(sample) {
        if let Err(sample_type) = sample_type_chain(sample) {
            reasons.extend(specimen);
            reasons.extend(sample_type);
        }
    }
    if !NORMALIZED_PATIENT_ID.is_present(sample) {
        reasons.add(
            NORMALIZED_PATIENT_ID.name,
            ErrorDesc::MissingFromNested(CMO_SAMPLE_ID_FIELDS),
        );
    }
    if let Some(level) = missing_fastqs(sample) {
        reasons.add(level, ErrorDesc::Missing);
    }
    if !igo_complete(sample) {
        reasons.add("igoComplete", ErrorDesc::Invalid);
    }

    reasons
}

fn non_cmo_sample_reasons(sample: &Record) -> Reasons {
    let mut reasons = Reasons::new();
    if !BAIT_SET.is_present(sample) {
        reasons.add(BAIT_SET.name, ErrorDesc::Missing);
    }
    if !NORMALIZED_PATIENT_ID.is_present(sample) {
        reasons.add(
            NORMALIZED_PATIENT_ID.name,
            ErrorDesc::MissingFromNested(CMO_SAMPLE_ID_FIELDS),
        );
    }
    reasons
}

fn promoted_sample_reasons(sample: &Record) -> Reasons {
    let mut reasons = Reasons::new();
    if !SAMPLE_ID.is_present(sample) {
        reasons.add(SAMPLE_ID.name, ErrorDesc::Missing);
    }
    if !CMO_PATIENT_ID.is_present(sample) && !NORMALIZED_PATIENT_ID.is_present(sample) {
        reasons.add(CMO_PATIENT_ID.name, ErrorDesc::Missing);
        reasons.add(
            NORMALIZED_PATIENT_ID.name,
            ErrorDesc::MissingFromNested(CMO_SAMPLE_ID_FIELDS),
        );
    }
    reasons
}

fn specimen_type_chain(sample: &Record) -> Result<(), Reasons> {
    let raw = SPECIMEN_TYPE.resolve(sample);
    let Some(specimen_type) = raw.as_deref().and_then(SpecimenType::parse) else {
        return cmo_sample_class_check(sample).map_err(|mut reasons| {
            let desc = match raw {
                None => ErrorDesc::Missing,
                Some(_) => ErrorDesc::Invalid,
            };
            reasons.add(SPECIMEN_TYPE.name, desc);
            reasons
        });
    };

    if specimen_type.needs_sample_class() {
        return cmo_sample_class_check(sample);
    }
    if specimen_type.needs_sample_origin() {
        return sample_origin_check(sample);
    }
    Ok(())
}

fn cmo_sample_class_check(sample: &Record) -> Result<(), Reasons> {
    match CMO_SAMPLE_CLASS.resolve(sample) {
        None => Err(single(CMO_SAMPLE_CLASS.name, ErrorDesc::Missing)),
        Some(value) if !CmoSampleClass::is_member(&value) => {
            Err(single(CMO_SAMPLE_CLASS.name, ErrorDesc::Invalid))
        }
        Some(_) => Ok(()),
    }
}

fn sample_origin_check(sample: &Record) -> Result<(), Reasons> {
    match SAMPLE_ORIGIN.resolve(sample) {
        None => Err(single(SAMPLE_ORIGIN.name, ErrorDesc::Missing)),
        Some(value) if !SampleOrigin::is_member(&value) => {
            Err(single(SAMPLE_ORIGIN.name, ErrorDesc::Invalid))
        }
        Some(_) => Ok(()),
    }
}

fn sample_type_chain(sample: &Record) -> Result<(), Reasons> {
    let Some(sample_type) = NESTED_SAMPLE_TYPE.resolve(sample) else {
        // The label generator defaults to DNA when naToExtract is present, whatever its value.
        if has_nested_key(sample, CMO_SAMPLE_ID_FIELDS, "naToExtract") {
            return Ok(());
        }
        return Err(single(
            "naToExtract",
            ErrorDesc::MissingFromNested(CMO_SAMPLE_ID_FIELDS),
        ));
    };

    match SampleType::parse(&sample_type) {
        Some(SampleType::PooledLibrary) if BAIT_SET.is_present(sample) => Ok(()),
        Some(SampleType::PooledLibrary) => Err(single(BAIT_SET.name, ErrorDesc::Missing)),
        Some(_) => Ok(()),
        None => Err(single(NESTED_SAMPLE_TYPE.name, ErrorDesc::Invalid)),
    }
}

/// Names the shallowest level of `libraries[].runs[].fastqs[]` that has nothing to offer.
fn missing_fastqs(sample: &Record) -> Option<&'static str> {
    let libraries = match sample.get("libraries").and_then(Value::as_array) {
        Some(libraries) if !libraries.is_empty() => libraries,
        _ => return Some("libraries"),
    };

    let runs: Vec<&Value> = libraries
        .iter()
        .filter_map(|library| library.get("runs").and_then(Value::as_array))
        .flatten()
        .collect();
    if runs.is_empty() {
        return Some("runs");
    }

    let has_fastqs = runs.iter().any(|run| {
        run.get("fastqs")
            .and_then(Value::as_array)
            .is_some_and(|fastqs| !fastqs.is_empty())
    });
    (!has_fastqs).then_some("fastqs")
}

/// Absent means complete; a present flag must be true.
fn igo_complete(sample: &Record) -> bool {
    match sample.get("igoComplete") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(complete)) => *complete,
        Some(Value::String(complete)) => complete.trim().eq_ignore_ascii_case("true"),
        Some(_) => false,
    }
}

fn single(field: &str, desc: ErrorDesc) -> Reasons {
    let mut reasons = Reasons::new();
    reasons.add(field, desc);
    reasons
}

/// `samples[<id>]` for identified samples, `samples[#<index>]` otherwise.
fn sample_label(sample_id: Option<String>, index: usize) -> String {
    match sample_id {
        Some(id) => format!("{SAMPLES_KEY}[{id}]"),
        None => format!("{SAMPLES_KEY}[#{index}]"),
    }
}

/// Like [`sample_label`], but a repeated sample id gets its index appended so no entry of
/// `reasons` is overwritten.
fn report_key(reasons: &Reasons, sample_id: Option<String>, index: usize) -> String {
    let label = sample_label(sample_id, index);
    if reasons.contains(&label) {
        format!("{}#{index}]", label.trim_end_matches(']'))
    } else {
        label
    }
}

fn describe(reasons: &BTreeMap<String, String>) -> String {
    reasons
        .iter()
        .map(|(field, reason)| format!("{field} {reason}"))
        .collect::<Vec<_>>()
        .join(", ")
}
