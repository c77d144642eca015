use filter_common::audit::StatusType;
use request_validator::checker::SAMPLES_KEY;
use request_validator::report::ErrorDesc;
use request_validator::Verdict;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    NewRequest,
    RequestUpdate,
    SampleUpdate,
    PromotedRequest,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::NewRequest => "request_filter",
            MessageKind::RequestUpdate => "request_update",
            MessageKind::SampleUpdate => "sample_update",
            MessageKind::PromotedRequest => "promoted_request",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundTopics {
    pub cmo_label_generator: String,
    pub new_request: String,
    pub server_request_update: String,
    pub cmo_label_update: String,
    pub server_sample_update: String,
    pub cmo_promoted_label: String,
    pub promoted_request: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub topic: String,
    pub key: Option<String>,
    pub payload: Value,
}

/// What a worker learned about one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    NewRequest(Verdict),
    RequestUpdate(Verdict),
    SampleUpdates(Vec<Verdict>),
    PromotedRequest(Verdict),
}

impl Outcome {
    pub fn verdicts(&self) -> &[Verdict] {
        match self {
            Outcome::NewRequest(verdict)
            | Outcome::RequestUpdate(verdict)
            | Outcome::PromotedRequest(verdict) => std::slice::from_ref(verdict),
            Outcome::SampleUpdates(verdicts) => verdicts,
        }
    }

    pub fn passed(&self) -> bool {
        self.verdicts().iter().all(Verdict::passed)
    }

    /// Entries for the audit trail, each with the annotated record it concerns.
    pub fn audit_events(&self) -> Vec<(StatusType, String)> {
        let mut events = Vec::new();
        match self {
            Outcome::NewRequest(verdict) => {
                if let Some(status) = new_request_status(verdict) {
                    events.push((status, render(verdict)));
                }
            }
            Outcome::RequestUpdate(verdict) if !verdict.passed() => {
                events.push((StatusType::RequestUpdateFailedSanityCheck, render(verdict)));
            }
            Outcome::RequestUpdate(_) => {}
            Outcome::SampleUpdates(verdicts) => {
                for verdict in verdicts.iter().filter(|verdict| !verdict.passed()) {
                    events.push((StatusType::SampleUpdateFailedSanityCheck, render(verdict)));
                }
            }
            Outcome::PromotedRequest(verdict) => {
                if verdict.samples.failed() > 0 {
                    events.push((StatusType::PromotedSamplesMissingIds, render(verdict)));
                }
                if !verdict.passed() {
                    events.push((StatusType::PromotedRequestFailedSanityCheck, render(verdict)));
                }
            }
        }
        events
    }
}

fn new_request_status(verdict: &Verdict) -> Option<StatusType> {
    let reasons = verdict.status.reasons();
    let samples_reason = reasons.get(SAMPLES_KEY).map(String::as_str);
    let missing_samples = ErrorDesc::SamplesMissingOrEmpty.to_string();

    if !verdict.passed() {
        return Some(if reasons.contains_key("isCmoRequest") {
            StatusType::CmoRequestFilterSkippedRequest
        } else if samples_reason == Some(missing_samples.as_str()) {
            StatusType::RequestWithMissingSamples
        } else if verdict.context.is_cmo {
            StatusType::CmoRequestFailedSanityCheck
        } else {
            StatusType::RequestFailedSanityCheck
        });
    }
    // Accepted, but some samples will not get a label
    (verdict.context.is_cmo && verdict.samples.failed() > 0)
        .then_some(StatusType::CmoRequestWithSamplesMissingCmoLabelFields)
}

fn render(verdict: &Verdict) -> String {
    Value::Object(verdict.record.clone()).to_string()
}

/// Picks downstream topics from the message kind, the CMO classification and the verdict.
pub struct Router {
    topics: OutboundTopics,
}

impl Router {
    pub fn new(topics: OutboundTopics) -> Self {
        Self { topics }
    }

    pub fn route(&self, outcome: Outcome) -> Vec<RoutingDecision> {
        match outcome {
            // Published pass or fail: downstream reads the attached status.
            Outcome::NewRequest(verdict) => {
                let topic = if verdict.context.is_cmo {
                    &self.topics.cmo_label_generator
                } else {
                    &self.topics.new_request
                };
                vec![keyed(topic, verdict)]
            }
            Outcome::RequestUpdate(verdict) => {
                vec![keyed(&self.topics.server_request_update, verdict)]
            }
            Outcome::SampleUpdates(verdicts) => {
                let (cmo, non_cmo): (Vec<Verdict>, Vec<Verdict>) = verdicts
                    .into_iter()
                    .partition(|verdict| verdict.context.is_cmo);
                [
                    (&self.topics.cmo_label_update, cmo),
                    (&self.topics.server_sample_update, non_cmo),
                ]
                .into_iter()
                .filter(|(_, batch)| !batch.is_empty())
                .map(|(topic, batch)| RoutingDecision {
                    topic: topic.clone(),
                    key: None,
                    payload: Value::Array(
                        batch
                            .into_iter()
                            .map(|verdict| Value::Object(verdict.record))
                            .collect(),
                    ),
                })
                .collect()
            }
            Outcome::PromotedRequest(verdict) if verdict.passed() => {
                let topic = if verdict.context.is_cmo {
                    &self.topics.cmo_promoted_label
                } else {
                    &self.topics.promoted_request
                };
                vec![keyed(topic, verdict)]
            }
            Outcome::PromotedRequest(_) => Vec::new(),
        }
    }
}

fn keyed(topic: &str, verdict: Verdict) -> RoutingDecision {
    RoutingDecision {
        topic: topic.to_owned(),
        key: verdict.request_id(),
        payload: Value::Object(verdict.record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use request_validator::{Record, RequestChecker};
    use serde_json::json;

    fn topics() -> OutboundTopics {
        OutboundTopics {
            cmo_label_generator: "CMO_LABEL_GENERATOR".to_owned(),
            new_request: "NEW_REQUEST".to_owned(),
            server_request_update: "SERVER_REQUEST_UPDATE".to_owned(),
            cmo_label_update: "CMO_LABEL_UPDATE".to_owned(),
            server_sample_update: "SERVER_SAMPLE_UPDATE".to_owned(),
            cmo_promoted_label: "CMO_PROMOTED_LABEL".to_owned(),
            promoted_request: "PROMOTED_REQUEST".to_owned(),
        }
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("test record must be an object")
    }

    #[test]
    fn new_requests_are_published_even_when_failing() {
        let checker = RequestChecker::new(false);
        let router = Router::new(topics());

        let cmo = checker.filter_valid_request(record(
            json!({"requestId": "1456_T", "isCmoRequest": true, "samples": []}),
        ));
        assert!(!cmo.passed());
        let decisions = router.route(Outcome::NewRequest(cmo));
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].topic, "CMO_LABEL_GENERATOR");
        assert_eq!(decisions[0].key.as_deref(), Some("1456_T"));
        assert_eq!(
            decisions[0].payload["status"]["validationStatus"],
            json!(false)
        );

        let non_cmo = checker.filter_valid_request(record(json!({"igoRequestId": "1457_B"})));
        let decisions = router.route(Outcome::NewRequest(non_cmo));
        assert_eq!(decisions[0].topic, "NEW_REQUEST");
        assert_eq!(decisions[0].key.as_deref(), Some("1457_B"));
    }

    #[test]
    fn request_updates_go_to_server() {
        let verdict =
            RequestChecker::new(false).validate_request_update(record(json!({"foo": "bar"})));
        let decisions = Router::new(topics()).route(Outcome::RequestUpdate(verdict));
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].topic, "SERVER_REQUEST_UPDATE");
        assert_eq!(decisions[0].key, None);
    }

    #[test]
    fn sample_updates_fan_out_by_classification() {
        let checker = RequestChecker::new(false);
        let verdicts = vec![
            checker.validate_sample_update(record(json!({
                "igoId": "1456_T_1",
                "additionalProperties": {"igoRequestId": "1456_T", "isCmoSample": "true"}
            }))),
            checker.validate_sample_update(record(json!({
                "igoId": "1457_B_1",
                "additionalProperties": {"igoRequestId": "1457_B", "isCmoSample": "false"}
            }))),
            checker.validate_sample_update(record(json!({
                "igoId": "1457_B_2",
                "additionalProperties": {"igoRequestId": "1457_B"}
            }))),
        ];

        let decisions = Router::new(topics()).route(Outcome::SampleUpdates(verdicts));
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].topic, "CMO_LABEL_UPDATE");
        assert_eq!(decisions[0].payload.as_array().map(Vec::len), Some(1));
        assert_eq!(decisions[1].topic, "SERVER_SAMPLE_UPDATE");
        assert_eq!(decisions[1].payload.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn empty_subsets_are_not_published() {
        let verdicts = vec![RequestChecker::new(false).validate_sample_update(record(json!({
            "igoId": "1457_B_1",
            "requestId": "1457_B"
        })))];
        let decisions = Router::new(topics()).route(Outcome::SampleUpdates(verdicts));
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].topic, "SERVER_SAMPLE_UPDATE");
    }

    #[test]
    fn failed_promoted_requests_are_suppressed() {
        let checker = RequestChecker::new(false);
        let router = Router::new(topics());

        let passing = checker.validate_promoted_request(record(json!({
            "requestId": "1456_T",
            "isCmoRequest": true,
            "samples": [{"igoId": "1456_T_1", "cmoPatientId": "C-8484"}]
        })));
        let decisions = router.route(Outcome::PromotedRequest(passing));
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].topic, "CMO_PROMOTED_LABEL");

        let failing = checker.validate_promoted_request(record(json!({
            "requestId": "1456_T",
            "samples": [{"igoId": "1456_T_1"}]
        })));
        let outcome = Outcome::PromotedRequest(failing);
        let statuses: Vec<StatusType> = outcome
            .audit_events()
            .into_iter()
            .map(|(status, _)| status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                StatusType::PromotedSamplesMissingIds,
                StatusType::PromotedRequestFailedSanityCheck
            ]
        );
        assert!(router.route(outcome).is_empty());
    }

    #[test]
    fn new_request_audit_status() {
        let checker = RequestChecker::new(true);
        let skipped = checker.filter_valid_request(record(json!({
            "requestId": "1457_B",
            "samples": [{"baitSet": "IMPACT505_BAITS"}]
        })));
        assert_eq!(
            new_request_status(&skipped),
            Some(StatusType::CmoRequestFilterSkippedRequest)
        );

        let empty = checker.filter_valid_request(record(json!({
            "requestId": "1456_T",
            "isCmoRequest": true,
            "samples": []
        })));
        assert_eq!(
            new_request_status(&empty),
            Some(StatusType::RequestWithMissingSamples)
        );

        let failing = checker.filter_valid_request(record(json!({
            "requestId": "1456_T",
            "isCmoRequest": true,
            "samples": [{"igoId": "1456_T_1", "cmoPatientId": "C-8484"}]
        })));
        assert_eq!(
            new_request_status(&failing),
            Some(StatusType::CmoRequestFailedSanityCheck)
        );
    }
}
