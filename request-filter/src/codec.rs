//! Inbound payload decoding.
//!
//! Some gateways serialize the message body twice, delivering a JSON string whose content is
//! the actual document. Such payloads are unwrapped once before their shape is checked.
use request_validator::Record;
use serde_json::Value;

use crate::error::DecodeError;

pub fn decode_record(payload: &[u8]) -> Result<Record, DecodeError> {
    match decode_value(payload)? {
        Value::Object(record) => Ok(record),
        other => Err(DecodeError::UnexpectedShape {
            expected: "a JSON object",
            found: kind_of(&other),
        }),
    }
}

/// A batch is a JSON array of objects. A lone object is accepted as a batch of one.
pub fn decode_batch(payload: &[u8]) -> Result<Vec<Record>, DecodeError> {
    match decode_value(payload)? {
        Value::Object(record) => Ok(vec![record]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(record) => Ok(record),
                other => Err(DecodeError::UnexpectedShape {
                    expected: "an array of JSON objects",
                    found: kind_of(&other),
                }),
            })
            .collect(),
        other => Err(DecodeError::UnexpectedShape {
            expected: "a JSON array",
            found: kind_of(&other),
        }),
    }
}

fn decode_value(payload: &[u8]) -> Result<Value, DecodeError> {
    match serde_json::from_slice(payload)? {
        Value::String(inner) => Ok(serde_json::from_str(&inner)?),
        value => Ok(value),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_plain_object() {
        let record = decode_record(br#"{"requestId":"1456_T","samples":[]}"#).expect("valid");
        assert_eq!(record.get("requestId"), Some(&json!("1456_T")));
    }

    #[test]
    fn unwraps_double_encoded_payload() {
        let inner = json!({"requestId": "1456_T", "isCmoRequest": true}).to_string();
        let payload = serde_json::to_vec(&Value::String(inner)).expect("serializable");
        let record = decode_record(&payload).expect("valid");
        assert_eq!(record.get("isCmoRequest"), Some(&json!(true)));
    }

    #[test]
    fn rejects_garbage_and_wrong_shapes() {
        assert!(matches!(
            decode_record(b"not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_record(b"[1, 2]"),
            Err(DecodeError::UnexpectedShape {
                found: "an array",
                ..
            })
        ));
        // A string that does not itself hold JSON
        assert!(matches!(
            decode_record(br#""1456_T""#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            decode_record(br#""\"1456_T\"""#),
            Err(DecodeError::UnexpectedShape {
                found: "a string",
                ..
            })
        ));
    }

    #[test]
    fn decodes_batches() {
        let batch = decode_batch(br#"[{"igoId":"1456_T_1"},{"igoId":"1456_T_2"}]"#).expect("valid");
        assert_eq!(batch.len(), 2);

        let single = decode_batch(br#"{"igoId":"1456_T_1"}"#).expect("valid");
        assert_eq!(single.len(), 1);

        assert!(decode_batch(br#"[{"igoId":"1456_T_1"}, 3]"#).is_err());
        assert!(decode_batch(b"true").is_err());
    }
}
