//! OCPP-J message framing
//!
//! JSON-over-WebSocket envelope shared by every OCPP 1.6 exchange:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use serde_json::{json, Value};
use thiserror::Error;
use tracing::warn;

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

/// Errors that can occur when parsing an OCPP-J frame.
#[derive(Debug, Error, PartialEq)]
pub enum OcppFrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Empty OCPP message array")]
    EmptyArray,
    #[error("Message type is not a number")]
    InvalidMessageType,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("Expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },
    #[error("Field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
}

impl OcppFrame {
    /// Parse a raw JSON text into an `OcppFrame`.
    pub fn parse(text: &str) -> Result<Self, OcppFrameError> {
        let arr: Vec<Value> =
            serde_json::from_str(text).map_err(|e| OcppFrameError::InvalidJson(e.to_string()))?;

        let msg_type = arr
            .first()
            .ok_or(OcppFrameError::EmptyArray)?
            .as_u64()
            .ok_or(OcppFrameError::InvalidMessageType)?;

        match msg_type {
            MSG_TYPE_CALL => {
                require_len(&arr, 4)?;
                Ok(Self::Call {
                    unique_id: string_at(&arr, 1, "uniqueId must be a string")?,
                    action: string_at(&arr, 2, "action must be a string")?,
                    payload: arr[3].clone(),
                })
            }
            MSG_TYPE_CALL_RESULT => {
                require_len(&arr, 3)?;
                Ok(Self::CallResult {
                    unique_id: string_at(&arr, 1, "uniqueId must be a string")?,
                    payload: arr[2].clone(),
                })
            }
            MSG_TYPE_CALL_ERROR => {
                require_len(&arr, 3)?;
                Ok(Self::CallError {
                    unique_id: string_at(&arr, 1, "uniqueId must be a string")?,
                    error_code: arr[2].as_str().unwrap_or("InternalError").to_string(),
                    error_description: arr
                        .get(3)
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                    error_details: arr.get(4).cloned().unwrap_or_else(|| json!({})),
                })
            }
            other => Err(OcppFrameError::UnknownMessageType(other)),
        }
    }

    /// Parse, and on failure retry once after repairing the envelope
    /// malformations chargers commonly send (short CallResult/CallError arrays).
    pub fn parse_lenient(text: &str) -> Result<Self, OcppFrameError> {
        match Self::parse(text) {
            Ok(frame) => Ok(frame),
            Err(err) => match sanitize(text) {
                Some(repaired) => {
                    warn!(error = %err, "Repaired malformed OCPP frame");
                    Self::parse(&repaired)
                }
                None => Err(err),
            },
        }
    }

    /// Serialize this frame to a JSON string.
    pub fn serialize(&self) -> String {
        let arr = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => json!([MSG_TYPE_CALL, unique_id, action, payload]),
            Self::CallResult { unique_id, payload } => {
                json!([MSG_TYPE_CALL_RESULT, unique_id, payload])
            }
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => json!([
                MSG_TYPE_CALL_ERROR,
                unique_id,
                error_code,
                error_description,
                error_details
            ]),
        };
        arr.to_string()
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }
}

fn require_len(arr: &[Value], expected: usize) -> Result<(), OcppFrameError> {
    if arr.len() < expected {
        return Err(OcppFrameError::MissingFields {
            expected,
            got: arr.len(),
        });
    }
    Ok(())
}

fn string_at(arr: &[Value], idx: usize, what: &'static str) -> Result<String, OcppFrameError> {
    arr[idx]
        .as_str()
        .map(str::to_string)
        .ok_or(OcppFrameError::FieldTypeMismatch(what))
}

/// Connector fields that some firmware sends as `null`. Meter readings and
/// transaction ids are never filled in: they feed billing.
const NULLABLE_NUMBERS: &[(&str, &[&str])] = &[
    ("StartTransaction", &["connectorId"]),
    ("MeterValues", &["connectorId"]),
];

/// Zero-fill `null` connector ids in an inbound Call payload so it
/// deserializes into the typed request.
pub fn normalize_call_payload(action: &str, payload: &mut Value) {
    let Some(fields) = NULLABLE_NUMBERS
        .iter()
        .find(|(name, _)| *name == action)
        .map(|(_, fields)| *fields)
    else {
        return;
    };
    if let Some(obj) = payload.as_object_mut() {
        for field in fields {
            if obj.get(*field).is_some_and(Value::is_null) {
                obj.insert((*field).to_string(), json!(0));
            }
        }
    }
}

fn sanitize(text: &str) -> Option<String> {
    let mut value: Value = serde_json::from_str(text).ok()?;
    let arr = value.as_array_mut()?;
    let msg_type = arr.first()?.as_u64()?;

    match msg_type {
        MSG_TYPE_CALL_RESULT if arr.len() >= 2 => {
            while arr.len() < 3 {
                arr.push(json!({}));
            }
            if arr[2].is_null() {
                arr[2] = json!({});
            }
        }
        MSG_TYPE_CALL_ERROR if arr.len() == 2 => {
            arr.push(json!("NotImplemented"));
        }
        _ => return None,
    }

    serde_json::to_string(&value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call() {
        let text = r#"[2,"abc123","BootNotification",{"chargePointVendor":"Vendor","chargePointModel":"Model"}]"#;
        match OcppFrame::parse(text).unwrap() {
            OcppFrame::Call {
                unique_id,
                action,
                payload,
            } => {
                assert_eq!(unique_id, "abc123");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointVendor"], "Vendor");
            }
            other => panic!("Expected Call frame, got {:?}", other),
        }
    }

    #[test]
    fn parse_call_error_defaults_missing_details() {
        let frame = OcppFrame::parse(r#"[4,"x","NotSupported","nope"]"#).unwrap();
        assert_eq!(
            frame,
            OcppFrame::CallError {
                unique_id: "x".into(),
                error_code: "NotSupported".into(),
                error_description: "nope".into(),
                error_details: json!({}),
            }
        );
    }

    #[test]
    fn rejects_unknown_message_type() {
        assert_eq!(
            OcppFrame::parse(r#"[7,"x",{}]"#),
            Err(OcppFrameError::UnknownMessageType(7))
        );
        assert_eq!(OcppFrame::parse("[]"), Err(OcppFrameError::EmptyArray));
    }

    #[test]
    fn serialized_call_result_parses_back() {
        let frame = OcppFrame::CallResult {
            unique_id: "id2".into(),
            payload: json!({"currentTime": "2024-01-01T00:00:00Z"}),
        };
        let parsed = OcppFrame::parse(&frame.serialize()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn lenient_parse_fills_short_call_result() {
        let frame = OcppFrame::parse_lenient(r#"[3,"m1"]"#).unwrap();
        assert_eq!(
            frame,
            OcppFrame::CallResult {
                unique_id: "m1".into(),
                payload: json!({}),
            }
        );
    }

    #[test]
    fn lenient_parse_still_rejects_garbage() {
        assert!(OcppFrame::parse_lenient("not json").is_err());
        assert!(OcppFrame::parse_lenient(r#"[3]"#).is_err());
    }

    #[test]
    fn normalize_fills_connector_but_not_meter_fields() {
        let mut payload = json!({"connectorId": null, "meterStart": null});
        normalize_call_payload("StartTransaction", &mut payload);
        assert_eq!(payload["connectorId"], json!(0));
        assert_eq!(payload["meterStart"], json!(null));

        let mut stop = json!({"meterStop": null, "transactionId": null});
        normalize_call_payload("StopTransaction", &mut stop);
        assert_eq!(stop, json!({"meterStop": null, "transactionId": null}));
    }
}
