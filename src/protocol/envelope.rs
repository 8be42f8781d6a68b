//! Inbound frame decoding.
//!
//! One complete JSON text frame in, one [`Envelope`] out. The decoder
//! owns two quirks of the daemon's wire format:
//!
//! - The `error` field is an object carrying `message` in the current
//!   dialect, but a bare boolean in the legacy one. Both decode; the
//!   boolean form yields a zero-detail error rather than a crash.
//! - Current-dialect frames nest their payload under `data`; legacy
//!   frames put fields at the top level. [`Envelope::data`] is the `data`
//!   sub-object when present, otherwise the whole frame.
//!
//! Legacy field spellings (`number` vs `uuid`, `groupId` vs `groupID`,
//! `message` vs `body`) are also resolved here, via the accessor helpers
//! at the bottom, so nothing past this boundary sees dialect differences.

use serde_json::Value;

use crate::error::DecodeError;

/// One decoded frame from the daemon.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// The `type` tag the state machine dispatches on.
    pub typ: String,
    /// Error payload, when the frame is an error report.
    pub error: Option<ErrorDetail>,
    /// The `data` sub-object when present, otherwise the whole frame.
    pub data: Value,
}

/// Error payload shapes the daemon produces.
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorDetail {
    /// Current dialect: `error` is an object; its `message` string (empty
    /// when absent) is what gets shown to the user.
    Message(String),
    /// Legacy dialect: `error` is boolean `true`, no detail available.
    Flagged,
}

impl Envelope {
    /// The daemon-supplied error text, if any.
    ///
    /// `ErrorDetail::Flagged` yields None - there is no text to show.
    pub fn error_message(&self) -> Option<&str> {
        match &self.error {
            Some(ErrorDetail::Message(m)) => Some(m.as_str()),
            _ => None,
        }
    }

    /// True when the frame reports an error of either shape.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Decode one complete text frame.
///
/// Malformed JSON is a [`DecodeError`]; the caller must drop the frame
/// and report a connection-level diagnostic, never interpret partial
/// content.
pub fn decode(frame: &str) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_str(frame)?;
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

    let typ = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_owned();

    let error = match obj.get("error") {
        Some(Value::Object(e)) => {
            let message = e
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            Some(ErrorDetail::Message(message))
        }
        // Legacy daemons flag errors with a bare boolean and no detail.
        Some(Value::Bool(true)) => Some(ErrorDetail::Flagged),
        // Some error paths put a bare string here; keep the text.
        Some(Value::String(s)) => Some(ErrorDetail::Message(s.clone())),
        _ => None,
    };

    let data = match obj.get("data") {
        Some(d @ Value::Object(_)) => d.clone(),
        _ => value.clone(),
    };

    Ok(Envelope { typ, error, data })
}

// ── Dialect-neutral field accessors ─────────────────────────────────────
//
// Everything downstream of the decoder reads wire payloads through these,
// so legacy spellings never leak into the translators.

/// Identifier out of an address value: an object carrying `uuid` (current)
/// or `number` (either dialect), or a legacy bare string.
pub fn address_identifier(value: &Value) -> Option<&str> {
    match value {
        Value::Object(o) => o
            .get("uuid")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| o.get("number").and_then(Value::as_str)),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }
}

/// Number out of an address value, ignoring the uuid.
pub fn address_number(value: &Value) -> Option<&str> {
    match value {
        Value::Object(o) => o.get("number").and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }
}

/// Group id under its current (`groupID`), legacy (`groupId`) or bare
/// (`id`) spelling.
pub fn group_id(value: &Value) -> Option<&str> {
    value
        .get("groupID")
        .or_else(|| value.get("groupId"))
        .or_else(|| value.get("id"))
        .and_then(Value::as_str)
}

/// Message text under its current (`body`) or legacy (`message`) name.
pub fn body_text(value: &Value) -> Option<&str> {
    value
        .get("body")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_and_data_subobject_extracted() {
        let envelope = decode(r#"{"type":"subscribe","data":{"account":"+15550100"}}"#).unwrap();
        assert_eq!(envelope.typ, "subscribe");
        assert!(!envelope.is_error());
        assert_eq!(envelope.data, json!({"account": "+15550100"}));
    }

    #[test]
    fn test_whole_object_used_when_no_data_field() {
        let envelope = decode(r#"{"type":"version","version":"0.23.2"}"#).unwrap();
        assert_eq!(envelope.typ, "version");
        assert_eq!(envelope.data["version"], "0.23.2");
    }

    #[test]
    fn test_error_object_message_extracted() {
        let envelope =
            decode(r#"{"type":"subscribe","error":{"message":"account not found"}}"#).unwrap();
        assert_eq!(envelope.typ, "subscribe");
        assert_eq!(envelope.error_message(), Some("account not found"));
    }

    #[test]
    fn test_error_object_without_message_yields_empty_text() {
        let envelope = decode(r#"{"type":"send","error":{"code":500}}"#).unwrap();
        assert_eq!(envelope.error_message(), Some(""));
        assert!(envelope.is_error());
    }

    #[test]
    fn test_boolean_error_flag_has_no_detail() {
        let envelope = decode(r#"{"type":"send","error":true}"#).unwrap();
        assert_eq!(envelope.error, Some(ErrorDetail::Flagged));
        assert_eq!(envelope.error_message(), None);
    }

    #[test]
    fn test_boolean_false_error_is_not_an_error() {
        let envelope = decode(r#"{"type":"send","error":false}"#).unwrap();
        assert!(!envelope.is_error());
    }

    #[test]
    fn test_malformed_json_is_decode_error() {
        assert!(matches!(
            decode("{\"type\":"),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_non_object_frame_rejected() {
        assert!(matches!(decode("[1,2,3]"), Err(DecodeError::NotAnObject)));
    }

    #[test]
    fn test_missing_type_rejected() {
        assert!(matches!(
            decode(r#"{"data":{}}"#),
            Err(DecodeError::MissingType)
        ));
    }

    #[test]
    fn test_address_identifier_prefers_uuid() {
        let address = json!({"uuid": "aabb", "number": "+15550100"});
        assert_eq!(address_identifier(&address), Some("aabb"));
    }

    #[test]
    fn test_address_identifier_falls_back_to_number() {
        let address = json!({"number": "+15550100"});
        assert_eq!(address_identifier(&address), Some("+15550100"));
        let empty_uuid = json!({"uuid": "", "number": "+15550100"});
        assert_eq!(address_identifier(&empty_uuid), Some("+15550100"));
    }

    #[test]
    fn test_address_identifier_accepts_legacy_bare_string() {
        let address = json!("+15550100");
        assert_eq!(address_identifier(&address), Some("+15550100"));
    }

    #[test]
    fn test_group_id_spellings() {
        assert_eq!(group_id(&json!({"groupID": "g1"})), Some("g1"));
        assert_eq!(group_id(&json!({"groupId": "g2"})), Some("g2"));
        assert_eq!(group_id(&json!({"id": "g3"})), Some("g3"));
        assert_eq!(group_id(&json!({})), None);
    }

    #[test]
    fn test_body_text_spellings() {
        assert_eq!(body_text(&json!({"body": "hi"})), Some("hi"));
        assert_eq!(body_text(&json!({"message": "yo"})), Some("yo"));
    }
}
