// Inbound envelope decoding.
//
// The decoder is deliberately lenient about everything except the three
// shapes that make a message unusable: a body that isn't JSON, a top level
// that isn't an object, and a missing (or null) `data` field. A missing or
// non-string `pattern` is not malformed here; the router treats it as an
// unknown pattern.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Why an inbound body could not be turned into an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvelopeError {
    #[error("body is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("top level is not a JSON object")]
    NotAnObject,
    #[error("envelope has no data field")]
    MissingData,
}

/// A decoded `{pattern, data}` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub pattern: Option<String>,
    pub data: Value,
}

impl Envelope {
    /// Decode a raw message body (UTF-8 JSON).
    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| EnvelopeError::InvalidJson(e.to_string()))?;

        let Value::Object(mut fields) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let data = match fields.remove("data") {
            None | Some(Value::Null) => return Err(EnvelopeError::MissingData),
            Some(data) => data,
        };

        let pattern = match fields.remove("pattern") {
            Some(Value::String(pattern)) => Some(pattern),
            _ => None,
        };

        Ok(Self { pattern, data })
    }
}

/// Payload of `post.created` / `post.updated`.
///
/// Extra fields sent by the posts service are ignored. `id` is opaque: it is
/// never parsed, only echoed back as `postId`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostEvent {
    pub id: String,
    pub title: String,
    pub content: String,
}

impl PostEvent {
    pub fn from_data(data: &Value) -> serde_json::Result<Self> {
        PostEvent::deserialize(data)
    }
}

/// Best-effort post id lookup for logging when the payload itself is invalid.
pub fn peek_post_id(data: &Value) -> Option<&str> {
    data.get("id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_full_envelope() {
        let body = br#"{"pattern":"post.created","data":{"id":"p1","title":"t","content":"c"}}"#;
        let envelope = Envelope::decode(body).unwrap();
        assert_eq!(envelope.pattern.as_deref(), Some("post.created"));
        assert_eq!(envelope.data["id"], "p1");
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let err = Envelope::decode(b"not json at all").unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidJson(_)));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert_eq!(
            Envelope::decode(b"[1, 2, 3]").unwrap_err(),
            EnvelopeError::NotAnObject
        );
        assert_eq!(
            Envelope::decode(b"\"post.created\"").unwrap_err(),
            EnvelopeError::NotAnObject
        );
    }

    #[test]
    fn test_decode_rejects_missing_or_null_data() {
        assert_eq!(
            Envelope::decode(br#"{"pattern":"post.created"}"#).unwrap_err(),
            EnvelopeError::MissingData
        );
        assert_eq!(
            Envelope::decode(br#"{"pattern":"post.created","data":null}"#).unwrap_err(),
            EnvelopeError::MissingData
        );
    }

    #[test]
    fn test_decode_tolerates_missing_pattern() {
        let envelope = Envelope::decode(br#"{"data":{}}"#).unwrap();
        assert_eq!(envelope.pattern, None);
    }

    #[test]
    fn test_decode_non_string_pattern_is_none() {
        let envelope = Envelope::decode(br#"{"pattern":42,"data":{}}"#).unwrap();
        assert_eq!(envelope.pattern, None);
    }

    #[test]
    fn test_post_event_ignores_extra_fields() {
        let data = json!({
            "id": "abc",
            "title": "Hello",
            "content": "<p>World</p>",
            "created_by": "user-1",
            "publish": false
        });
        let post = PostEvent::from_data(&data).unwrap();
        assert_eq!(post.id, "abc");
        assert_eq!(post.title, "Hello");
        assert_eq!(post.content, "<p>World</p>");
    }

    #[test]
    fn test_post_event_requires_title() {
        let data = json!({ "id": "abc", "content": "x" });
        assert!(PostEvent::from_data(&data).is_err());
    }

    #[test]
    fn test_peek_post_id() {
        assert_eq!(peek_post_id(&json!({ "id": "p9" })), Some("p9"));
        assert_eq!(peek_post_id(&json!({ "id": 9 })), None);
        assert_eq!(peek_post_id(&json!("scalar")), None);
    }
}
