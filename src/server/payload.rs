//! Decoding of inbound mail-to-webhook deliveries.
//!
//! The bridge posts either a JSON document or a urlencoded form. Both are
//! reduced to a [`WebhookRequest`] with optional fields.

use serde_json::Value;
use thiserror::Error;

const FORM_SUBJECT_KEY: &str = "headers[Subject]";
const FORM_FROM_KEY: &str = "headers[From]";

/// Neither encoding produced any fields.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("request body is neither a JSON object nor a urlencoded form")]
pub struct DecodeError;

/// The encodings a delivery may arrive in.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    Json(serde_json::Map<String, Value>),
    Form(Vec<(String, String)>),
}

/// Normalized view of one delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookRequest {
    pub plain: Option<String>,
    pub html: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
}

impl InboundPayload {
    /// JSON is tried first; a form is only considered when JSON fails.
    ///
    /// Empty objects and empty forms count as "no data".
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
            if !map.is_empty() {
                return Ok(InboundPayload::Json(map));
            }
        }

        match serde_urlencoded::from_bytes::<Vec<(String, String)>>(body) {
            Ok(fields) if !fields.is_empty() && looks_like_form(body) => {
                Ok(InboundPayload::Form(fields))
            }
            _ => Err(DecodeError),
        }
    }

    pub fn into_request(self) -> WebhookRequest {
        match self {
            InboundPayload::Json(map) => {
                let headers = map.get("headers");
                WebhookRequest {
                    plain: string_field(map.get("plain")),
                    html: string_field(map.get("html")),
                    subject: string_field(headers.and_then(|h| h.get("Subject"))),
                    from: string_field(headers.and_then(|h| h.get("From"))),
                }
            }
            InboundPayload::Form(fields) => {
                let mut request = WebhookRequest::default();
                for (key, value) in fields {
                    let slot = match key.as_str() {
                        "plain" => &mut request.plain,
                        "html" => &mut request.html,
                        FORM_SUBJECT_KEY => &mut request.subject,
                        FORM_FROM_KEY => &mut request.from,
                        _ => continue,
                    };
                    if slot.is_none() {
                        *slot = Some(value);
                    }
                }
                request
            }
        }
    }
}

// Any byte string parses as a form, JSON garbage included; a real form has a
// key=value pair.
fn looks_like_form(body: &[u8]) -> bool {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim_start();
    !trimmed.starts_with('{') && !trimmed.starts_with('[') && trimmed.contains('=')
}

fn string_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_decodes() {
        let body = br#"{"plain":"hi","html":"<p>x</p>","headers":{"Subject":"S","From":"f@x.com"}}"#;
        let request = InboundPayload::decode(body).unwrap().into_request();
        assert_eq!(
            request,
            WebhookRequest {
                plain: Some("hi".into()),
                html: Some("<p>x</p>".into()),
                subject: Some("S".into()),
                from: Some("f@x.com".into()),
            }
        );
    }

    #[test]
    fn json_missing_fields_are_none() {
        let request = InboundPayload::decode(br#"{"plain":"hi"}"#)
            .unwrap()
            .into_request();
        assert_eq!(request.html, None);
        assert_eq!(request.subject, None);
        assert_eq!(request.from, None);
    }

    #[test]
    fn empty_json_object_is_no_data() {
        assert_eq!(InboundPayload::decode(b"{}"), Err(DecodeError));
    }

    #[test]
    fn empty_body_is_no_data() {
        assert_eq!(InboundPayload::decode(b""), Err(DecodeError));
    }

    #[test]
    fn truncated_json_is_no_data() {
        assert_eq!(InboundPayload::decode(br#"{"plain": "hi"#), Err(DecodeError));
    }

    #[test]
    fn json_array_is_no_data() {
        assert_eq!(InboundPayload::decode(b"[1,2]"), Err(DecodeError));
    }

    #[test]
    fn form_decodes_with_bracketed_header_keys() {
        let body = b"plain=Dear+a%40b.com+123456&headers%5BSubject%5D=Hi&headers%5BFrom%5D=a%40b.com";
        let request = InboundPayload::decode(body).unwrap().into_request();
        assert_eq!(request.plain.as_deref(), Some("Dear a@b.com 123456"));
        assert_eq!(request.subject.as_deref(), Some("Hi"));
        assert_eq!(request.from.as_deref(), Some("a@b.com"));
        assert_eq!(request.html, None);
    }

    #[test]
    fn form_keeps_first_duplicate() {
        let request = InboundPayload::decode(b"plain=one&plain=two")
            .unwrap()
            .into_request();
        assert_eq!(request.plain.as_deref(), Some("one"));
    }

    #[test]
    fn plain_text_body_is_no_data() {
        assert_eq!(InboundPayload::decode(b"just some words"), Err(DecodeError));
    }
}
