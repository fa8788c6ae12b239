//! The echo service core.
//!
//! Every routing layer mounts the same two operations:
//! - `handle_get`: echo the action item taken from the request path
//! - `handle_post`: echo the action item taken from a JSON request body
//!
//! The service knows nothing about HTTP framing. It produces a
//! `StatusResponse` (or an `EchoError`) and `Reply` renders that outcome as
//! a status code plus an optional JSON body for the adapter to send.

use bytes::Bytes;
use http::StatusCode;
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Action item extracted from the `/ais/{ai}` path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionItemQuery {
    pub action_item: String,
}

impl ActionItemQuery {
    pub fn new(action_item: impl Into<String>) -> Self {
        Self {
            action_item: action_item.into(),
        }
    }
}

/// Body key holding the action item. Matched without regard to ASCII case.
const ACTION_ITEM_KEY: &str = "ai";

/// Action item carried by a POST body: `{"ai": "..."}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionItemCommand {
    pub action_item: String,
}

impl ActionItemCommand {
    /// Bind a raw request body.
    ///
    /// Binding is lenient:
    /// - a missing key, `"ai": null` and a bare `null` document give `""`
    /// - `"AI"`, `"Ai"` and `"aI"` bind like `"ai"`; the last one wins
    /// - other keys are skipped without being decoded
    /// - unpaired surrogate escapes and invalid UTF-8 become U+FFFD
    ///
    /// Text that is not JSON is rejected, and so is JSON that is not an
    /// object or whose `ai` is not a string.
    pub fn from_body(raw: &[u8]) -> Result<Self, EchoError> {
        let command: Option<Self> = serde_json::from_slice(raw)?;
        Ok(command.unwrap_or_default())
    }
}

impl<'de> Deserialize<'de> for ActionItemCommand {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(CommandVisitor)
    }
}

struct CommandVisitor;

impl<'de> Visitor<'de> for CommandVisitor {
    type Value = ActionItemCommand;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut command = ActionItemCommand::default();
        while let Some(LossyString(key)) = map.next_key::<LossyString>()? {
            if !key.eq_ignore_ascii_case(ACTION_ITEM_KEY) {
                map.next_value::<IgnoredAny>()?;
                continue;
            }
            // `null` keeps whatever an earlier key bound.
            if let Some(LossyString(ai)) = map.next_value::<Option<LossyString>>()? {
                command.action_item = ai;
            }
        }
        Ok(command)
    }
}

/// A JSON string taken as raw bytes and decoded lossily.
struct LossyString(String);

impl<'de> Deserialize<'de> for LossyString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_bytes(LossyStringVisitor)
    }
}

struct LossyStringVisitor;

impl<'de> Visitor<'de> for LossyStringVisitor {
    type Value = LossyString;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(LossyString(v.to_owned()))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(LossyString(decode_lossy(v)))
    }
}

/// Decode string bytes, replacing every unpaired surrogate and every
/// invalid UTF-8 sequence with U+FFFD.
///
/// serde_json hands unpaired `\uD800`-`\uDFFF` escapes over as their
/// three-byte generalized UTF-8 form (`ED A0..BF 80..BF`), which never
/// occurs in valid UTF-8.
fn decode_lossy(bytes: &[u8]) -> String {
    const REPLACEMENT_UTF8: &[u8] = &[0xEF, 0xBF, 0xBD];

    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_owned();
    }

    let mut cleaned = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    while let Some((&first, tail)) = rest.split_first() {
        if let [0xED, 0xA0..=0xBF, 0x80..=0xBF, after @ ..] = rest {
            cleaned.extend_from_slice(REPLACEMENT_UTF8);
            rest = after;
        } else {
            cleaned.push(first);
            rest = tail;
        }
    }
    String::from_utf8_lossy(&cleaned).into_owned()
}

/// The single response body type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub action_item: String,
}

/// Per-request failures.
#[derive(Debug, Error)]
pub enum EchoError {
    /// Not JSON at all, or cut short.
    #[error("malformed request body: {0}")]
    MalformedBody(#[source] serde_json::Error),

    /// Well-formed JSON that does not bind to a command.
    #[error("request body does not bind: {0}")]
    Unbindable(#[source] serde_json::Error),
}

impl From<serde_json::Error> for EchoError {
    fn from(e: serde_json::Error) -> Self {
        match e.classify() {
            Category::Data => EchoError::Unbindable(e),
            _ => EchoError::MalformedBody(e),
        }
    }
}

/// Echo service bound to one greeting.
///
/// Cloning is cheap; every connection of a listener shares the same greeting.
#[derive(Debug, Clone)]
pub struct EchoService {
    greeting: Arc<str>,
}

impl EchoService {
    pub fn new(greeting: impl Into<Arc<str>>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Echo a path-supplied action item. Never fails.
    pub fn handle_get(&self, query: ActionItemQuery) -> StatusResponse {
        StatusResponse {
            status: self.greeting.to_string(),
            action_item: query.action_item,
        }
    }

    /// Echo a body-supplied action item.
    pub fn handle_post(&self, raw_body: &[u8]) -> Result<StatusResponse, EchoError> {
        let command = ActionItemCommand::from_body(raw_body)?;
        Ok(StatusResponse {
            status: self.greeting.to_string(),
            action_item: command.action_item,
        })
    }

    /// Run the GET operation and render it.
    pub fn get(&self, action_item: impl Into<String>) -> Reply {
        Reply::from(self.handle_get(ActionItemQuery::new(action_item)))
    }

    /// Run the POST operation and render it.
    pub fn post(&self, raw_body: &[u8]) -> Reply {
        match self.handle_post(raw_body) {
            Ok(response) => Reply::from(response),
            Err(e) => {
                tracing::debug!(error = %e, "Rejected request body");
                Reply::from(e)
            }
        }
    }
}

/// Content type of every non-empty reply.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Routing-agnostic rendering of an operation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    /// JSON body; `None` means an empty body without a content type.
    pub body: Option<Bytes>,
}

impl Reply {
    /// An empty-bodied reply, used for every error status.
    pub fn empty(status: StatusCode) -> Self {
        Self { status, body: None }
    }

    pub fn content_type(&self) -> Option<&'static str> {
        self.body.as_ref().map(|_| JSON_CONTENT_TYPE)
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }
}

impl From<StatusResponse> for Reply {
    fn from(response: StatusResponse) -> Self {
        // Two string fields always serialize.
        let body = serde_json::to_vec(&response).unwrap_or_default();
        Reply {
            status: StatusCode::OK,
            body: Some(Bytes::from(body)),
        }
    }
}

impl From<EchoError> for Reply {
    fn from(e: EchoError) -> Self {
        match e {
            EchoError::MalformedBody(_) | EchoError::Unbindable(_) => {
                Reply::empty(StatusCode::BAD_REQUEST)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EchoService {
        EchoService::new("Hello world from tests!")
    }

    #[test]
    fn test_get_echoes_action_item() {
        let response = service().handle_get(ActionItemQuery::new("buy-milk"));
        assert_eq!(response.status, "Hello world from tests!");
        assert_eq!(response.action_item, "buy-milk");
    }

    #[test]
    fn test_get_accepts_unusual_strings() {
        let svc = service();
        for s in ["", "  spaced  out ", "café ☕", r#"{"ai":"x"}"#, "a\"b\\c"] {
            assert_eq!(svc.handle_get(ActionItemQuery::new(s)).action_item, s);
        }
    }

    #[test]
    fn test_post_echoes_action_item() {
        let response = service().handle_post(br#"{"ai":"buy-milk"}"#).unwrap();
        assert_eq!(response.action_item, "buy-milk");
        assert_eq!(response.status, "Hello world from tests!");
    }

    #[test]
    fn test_post_lenient_binding() {
        let svc = service();
        assert_eq!(svc.handle_post(b"{}").unwrap().action_item, "");
        assert_eq!(svc.handle_post(br#"{"ai":null}"#).unwrap().action_item, "");
        assert_eq!(svc.handle_post(b"null").unwrap().action_item, "");
        assert_eq!(svc.handle_post(b" \n{ } ").unwrap().action_item, "");
        assert_eq!(
            svc.handle_post(br#"{"ai":"x","extra":[1,2]}"#)
                .unwrap()
                .action_item,
            "x"
        );
    }

    #[test]
    fn test_post_key_matches_any_case() {
        let svc = service();
        let bodies: [&[u8]; 3] = [br#"{"AI":"x"}"#, br#"{"Ai":"x"}"#, br#"{"aI":"x"}"#];
        for body in bodies {
            assert_eq!(svc.handle_post(body).unwrap().action_item, "x");
        }

        // Last match wins; a later null does not clear it.
        let body = br#"{"ai":"first","AI":"second","Ai":null}"#;
        assert_eq!(svc.handle_post(body).unwrap().action_item, "second");

        assert_eq!(svc.handle_post(br#"{"aid":"x"}"#).unwrap().action_item, "");
    }

    #[test]
    fn test_post_skips_unused_values_without_decoding() {
        let svc = service();

        let body = br#"{"ai":"x","n":1e400}"#;
        assert_eq!(svc.handle_post(body).unwrap().action_item, "x");

        let body = br#"{"n":123456789012345678901234567890,"ai":"x"}"#;
        assert_eq!(svc.handle_post(body).unwrap().action_item, "x");

        let body = format!(
            r#"{{"ai":"x","deep":{}{}}}"#,
            "[".repeat(200),
            "]".repeat(200)
        );
        assert_eq!(svc.handle_post(body.as_bytes()).unwrap().action_item, "x");

        let body = br#"{"note":"\udc00","ai":"x"}"#;
        assert_eq!(svc.handle_post(body).unwrap().action_item, "x");
    }

    #[test]
    fn test_post_replaces_unpaired_surrogates() {
        let svc = service();
        let cases: [(&[u8], &str); 5] = [
            (br#"{"ai":"\ud800"}"#, "\u{FFFD}"),
            (br#"{"ai":"a\udc00b"}"#, "a\u{FFFD}b"),
            (br#"{"ai":"\ud800\n"}"#, "\u{FFFD}\n"),
            (br#"{"ai":"\ud800A"}"#, "\u{FFFD}A"),
            (br#"{"ai":"\ud83d\ude00"}"#, "\u{1F600}"),
        ];
        for (body, expected) in cases {
            assert_eq!(svc.handle_post(body).unwrap().action_item, expected);
        }
    }

    #[test]
    fn test_post_replaces_invalid_utf8() {
        let body = b"{\"ai\":\"caf\xFF\"}";
        assert_eq!(service().handle_post(body).unwrap().action_item, "caf\u{FFFD}");
    }

    #[test]
    fn test_post_rejects_malformed_bodies() {
        let svc = service();
        let bodies: [&[u8]; 6] = [b"not json", b"{", b"", b"   ", b"{} x", br#"{"ai":"x",}"#];
        for body in bodies {
            assert!(
                matches!(svc.handle_post(body), Err(EchoError::MalformedBody(_))),
                "accepted {:?}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_post_rejects_unbindable_json() {
        let svc = service();
        let bodies: [&[u8]; 8] = [
            b"[]",
            br#"["buy-milk"]"#,
            b"42",
            br#""buy-milk""#,
            b"true",
            br#"{"ai":5}"#,
            br#"{"ai":["x"]}"#,
            br#"{"AI":{"nested":"x"}}"#,
        ];
        for body in bodies {
            assert!(
                matches!(svc.handle_post(body), Err(EchoError::Unbindable(_))),
                "accepted {:?}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_reply_serialization() {
        let reply = service().get("buy-milk");
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.content_type(), Some(JSON_CONTENT_TYPE));
        assert_eq!(
            reply.body.as_deref(),
            Some(&br#"{"status":"Hello world from tests!","action_item":"buy-milk"}"#[..])
        );
    }

    #[test]
    fn test_malformed_reply_is_empty_400() {
        let reply = service().post(b"{");
        assert_eq!(reply, Reply::empty(StatusCode::BAD_REQUEST));
        assert_eq!(reply.body_len(), 0);
        assert_eq!(reply.content_type(), None);
    }

    #[test]
    fn test_replies_are_idempotent() {
        let svc = service();
        assert_eq!(svc.get("same"), svc.get("same"));
        assert_eq!(svc.post(br#"{"ai":"same"}"#), svc.post(br#"{"ai":"same"}"#));
    }
}
