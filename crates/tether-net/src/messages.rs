//! Wire message types and JSON encoding.
//!
//! Every frame is one JSON object terminated by `\n`. Inbound records carry a
//! `type` discriminator; outbound frames are either the login frame or an
//! application request carrying a correlation key.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of every correlation key this client generates. Replies whose key
/// lacks it belong to another client or an older protocol session.
pub const REPLY_TAG: &str = "tether:";

// ---------------------------------------------------------------------------
// Request kinds
// ---------------------------------------------------------------------------

/// Kind of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// The single in-flight login.
    Login,
    /// Ask the server for its counter.
    Count,
    /// Ask the server for its clock.
    Time,
}

impl RequestKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Login => "login",
            RequestKind::Count => "count",
            RequestKind::Time => "time",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A decoded server record. The `type` field selects the variant; records
/// with any other discriminator fail to decode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    /// Login acknowledgment. Extra fields are ignored.
    Login,
    /// Liveness signal.
    Heartbeat,
    /// Application response wrapping the reply payload.
    Msg {
        /// The wrapped reply.
        msg: Reply,
    },
}

impl Inbound {
    /// Discriminator name, for diagnostics.
    pub fn tag(&self) -> &'static str {
        match self {
            Inbound::Login => "login",
            Inbound::Heartbeat => "heartbeat",
            Inbound::Msg { .. } => "msg",
        }
    }
}

/// Payload of an application response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reply {
    /// Correlation key echoed from the request.
    pub reply: String,
    /// Every other field of the payload.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Reply {
    /// Whether the key carries this client's tag.
    pub fn is_ours(&self) -> bool {
        self.reply.starts_with(REPLY_TAG)
    }
}

/// Typed result of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Server counter value.
    Count(u64),
    /// Server clock, as reported.
    Time(String),
}

impl Response {
    /// Interpret a reply for a request of `kind`. Returns `None` when the
    /// payload lacks the field identifying that kind.
    pub fn from_reply(kind: RequestKind, reply: &Reply) -> Option<Self> {
        match kind {
            RequestKind::Count => reply.fields.get("count")?.as_u64().map(Response::Count),
            RequestKind::Time => match reply.fields.get("time")? {
                Value::String(s) => Some(Response::Time(s.clone())),
                Value::Null => None,
                other => Some(Response::Time(other.to_string())),
            },
            RequestKind::Login => None,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Count(n) => write!(f, "count = {n}"),
            Response::Time(t) => write!(f, "time = {t}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct LoginFrame<'a> {
    name: &'a str,
}

/// Encode the login frame, newline included.
pub fn encode_login(identity: &str) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(&LoginFrame { name: identity })?;
    line.push('\n');
    Ok(line)
}

/// Encode an application request, newline included.
///
/// `fields` holds the kind-specific payload; `request` and `id` always win
/// over same-named entries in it.
pub fn encode_request(
    kind: RequestKind,
    key: &str,
    fields: &Map<String, Value>,
) -> Result<String, serde_json::Error> {
    let mut object = fields.clone();
    object.insert("request".to_string(), Value::String(kind.as_str().to_string()));
    object.insert("id".to_string(), Value::String(key.to_string()));
    let mut line = serde_json::to_string(&Value::Object(object))?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(text: &str) -> Result<Inbound, serde_json::Error> {
        serde_json::from_str(text)
    }

    #[test]
    fn test_heartbeat_decodes() {
        assert_eq!(decode(r#"{"type":"heartbeat"}"#).unwrap(), Inbound::Heartbeat);
    }

    #[test]
    fn test_login_ack_ignores_extra_fields() {
        let msg = decode(r#"{"type":"login","motd":"welcome","users":3}"#).unwrap();
        assert_eq!(msg, Inbound::Login);
    }

    #[test]
    fn test_count_reply_decodes() {
        let msg = decode(r#"{"type":"msg","msg":{"count":23,"reply":"tether:a:1:0"}}"#).unwrap();
        let Inbound::Msg { msg } = msg else {
            panic!("expected msg");
        };
        assert_eq!(msg.reply, "tether:a:1:0");
        assert!(msg.is_ours());
        assert_eq!(
            Response::from_reply(RequestKind::Count, &msg),
            Some(Response::Count(23))
        );
    }

    #[test]
    fn test_unknown_discriminator_rejected() {
        assert!(decode(r#"{"type":"broadcast","text":"hi"}"#).is_err());
    }

    #[test]
    fn test_missing_discriminator_rejected() {
        assert!(decode(r#"{"count":1}"#).is_err());
    }

    #[test]
    fn test_msg_without_reply_rejected() {
        assert!(decode(r#"{"type":"msg","msg":{"count":1}}"#).is_err());
    }

    #[test]
    fn test_foreign_key_is_not_ours() {
        let reply = Reply {
            reply: "other-client:1".to_string(),
            fields: Map::new(),
        };
        assert!(!reply.is_ours());
    }

    #[test]
    fn test_time_reply_accepts_string_and_number() {
        let text = Reply {
            reply: "tether:k".to_string(),
            fields: json!({"time": "2024-01-01T00:00:00Z"})
                .as_object()
                .cloned()
                .unwrap(),
        };
        assert_eq!(
            Response::from_reply(RequestKind::Time, &text),
            Some(Response::Time("2024-01-01T00:00:00Z".to_string()))
        );

        let millis = Reply {
            reply: "tether:k".to_string(),
            fields: json!({"time": 1700000000000u64}).as_object().cloned().unwrap(),
        };
        assert_eq!(
            Response::from_reply(RequestKind::Time, &millis),
            Some(Response::Time("1700000000000".to_string()))
        );
    }

    #[test]
    fn test_reply_of_wrong_kind_is_not_interpreted() {
        let reply = Reply {
            reply: "tether:k".to_string(),
            fields: json!({"count": 4}).as_object().cloned().unwrap(),
        };
        assert_eq!(Response::from_reply(RequestKind::Time, &reply), None);
    }

    #[test]
    fn test_login_frame_shape() {
        let line = encode_login("alice").unwrap();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value, json!({"name": "alice"}));
    }

    #[test]
    fn test_request_frame_carries_kind_key_and_fields() {
        let fields = json!({"scope": "all", "id": "spoofed"})
            .as_object()
            .cloned()
            .unwrap();
        let line = encode_request(RequestKind::Count, "tether:alice:5:0", &fields).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(
            value,
            json!({"request": "count", "id": "tether:alice:5:0", "scope": "all"})
        );
    }
}
