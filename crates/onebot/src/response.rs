//! Inbound frame classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OneBotError, Result};

/// Response to an action, correlated through `echo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub retcode: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wording: Option<String>,
    pub echo: String,
}

impl ActionResponse {
    /// A successful response for `echo`.
    pub fn ok(echo: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            retcode: 0,
            data: Value::Null,
            message: None,
            wording: None,
            echo: echo.into(),
        }
    }

    /// A failed response for `echo`.
    pub fn failed(echo: impl Into<String>, retcode: i64, message: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            retcode,
            data: Value::Null,
            message: Some(message.into()),
            wording: None,
            echo: echo.into(),
        }
    }

    /// `ok` and `async` both count as accepted.
    pub fn is_ok(&self) -> bool {
        self.status != "failed" && matches!(self.retcode, 0 | 1)
    }

    /// Human readable failure reason.
    pub fn error_message(&self) -> String {
        let detail = self
            .wording
            .as_deref()
            .or(self.message.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or("no message");
        format!("retcode {} ({})", self.retcode, detail)
    }
}

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Response to one of our actions.
    Response(ActionResponse),
    /// Anything else the implementation pushes (messages, meta events).
    Event { post_type: Option<String> },
}

/// Classify an inbound text frame.
pub fn parse_inbound(text: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(ref map) = value else {
        return Err(OneBotError::protocol("frame is not a JSON object"));
    };

    if matches!(map.get("echo"), Some(Value::String(_))) {
        let response: ActionResponse = serde_json::from_value(value)?;
        return Ok(Inbound::Response(response));
    }

    Ok(Inbound::Event {
        post_type: map
            .get("post_type")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let frame = r#"{"status":"ok","retcode":0,"data":{"message_id":12},"echo":"abc"}"#;
        let Inbound::Response(response) = parse_inbound(frame).unwrap() else {
            panic!("expected response");
        };
        assert!(response.is_ok());
        assert_eq!(response.echo, "abc");
        assert_eq!(response.data["message_id"], 12);
    }

    #[test]
    fn test_parse_failed_response() {
        let frame = r#"{"status":"failed","retcode":1404,"wording":"group not found","echo":"e1"}"#;
        let Inbound::Response(response) = parse_inbound(frame).unwrap() else {
            panic!("expected response");
        };
        assert!(!response.is_ok());
        assert_eq!(response.error_message(), "retcode 1404 (group not found)");
    }

    #[test]
    fn test_parse_event() {
        let frame = r#"{"post_type":"meta_event","meta_event_type":"heartbeat"}"#;
        assert_eq!(
            parse_inbound(frame).unwrap(),
            Inbound::Event {
                post_type: Some("meta_event".to_string())
            }
        );
    }

    #[test]
    fn test_non_object_frame_is_protocol_error() {
        assert!(matches!(parse_inbound("[1,2]"), Err(OneBotError::Protocol(_))));
        assert!(matches!(
            parse_inbound("not json"),
            Err(OneBotError::Serialization(_))
        ));
    }
}
