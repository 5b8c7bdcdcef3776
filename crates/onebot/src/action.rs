//! Outbound action frames.

use serde::{Deserialize, Serialize};

use crate::error::{OneBotError, Result};
use crate::message::MessageBody;

/// Action name for group messages.
pub const SEND_GROUP_MSG: &str = "send_group_msg";
/// Action name for private messages.
pub const SEND_PRIVATE_MSG: &str = "send_private_msg";

/// Kind of chat a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    #[default]
    Group,
    Private,
}

/// A resolved, addressable message target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Group(i64),
    Private(i64),
}

impl Target {
    /// Resolve a configured target. The id must be a positive integer.
    pub fn parse(kind: TargetType, id: &str) -> Result<Self> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(OneBotError::invalid_target("target id is empty"));
        }
        let numeric: i64 = trimmed
            .parse()
            .map_err(|_| OneBotError::invalid_target(format!("'{}' is not numeric", trimmed)))?;
        if numeric <= 0 {
            return Err(OneBotError::invalid_target(format!(
                "'{}' must be positive",
                trimmed
            )));
        }

        Ok(match kind {
            TargetType::Group => Self::Group(numeric),
            TargetType::Private => Self::Private(numeric),
        })
    }

    /// Action used to deliver a message to this target.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Group(_) => SEND_GROUP_MSG,
            Self::Private(_) => SEND_PRIVATE_MSG,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Group(id) | Self::Private(id) => *id,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group(id) => write!(f, "group:{}", id),
            Self::Private(id) => write!(f, "private:{}", id),
        }
    }
}

/// Parameters of `send_group_msg` / `send_private_msg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub message: MessageBody,
}

/// A request frame sent over the forward WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    pub params: SendMessageParams,
    /// Correlation id echoed back in the response.
    pub echo: String,
}

impl ActionRequest {
    /// Build a send-message action with a fresh echo id.
    pub fn send_message(target: Target, message: MessageBody) -> Self {
        let params = match target {
            Target::Group(id) => SendMessageParams {
                group_id: Some(id),
                user_id: None,
                message,
            },
            Target::Private(id) => SendMessageParams {
                group_id: None,
                user_id: Some(id),
                message,
            },
        };

        Self {
            action: target.action().to_string(),
            params,
            echo: new_echo(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Generate a new echo id (32 lowercase hex chars).
pub fn new_echo() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
