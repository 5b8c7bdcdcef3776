//! OneBot: payloads for the OneBot v11 forward WebSocket protocol.
//!
//! This crate covers the subset of the protocol a push notifier needs:
//! building `send_group_msg` / `send_private_msg` frames, correlating
//! responses through `echo`, and addressing an endpoint (access token in
//! the query string and as a bearer header).
//!
//! ## Core Types
//!
//! - [`Segment`] / [`MessageBody`] - message content in string or array form
//! - [`Target`] - a resolved group or private chat
//! - [`ActionRequest`] - an outbound action frame
//! - [`Inbound`] - a decoded inbound frame (response or event)
//! - [`Endpoint`] - connection URL and handshake request

pub mod action;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod response;

pub use action::{ActionRequest, SendMessageParams, Target, TargetType, new_echo};
pub use endpoint::Endpoint;
pub use error::{OneBotError, Result};
pub use message::{MessageBody, Segment};
pub use response::{ActionResponse, Inbound, parse_inbound};
