//! livewatch library crate.
//!
//! Polls monitored creators, detects new posts and live-session changes,
//! and pushes rendered notifications to OneBot endpoints.

pub mod actor;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod utils;

pub use error::{Error, Result};
