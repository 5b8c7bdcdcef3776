//! Structured diagnostic records captured from tracing events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Level, Subscriber, debug, info, warn};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use crate::store::DiagnosticsSink;

/// Target of the writer task. Events from it never become records.
const WRITER_TARGET: &str = "livewatch::diagnostics_writer";

/// Capacity of the channel between the layer and the writer task.
pub const DIAGNOSTICS_CHANNEL_CAPACITY: usize = 1024;

/// Severity of a diagnostic record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&Level> for Severity {
    fn from(level: &Level) -> Self {
        match *level {
            Level::TRACE => Self::Trace,
            Level::DEBUG => Self::Debug,
            Level::INFO => Self::Info,
            Level::WARN => Self::Warn,
            Level::ERROR => Self::Error,
        }
    }
}

impl From<Level> for Severity {
    fn from(level: Level) -> Self {
        Self::from(&level)
    }
}

/// One append-only diagnostic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_id: Option<String>,
    pub target: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,
}

impl DiagnosticRecord {
    pub fn new(severity: Severity, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            creator_id: None,
            binding_id: None,
            target: target.into(),
            message: message.into(),
            context: Map::new(),
        }
    }
}

/// Collects event or span fields.
#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Map<String, Value>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }
}

/// Fields recorded on a span, stored in its extensions.
struct SpanFields(Map<String, Value>);

fn take_id(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    fields.remove(key).map(|v| match v {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Destination of records at or above the configured severity.
#[derive(Clone)]
struct Forwarder {
    tx: mpsc::Sender<DiagnosticRecord>,
    min_severity: Severity,
}

/// Shared state between the layer and [`super::LoggingConfig`].
#[derive(Default)]
pub(crate) struct DiagnosticsState {
    forwarder: RwLock<Option<Forwarder>>,
    dropped: AtomicU64,
}

impl DiagnosticsState {
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Layer converting tracing events into [`DiagnosticRecord`]s.
///
/// Every record is broadcast to live subscribers; records at or above the
/// minimum severity are also queued for the persistent sink. A full queue
/// drops the record instead of blocking the emitter.
pub(crate) struct DiagnosticsLayer {
    broadcast: broadcast::Sender<DiagnosticRecord>,
    state: Arc<DiagnosticsState>,
}

impl DiagnosticsLayer {
    pub(crate) fn new(
        broadcast: broadcast::Sender<DiagnosticRecord>,
        state: Arc<DiagnosticsState>,
    ) -> Self {
        Self { broadcast, state }
    }
}

impl<S> Layer<S> for DiagnosticsLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut collector = FieldCollector::default();
        attrs.record(&mut collector);
        if collector.fields.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanFields(collector.fields));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();
        if target == WRITER_TARGET || target.starts_with("sqlx") {
            return;
        }

        let mut collector = FieldCollector::default();
        event.record(&mut collector);
        let mut fields = collector.fields;

        let mut record = DiagnosticRecord::new(
            Severity::from(metadata.level()),
            target,
            collector.message.unwrap_or_default(),
        );
        record.creator_id = take_id(&mut fields, "creator_id");
        record.binding_id = take_id(&mut fields, "binding_id");

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                let extensions = span.extensions();
                let Some(SpanFields(span_fields)) = extensions.get::<SpanFields>() else {
                    continue;
                };
                for (key, value) in span_fields {
                    match key.as_str() {
                        "creator_id" if record.creator_id.is_none() => {
                            record.creator_id = value.as_str().map(str::to_string);
                        }
                        "binding_id" if record.binding_id.is_none() => {
                            record.binding_id = value.as_str().map(str::to_string);
                        }
                        "creator_id" | "binding_id" => {}
                        _ => {
                            fields.entry(key.clone()).or_insert_with(|| value.clone());
                        }
                    }
                }
            }
        }
        record.context = fields;

        if let Some(forwarder) = self.state.forwarder.read().as_ref()
            && record.severity >= forwarder.min_severity
            && forwarder.tx.try_send(record.clone()).is_err()
        {
            self.state.dropped.fetch_add(1, Ordering::Relaxed);
        }

        let _ = self.broadcast.send(record);
    }
}

/// Route records to `sink` through a bounded channel and spawn the writer.
///
/// The writer also purges records older than `retention` once a day.
pub(crate) fn attach_sink(
    state: &Arc<DiagnosticsState>,
    sink: Arc<dyn DiagnosticsSink>,
    min_severity: Severity,
    retention: Duration,
    cancel_token: CancellationToken,
) {
    let (tx, rx) = mpsc::channel(DIAGNOSTICS_CHANNEL_CAPACITY);
    *state.forwarder.write() = Some(Forwarder { tx, min_severity });
    tokio::spawn(run_writer(sink, rx, retention, cancel_token));
}

async fn run_writer(
    sink: Arc<dyn DiagnosticsSink>,
    mut rx: mpsc::Receiver<DiagnosticRecord>,
    retention: Duration,
    cancel_token: CancellationToken,
) {
    let mut purge_timer = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
    purge_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                // Flush what is already queued.
                while let Ok(record) = rx.try_recv() {
                    if let Err(e) = sink.append(&record).await {
                        warn!(target: WRITER_TARGET, error = %e, "Failed to persist diagnostic record");
                        break;
                    }
                }
                debug!(target: WRITER_TARGET, "Diagnostics writer shutting down");
                break;
            }
            record = rx.recv() => {
                let Some(record) = record else { break };
                if let Err(e) = sink.append(&record).await {
                    warn!(target: WRITER_TARGET, error = %e, "Failed to persist diagnostic record");
                }
            }
            _ = purge_timer.tick() => {
                let cutoff = Utc::now()
                    - chrono::TimeDelta::from_std(retention).unwrap_or(chrono::TimeDelta::days(7));
                match sink.purge_before(cutoff).await {
                    Ok(0) => {}
                    Ok(count) => info!(target: WRITER_TARGET, count, "Purged old diagnostic records"),
                    Err(e) => warn!(target: WRITER_TARGET, error = %e, "Failed to purge diagnostic records"),
                }
            }
        }
    }
}
