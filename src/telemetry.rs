//! Structured start/success/failure event emission.
//!
//! Every significant operation is wrapped in a span that emits an
//! `<op>_start` event, runs the work, and emits `<op>_success` or
//! `<op>_failure` with the measured wall-clock duration. Failure events are
//! a side effect of propagation, never a substitute for it: the wrapped
//! result is always returned unchanged.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Category an event belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TelemetryCategory {
    /// Machine lifecycle and setup operations.
    Machine,
    /// Git-forge interactions.
    Forge,
    /// Provider backend operations.
    Provider,
    /// Remote-shell transport operations.
    Ssh,
}

impl TelemetryCategory {
    /// Returns the lowercase category name used in event streams.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Machine => "machine",
            Self::Forge => "forge",
            Self::Provider => "provider",
            Self::Ssh => "ssh",
        }
    }
}

/// One emitted telemetry event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TelemetryEvent {
    /// Category the event belongs to.
    pub category: TelemetryCategory,
    /// Event name, `<operation>_start`, `<operation>_success`, or
    /// `<operation>_failure`.
    pub name: String,
    /// Contextual metadata. Always carries at least `tenant_id`; success
    /// and failure events add operation-specific keys.
    pub metadata: BTreeMap<String, String>,
    /// Elapsed wall-clock time, present on success and failure events.
    pub duration: Option<Duration>,
}

/// Destination for telemetry events. Emission is infallible; a sink that
/// cannot deliver must drop rather than disturb the wrapped operation.
pub trait TelemetrySink: Send + Sync {
    /// Delivers one event.
    fn emit(&self, event: &TelemetryEvent);
}

/// Default sink that forwards events to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn emit(&self, event: &TelemetryEvent) {
        let duration_ms = event
            .duration
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        let metadata = render_metadata(&event.metadata);
        if event.name.ends_with("_failure") {
            tracing::warn!(
                category = event.category.as_str(),
                event = %event.name,
                duration_ms,
                %metadata,
                "telemetry event"
            );
        } else {
            tracing::info!(
                category = event.category.as_str(),
                event = %event.name,
                duration_ms,
                %metadata,
                "telemetry event"
            );
        }
    }
}

fn render_metadata(metadata: &BTreeMap<String, String>) -> String {
    metadata
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// In-flight span for one operation. Emits the `_start` event on
/// construction and exactly one terminal event when consumed.
#[derive(Debug)]
pub struct OperationSpan<'a, S: TelemetrySink> {
    sink: &'a S,
    category: TelemetryCategory,
    operation: String,
    metadata: BTreeMap<String, String>,
    started: Instant,
}

impl<'a, S: TelemetrySink> OperationSpan<'a, S> {
    /// Emits `<operation>_start` and begins the duration measurement.
    pub fn start(
        sink: &'a S,
        category: TelemetryCategory,
        operation: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        let span = Self {
            sink,
            category,
            operation: operation.into(),
            metadata,
            started: Instant::now(),
        };
        span.sink.emit(&TelemetryEvent {
            category: span.category,
            name: format!("{}_start", span.operation),
            metadata: span.metadata.clone(),
            duration: None,
        });
        span
    }

    /// Emits `<operation>_success` with the elapsed duration plus any
    /// operation-specific metadata.
    pub fn success(self, extra: impl IntoIterator<Item = (String, String)>) {
        let mut metadata = self.metadata;
        metadata.extend(extra);
        self.sink.emit(&TelemetryEvent {
            category: self.category,
            name: format!("{}_success", self.operation),
            metadata,
            duration: Some(self.started.elapsed()),
        });
    }

    /// Emits `<operation>_failure` with the elapsed duration and the error
    /// rendered under the `error` key.
    pub fn failure(self, error: &dyn Display) {
        let mut metadata = self.metadata;
        metadata.insert("error".to_owned(), error.to_string());
        self.sink.emit(&TelemetryEvent {
            category: self.category,
            name: format!("{}_failure", self.operation),
            metadata,
            duration: Some(self.started.elapsed()),
        });
    }
}

/// Wraps a unit of work in a telemetry span.
///
/// Emits `<operation>_start`, awaits `work`, then emits the matching
/// success or failure event. The result is propagated unchanged.
///
/// # Errors
///
/// Returns whatever error `work` produced; emission never fails.
pub async fn span<S, T, E, Fut>(
    sink: &S,
    category: TelemetryCategory,
    operation: impl Into<String>,
    metadata: BTreeMap<String, String>,
    work: Fut,
) -> Result<T, E>
where
    S: TelemetrySink,
    E: Display,
    Fut: Future<Output = Result<T, E>>,
{
    let op_span = OperationSpan::start(sink, category, operation, metadata);
    match work.await {
        Ok(value) => {
            op_span.success([]);
            Ok(value)
        }
        Err(error) => {
            op_span.failure(&error);
            Err(error)
        }
    }
}

/// Builds the baseline metadata map from key/value pairs, skipping absent
/// values.
#[must_use]
pub fn metadata<'a>(
    pairs: impl IntoIterator<Item = (&'a str, Option<String>)>,
) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .filter_map(|(key, value)| value.map(|present| (key.to_owned(), present)))
        .collect()
}
