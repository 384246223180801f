//! Events pushed from a running analysis to its caller, plus the
//! cancellation token and the per-call progress handle.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::state::AnalysisState;

/// Log channel every pipeline message is tagged with.
pub const LOG_CHANNEL: &str = "cplus";

/// Severity of a log or info event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Normal progress information.
    #[default]
    Info,
    /// Something was skipped or fell back.
    Warning,
    /// The run is aborting.
    Critical,
}

/// Something the caller may want to show or record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Short status line for the current step.
    Status(String),
    /// User-facing notification.
    Info {
        /// Message text.
        message: String,
        /// Severity.
        level: LogLevel,
    },
    /// Progress of the current engine call, 0 to 100.
    Progress(f64),
    /// Structured log line.
    Log {
        /// Message text.
        message: String,
        /// Log channel.
        channel: String,
        /// Severity.
        level: LogLevel,
        /// Whether the caller should surface the message.
        notify: bool,
    },
    /// The orchestrator entered a new state.
    StateChanged(AnalysisState),
    /// The run stopped before finishing.
    Cancelled {
        /// Whether it stopped because of an error rather than a request.
        with_error: bool,
    },
}

/// Receiver of pipeline events. Sending must not block the pipeline.
pub trait EventSink: Send {
    /// Deliver one event.
    fn emit(&self, event: PipelineEvent);
}

impl EventSink for crossbeam::channel::Sender<PipelineEvent> {
    fn emit(&self, event: PipelineEvent) {
        // A full or disconnected channel drops the event.
        let _ = self.try_send(event);
    }
}

impl<F> EventSink for F
where
    F: Fn(PipelineEvent) + Send,
{
    fn emit(&self, event: PipelineEvent) {
        self(event);
    }
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Shared flag used to request cooperative cancellation. Clones observe
/// the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Engine calls already running still finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress handle handed to a single engine call.
///
/// Values are clamped to `0..=100` and never move backwards. Once the
/// token is cancelled no further progress is reported.
pub struct Feedback<'a> {
    events: &'a dyn EventSink,
    token: &'a CancellationToken,
    last: Cell<f64>,
}

impl<'a> Feedback<'a> {
    /// Progress handle reporting to `events`.
    #[must_use]
    pub fn new(events: &'a dyn EventSink, token: &'a CancellationToken) -> Self {
        Self {
            events,
            token,
            last: Cell::new(0.0),
        }
    }

    /// Report progress in percent.
    pub fn set_progress(&self, percent: f64) {
        if self.token.is_cancelled() || percent.is_nan() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent < self.last.get() {
            return;
        }
        self.last.set(percent);
        self.events.emit(PipelineEvent::Progress(percent));
    }

    /// Whether the caller has asked to stop. Engines may poll this
    /// between chunks of work but are not required to.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
