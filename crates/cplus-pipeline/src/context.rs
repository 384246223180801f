//! Shared state threaded through every stage of a run.
//!
//! An [`AnalysisContext`] owns the configuration, the processing engine,
//! the event sink, the cancellation token and the orchestrator state.
//! Stage functions borrow it mutably; the activity graph itself travels
//! separately, moved from one stage snapshot to the next.

use crate::config::TaskConfig;
use crate::engine::{OutputTarget, ProcessingEngine};
use crate::error::{EngineError, StageError};
use crate::events::{CancellationToken, EventSink, Feedback, LOG_CHANNEL, LogLevel, PipelineEvent};
use crate::naming;
use crate::state::{AnalysisState, validate_transition};
use crate::types::LayerPath;

/// Configuration, engine and event plumbing for one analysis run.
pub struct AnalysisContext<E> {
    config: TaskConfig,
    engine: E,
    events: Box<dyn EventSink>,
    token: CancellationToken,
    state: AnalysisState,
}

impl<E: ProcessingEngine> AnalysisContext<E> {
    /// Context in the [`AnalysisState::Pending`] state.
    pub fn new(
        config: TaskConfig,
        engine: E,
        events: Box<dyn EventSink>,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            engine,
            events,
            token,
            state: AnalysisState::Pending,
        }
    }

    /// The run configuration.
    #[must_use]
    pub const fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// The processing engine.
    #[must_use]
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Current orchestrator state.
    #[must_use]
    pub const fn state(&self) -> AnalysisState {
        self.state
    }

    /// The cancellation token this run polls.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Give back the engine, with every layer the run produced.
    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Fail with [`StageError::Cancelled`] if cancellation was requested.
    ///
    /// # Errors
    ///
    /// [`StageError::Cancelled`].
    pub fn check_cancelled(&self) -> Result<(), StageError> {
        if self.token.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Move to a running state. Polls the token first, so every stage
    /// boundary is a cancellation point.
    ///
    /// # Errors
    ///
    /// [`StageError::Cancelled`] or [`StageError::InvalidTransition`].
    pub fn enter(&mut self, next: AnalysisState) -> Result<(), StageError> {
        self.check_cancelled()?;
        self.transition(next)
    }

    /// Move to a terminal state. Does nothing if the run already ended.
    ///
    /// # Errors
    ///
    /// [`StageError::InvalidTransition`] when `terminal` is not reachable.
    pub fn finish(&mut self, terminal: AnalysisState) -> Result<(), StageError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        self.transition(terminal)
    }

    fn transition(&mut self, next: AnalysisState) -> Result<(), StageError> {
        validate_transition(self.state, next)?;
        tracing::debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
        self.events.emit(PipelineEvent::StateChanged(next));
        Ok(())
    }

    /// Run one engine primitive with a fresh progress handle.
    ///
    /// # Errors
    ///
    /// [`StageError::Engine`] wrapping the primitive's error.
    pub fn invoke<T, F>(&mut self, operation: &'static str, call: F) -> Result<T, StageError>
    where
        F: FnOnce(&mut E, &Feedback<'_>) -> Result<T, EngineError>,
    {
        let feedback = Feedback::new(&*self.events, &self.token);
        let started = std::time::Instant::now();
        let result = call(&mut self.engine, &feedback);
        tracing::trace!(operation, elapsed = ?started.elapsed(), ok = result.is_ok(), "engine call");
        result.map_err(|source| StageError::Engine { operation, source })
    }

    /// Short status line for the current step.
    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(channel = LOG_CHANNEL, "{message}");
        self.events.emit(PipelineEvent::Status(message));
    }

    /// User-facing notification.
    pub fn info_message(&self, message: impl Into<String>, level: LogLevel) {
        self.events.emit(PipelineEvent::Info {
            message: message.into(),
            level,
        });
    }

    /// Structured log line at info severity.
    pub fn log(&self, message: impl Into<String>) {
        self.log_at(message.into(), LogLevel::Info, false);
    }

    /// Structured log line for something skipped or degraded.
    pub fn warn(&self, message: impl Into<String>) {
        self.log_at(message.into(), LogLevel::Warning, false);
    }

    /// Structured log line for a fatal problem. Also raised as a
    /// critical notification.
    pub fn critical(&self, message: impl Into<String>) {
        let message = message.into();
        self.info_message(message.clone(), LogLevel::Critical);
        self.log_at(message, LogLevel::Critical, true);
    }

    fn log_at(&self, message: String, level: LogLevel, notify: bool) {
        match level {
            LogLevel::Info => tracing::info!(channel = LOG_CHANNEL, "{message}"),
            LogLevel::Warning => tracing::warn!(channel = LOG_CHANNEL, "{message}"),
            LogLevel::Critical => tracing::error!(channel = LOG_CHANNEL, "{message}"),
        }
        self.events.emit(PipelineEvent::Log {
            message,
            channel: LOG_CHANNEL.to_owned(),
            level,
            notify,
        });
    }

    /// Log a stage failure as `Problem {task}, {err}` and hand the error
    /// back. Cancellations pass through silently.
    pub fn problem(&self, task: &str, err: StageError) -> StageError {
        if !err.is_cancellation() {
            self.log(format!("Problem {task}, {err}"));
        }
        err
    }

    /// Emit an arbitrary event.
    pub fn emit(&self, event: PipelineEvent) {
        self.events.emit(event);
    }

    /// The snapping reference layer, when snapping is enabled, a layer is
    /// configured and the engine has it.
    #[must_use]
    pub fn reference_layer(&self) -> Option<LayerPath> {
        let snapping = &self.config.settings.snapping;
        if !snapping.enabled {
            return None;
        }
        snapping
            .reference_layer
            .clone()
            .filter(|path| !path.is_empty() && self.engine.layer_exists(path))
    }

    /// Grid template for an aggregation over `layers`: the reference
    /// layer when there is one, else the first layer.
    #[must_use]
    pub fn template_layer(&self, layers: &[LayerPath]) -> Option<LayerPath> {
        self.reference_layer().or_else(|| layers.first().cloned())
    }

    /// A named file under the scenario directory when `save` is set,
    /// else an engine temporary.
    #[must_use]
    pub fn output_target(&self, save: bool, subdir: &str, name: &str, suffix: &str) -> OutputTarget {
        if save {
            OutputTarget::File(naming::layer_output_path(
                &self.config.settings.base_dir,
                subdir,
                name,
                suffix,
            ))
        } else {
            OutputTarget::Temporary
        }
    }
}

/// Render a request as JSON for a "Used parameters" log line.
pub(crate) fn params<T: serde::Serialize>(request: &T) -> String {
    serde_json::to_string(request).unwrap_or_else(|err| format!("<unserializable: {err}>"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::events::NullSink;
    use crate::memory::{GridSpec, MemoryEngine, Raster};
    use crate::types::{Crs, Extent, NODATA, Scenario};

    fn config() -> TaskConfig {
        TaskConfig::new(Scenario {
            uuid: uuid::Uuid::nil(),
            name: "s".to_owned(),
            description: String::new(),
            extent: Extent::new(0.0, 1.0, 0.0, 1.0),
            activities: Vec::new(),
        })
    }

    fn recording() -> (Arc<Mutex<Vec<PipelineEvent>>>, impl EventSink + 'static) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let events = Arc::clone(&events);
            move |e: PipelineEvent| events.lock().unwrap().push(e)
        };
        (events, sink)
    }

    #[test]
    fn enter_checks_cancellation_and_transitions() {
        let token = CancellationToken::new();
        let (events, sink) = recording();
        let mut ctx = AnalysisContext::new(config(), MemoryEngine::new(), Box::new(sink), token.clone());
        ctx.enter(AnalysisState::Aligning).unwrap();
        assert!(matches!(
            ctx.enter(AnalysisState::Cleaning),
            Err(StageError::InvalidTransition { .. })
        ));
        token.cancel();
        assert!(matches!(ctx.enter(AnalysisState::Weighting), Err(StageError::Cancelled)));
        ctx.finish(AnalysisState::Cancelled).unwrap();
        ctx.finish(AnalysisState::Failed).unwrap();
        assert_eq!(ctx.state(), AnalysisState::Cancelled);
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[
                PipelineEvent::StateChanged(AnalysisState::Aligning),
                PipelineEvent::StateChanged(AnalysisState::Cancelled),
            ]
        );
    }

    #[test]
    fn critical_logs_notify() {
        let (events, sink) = recording();
        let ctx = AnalysisContext::new(config(), MemoryEngine::new(), Box::new(sink), CancellationToken::new());
        ctx.critical("boom");
        let events = events.lock().unwrap();
        assert!(matches!(&events[0], PipelineEvent::Info { level: LogLevel::Critical, .. }));
        assert!(matches!(
            &events[1],
            PipelineEvent::Log { level: LogLevel::Critical, notify: true, .. }
        ));
    }

    #[test]
    fn reference_layer_requires_snapping_and_existing_layer() {
        let mut engine = MemoryEngine::new();
        let grid = GridSpec::new(&Extent::new(0.0, 1.0, 0.0, 1.0), 1.0, 1.0, Crs::default()).unwrap();
        engine.insert_raster("ref.tif", Raster::filled(grid, Some(NODATA), 1.0));

        let mut cfg = config();
        cfg.settings.snapping.reference_layer = Some(LayerPath::from("ref.tif"));
        let ctx = AnalysisContext::new(cfg.clone(), engine.clone(), Box::new(NullSink), CancellationToken::new());
        assert_eq!(ctx.reference_layer(), None);
        let layers = [LayerPath::from("a.tif")];
        assert_eq!(ctx.template_layer(&layers), Some(LayerPath::from("a.tif")));

        cfg.settings.snapping.enabled = true;
        let ctx = AnalysisContext::new(cfg.clone(), engine.clone(), Box::new(NullSink), CancellationToken::new());
        assert_eq!(ctx.template_layer(&layers), Some(LayerPath::from("ref.tif")));

        cfg.settings.snapping.reference_layer = Some(LayerPath::from("missing.tif"));
        let ctx = AnalysisContext::new(cfg, engine, Box::new(NullSink), CancellationToken::new());
        assert_eq!(ctx.reference_layer(), None);
    }

    #[test]
    fn invoke_wraps_engine_errors() {
        let mut ctx =
            AnalysisContext::new(config(), MemoryEngine::new(), Box::new(NullSink), CancellationToken::new());
        let err = ctx
            .invoke("raster statistics", |engine, _| {
                engine.band_statistics(&LayerPath::from("none.tif"), 1)
            })
            .unwrap_err();
        assert!(matches!(err, StageError::Engine { operation: "raster statistics", .. }));
    }
}
