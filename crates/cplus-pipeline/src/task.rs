//! The scenario analysis task: runs the whole pipeline once and reports
//! how it ended.
//!
//! A task is single-use. It consumes its configuration and engine, and
//! hands the engine back in the [`TaskReport`] so the layers it produced
//! can be inspected or saved.

use std::thread::JoinHandle;
use std::time::Instant;

use crate::config::TaskConfig;
use crate::context::AnalysisContext;
use crate::diagnostics::{RunDiagnostics, StageDiagnostics};
use crate::engine::ProcessingEngine;
use crate::error::{StageError, error_chain};
use crate::events::{CancellationToken, EventSink, PipelineEvent};
use crate::pipeline::{Advance, Pipeline, Stage};
use crate::state::AnalysisState;
use crate::types::ScenarioResult;

/// Name of the worker thread started by [`ScenarioAnalysisTask::spawn`].
pub const WORKER_THREAD_NAME: &str = "cplus-analysis";

/// How a run ended.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The final ranking was produced.
    Succeeded(ScenarioResult),
    /// The cancellation token was observed.
    Cancelled,
    /// A stage failed.
    Failed(StageError),
}

impl TaskOutcome {
    /// The scenario result, if the run succeeded.
    #[must_use]
    pub const fn result(&self) -> Option<&ScenarioResult> {
        match self {
            Self::Succeeded(result) => Some(result),
            Self::Cancelled | Self::Failed(_) => None,
        }
    }
}

/// Everything a finished run hands back.
#[derive(Debug)]
pub struct TaskReport<E> {
    /// How the run ended.
    pub outcome: TaskOutcome,
    /// Terminal orchestrator state.
    pub state: AnalysisState,
    /// Per-stage timing.
    pub diagnostics: RunDiagnostics,
    /// The engine, holding every layer the run produced.
    pub engine: E,
}

/// One scenario analysis, ready to run.
pub struct ScenarioAnalysisTask<E> {
    config: TaskConfig,
    engine: E,
    events: Box<dyn EventSink>,
    token: CancellationToken,
}

impl<E: ProcessingEngine> ScenarioAnalysisTask<E> {
    /// A task reporting to `events`, with a fresh cancellation token.
    pub fn new(config: TaskConfig, engine: E, events: impl EventSink + 'static) -> Self {
        Self {
            config,
            engine,
            events: Box::new(events),
            token: CancellationToken::new(),
        }
    }

    /// Poll `token` instead of the task's own.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// The token this task polls. Cancel a clone of it to stop the run
    /// at the next stage or layer boundary.
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run the analysis on the calling thread.
    pub fn run(self) -> TaskReport<E> {
        let started = Instant::now();
        let mut ctx = AnalysisContext::new(self.config, self.engine, self.events, self.token);
        let mut diagnostics = RunDiagnostics::default();

        let outcome = match drive(&mut ctx, &mut diagnostics) {
            Ok(result) => {
                settle(&mut ctx, AnalysisState::Succeeded);
                ctx.log("Finished from the main task");
                TaskOutcome::Succeeded(result)
            }
            Err(err) if err.is_cancellation() => {
                let message = "Processing has been cancelled by the user.";
                ctx.status(message);
                ctx.log(message);
                ctx.emit(PipelineEvent::Cancelled { with_error: false });
                settle(&mut ctx, AnalysisState::Cancelled);
                TaskOutcome::Cancelled
            }
            Err(err) => {
                let message = format!("Problem in running scenario analysis: {err}");
                ctx.status(message.clone());
                ctx.critical(message);
                ctx.log(error_chain(&err));
                ctx.emit(PipelineEvent::Cancelled { with_error: true });
                settle(&mut ctx, AnalysisState::Failed);
                TaskOutcome::Failed(err)
            }
        };
        diagnostics.total_duration = started.elapsed();
        tracing::debug!(state = ?ctx.state(), elapsed = ?diagnostics.total_duration, "task finished");

        TaskReport {
            outcome,
            state: ctx.state(),
            diagnostics,
            engine: ctx.into_engine(),
        }
    }
}

impl<E: ProcessingEngine + Send + 'static> ScenarioAnalysisTask<E> {
    /// Run the analysis on a named worker thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread could not be started.
    pub fn spawn(self) -> std::io::Result<JoinHandle<TaskReport<E>>> {
        std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_owned())
            .spawn(move || self.run())
    }
}

fn drive<E: ProcessingEngine>(
    ctx: &mut AnalysisContext<E>,
    diagnostics: &mut RunDiagnostics,
) -> Result<ScenarioResult, StageError> {
    ctx.config()
        .validate()
        .map_err(|err| StageError::Configuration(err.to_string()))?;

    let mut stage: Stage = Pipeline::new(ctx.config()).into();
    loop {
        let started = Instant::now();
        match stage.advance(ctx)? {
            Advance::Next(next) => {
                diagnostics.record(StageDiagnostics::capture(&next, started.elapsed()));
                stage = next;
            }
            Advance::Complete(done) => {
                stage = done;
                break;
            }
        }
    }
    stage.complete(ctx)
}

fn settle<E: ProcessingEngine>(ctx: &mut AnalysisContext<E>, terminal: AnalysisState) {
    if let Err(err) = ctx.finish(terminal) {
        tracing::error!(%err, "could not record the final task state");
    }
}
