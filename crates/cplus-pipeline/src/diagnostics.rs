//! Run diagnostics: wall-clock timing and graph counts for each stage.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graph::ActivityGraph;
use crate::pipeline::Stage;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Stages reached, in order. A failed or cancelled run stops short.
    pub stages: Vec<StageDiagnostics>,
    /// Wall-clock time of the whole run.
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Stage name.
    pub name: String,
    /// Wall-clock time spent producing this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Whether the stage's work ran or was disabled.
    pub applied: bool,
    /// Activities holding a raster after this stage.
    pub activities_with_layers: usize,
    /// Distinct pathways in the graph.
    pub pathway_count: usize,
}

impl StageDiagnostics {
    /// Snapshot `stage` after it took `duration` to produce.
    #[must_use]
    pub fn capture(stage: &Stage, duration: Duration) -> Self {
        let graph = stage.graph();
        Self {
            name: stage.name().to_owned(),
            duration,
            applied: stage.applied(),
            activities_with_layers: activities_with_layers(graph),
            pathway_count: graph.distinct_pathways().len(),
        }
    }
}

fn activities_with_layers(graph: &ActivityGraph) -> usize {
    graph
        .activity_ids()
        .filter(|&id| graph.activity(id).path.is_some())
        .count()
}

impl RunDiagnostics {
    /// Append a stage record.
    pub fn record(&mut self, stage: StageDiagnostics) {
        self.stages.push(stage);
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Scenario Analysis Diagnostics\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration)
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<20} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(72));

        let total_ms = duration_ms(self.total_duration);
        for stage in &self.stages {
            let ms = duration_ms(stage.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = if stage.applied {
                format!(
                    "activities with layers={} pathways={}",
                    stage.activities_with_layers, stage.pathway_count
                )
            } else {
                "skipped".to_owned()
            };
            lines.push(format!("{:<20} {ms:>8.3}ms {pct:>9.1}%  {details}", stage.name));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
