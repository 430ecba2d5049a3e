//! Pipeline run and check result types.

use serde::Serialize;
use tributary_types::metric::{StageKind, StageSnapshot};

/// Counters of one stage at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub kind: StageKind,
    #[serde(flatten)]
    pub snapshot: StageSnapshot,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub pipeline: String,
    pub duration_secs: f64,
    /// `true` when the run ended through a stop request rather than input end.
    pub stopped: bool,
    pub stages: Vec<StageReport>,
}

impl PipelineResult {
    /// Parts accepted by the output stage.
    pub fn parts_written(&self) -> u64 {
        self.stages
            .iter()
            .filter(|s| s.kind == StageKind::Output)
            .map(|s| s.snapshot.parts_sent)
            .sum()
    }

    /// Parts produced by the input stage.
    pub fn parts_read(&self) -> u64 {
        self.stages
            .iter()
            .filter(|s| s.kind == StageKind::Input)
            .map(|s| s.snapshot.parts_sent)
            .sum()
    }
}

/// Outcome of resolving one configured component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentCheck {
    pub role: StageKind,
    pub name: String,
    /// `None` when the component was built successfully.
    pub error: Option<String>,
}

impl ComponentCheck {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a pipeline check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub pipeline: String,
    pub components: Vec<ComponentCheck>,
}

impl CheckResult {
    pub fn is_ok(&self) -> bool {
        self.components.iter().all(ComponentCheck::is_ok)
    }
}
