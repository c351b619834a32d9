//! Memory-integration buffer state: consolidation of records between the
//! short, mid and long-term memory layers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::StepStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    ShortToMid,
    MidToLong,
    CrossLayer,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    Short,
    Mid,
    Long,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub layer: MemoryLayer,
    pub data_type: String,
    #[serde(default)]
    pub ids: Vec<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    KeepExisting,
    PreferIncoming,
    Merge,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub subject: String,
    pub strategy: ResolutionStrategy,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStep {
    pub name: String,
    /// Name of the consolidation function applied by this step.
    pub function: String,
    pub status: StepStatus,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub conflict_resolutions: Vec<ConflictResolution>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityCheck {
    Consistency,
    Completeness,
    Accuracy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityChecks {
    pub consistency: bool,
    pub completeness: bool,
    pub accuracy: bool,
}

impl QualityChecks {
    pub fn all_passed(&self) -> bool {
        self.consistency && self.completeness && self.accuracy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackSnapshot {
    /// Step the snapshot was taken before.
    pub step: String,
    pub taken_at: OffsetDateTime,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryIntegrationState {
    pub integration_kind: IntegrationKind,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub steps: Vec<IntegrationStep>,
    #[serde(default)]
    pub quality_checks: QualityChecks,
    #[serde(default)]
    pub rollback: Vec<RollbackSnapshot>,
}

impl MemoryIntegrationState {
    pub fn new(integration_kind: IntegrationKind, source: SourceDescriptor) -> Self {
        Self {
            integration_kind,
            source,
            steps: Vec::new(),
            quality_checks: QualityChecks::default(),
            rollback: Vec::new(),
        }
    }

    pub fn add_step(
        &mut self,
        name: impl Into<String>,
        function: impl Into<String>,
        inputs: Vec<String>,
    ) -> bool {
        let name = name.into();
        if self.step(&name).is_some() {
            return false;
        }
        self.steps.push(IntegrationStep {
            name,
            function: function.into(),
            status: StepStatus::Pending,
            inputs,
            outputs: Vec::new(),
            conflict_resolutions: Vec::new(),
            error: None,
        });
        true
    }

    pub fn step(&self, name: &str) -> Option<&IntegrationStep> {
        self.steps.iter().find(|step| step.name == name)
    }

    fn step_mut(&mut self, name: &str) -> Option<&mut IntegrationStep> {
        self.steps.iter_mut().find(|step| step.name == name)
    }

    pub fn start_step(&mut self, name: &str) -> bool {
        self.step_mut(name)
            .map(|step| step.status = StepStatus::Running)
            .is_some()
    }

    pub fn complete_step(&mut self, name: &str, outputs: Vec<String>) -> bool {
        self.step_mut(name)
            .map(|step| {
                step.status = StepStatus::Completed;
                step.outputs = outputs;
                step.error = None;
            })
            .is_some()
    }

    pub fn fail_step(&mut self, name: &str, error: impl Into<String>) -> bool {
        let error = error.into();
        self.step_mut(name)
            .map(|step| {
                step.status = StepStatus::Failed;
                step.error = Some(error);
            })
            .is_some()
    }

    pub fn record_conflict(&mut self, name: &str, resolution: ConflictResolution) -> bool {
        self.step_mut(name)
            .map(|step| step.conflict_resolutions.push(resolution))
            .is_some()
    }

    pub fn set_quality_check(&mut self, check: QualityCheck, passed: bool) {
        match check {
            QualityCheck::Consistency => self.quality_checks.consistency = passed,
            QualityCheck::Completeness => self.quality_checks.completeness = passed,
            QualityCheck::Accuracy => self.quality_checks.accuracy = passed,
        }
    }

    /// Save the pre-step state so a failed consolidation can be undone.
    pub fn push_rollback(&mut self, step: impl Into<String>, data: Value, now: OffsetDateTime) {
        self.rollback.push(RollbackSnapshot {
            step: step.into(),
            taken_at: now,
            data,
        });
    }

    pub fn latest_rollback(&self) -> Option<&RollbackSnapshot> {
        self.rollback.last()
    }

    /// Remove and return the most recent rollback snapshot.
    pub fn pop_rollback(&mut self) -> Option<RollbackSnapshot> {
        self.rollback.pop()
    }

    pub fn total_conflicts(&self) -> usize {
        self.steps
            .iter()
            .map(|step| step.conflict_resolutions.len())
            .sum()
    }
}
