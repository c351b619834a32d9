//! Typed payload shapes held by the specialised buffer stores.

mod ai;
mod chapter;
mod memory;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use ai::{
    AiProcessingKind, AiProcessingState, InputDescriptor, OutputAccumulator, ProcessingStep,
    RetryState,
};
pub use chapter::{
    ChapterComponent, ChapterPhase, ChapterProcessingState, ComponentState, ComponentStates,
    QualityAssurance,
};
pub use memory::{
    ConflictResolution, IntegrationKind, IntegrationStep, MemoryIntegrationState, MemoryLayer,
    QualityCheck, QualityChecks, ResolutionStrategy, RollbackSnapshot, SourceDescriptor,
};

use super::entry::BufferKind;

/// Lifecycle of a single processing or integration step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

/// A payload of any kind, tagged by its kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum BufferPayload {
    AiProcessing(AiProcessingState),
    MemoryIntegration(MemoryIntegrationState),
    ChapterProcessing(ChapterProcessingState),
    Generic(Value),
}

impl BufferPayload {
    pub fn kind(&self) -> BufferKind {
        match self {
            BufferPayload::AiProcessing(_) => BufferKind::AiProcessing,
            BufferPayload::MemoryIntegration(_) => BufferKind::MemoryIntegration,
            BufferPayload::ChapterProcessing(_) => BufferKind::ChapterProcessing,
            BufferPayload::Generic(_) => BufferKind::Generic,
        }
    }
}

impl From<AiProcessingState> for BufferPayload {
    fn from(value: AiProcessingState) -> Self {
        Self::AiProcessing(value)
    }
}

impl From<MemoryIntegrationState> for BufferPayload {
    fn from(value: MemoryIntegrationState) -> Self {
        Self::MemoryIntegration(value)
    }
}

impl From<ChapterProcessingState> for BufferPayload {
    fn from(value: ChapterProcessingState) -> Self {
        Self::ChapterProcessing(value)
    }
}

impl From<Value> for BufferPayload {
    fn from(value: Value) -> Self {
        Self::Generic(value)
    }
}
