//! Chapter-processing buffer state.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use super::StepStatus;

/// Chapter pipeline phases, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterPhase {
    #[default]
    PreAnalysis,
    ContentAnalysis,
    ContextIntegration,
    PostProcessing,
    Finalization,
}

impl ChapterPhase {
    pub fn next(self) -> Option<Self> {
        match self {
            ChapterPhase::PreAnalysis => Some(ChapterPhase::ContentAnalysis),
            ChapterPhase::ContentAnalysis => Some(ChapterPhase::ContextIntegration),
            ChapterPhase::ContextIntegration => Some(ChapterPhase::PostProcessing),
            ChapterPhase::PostProcessing => Some(ChapterPhase::Finalization),
            ChapterPhase::Finalization => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChapterPhase::PreAnalysis => "pre_analysis",
            ChapterPhase::ContentAnalysis => "content_analysis",
            ChapterPhase::ContextIntegration => "context_integration",
            ChapterPhase::PostProcessing => "post_processing",
            ChapterPhase::Finalization => "finalization",
        }
    }
}

impl fmt::Display for ChapterPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChapterComponent {
    TextAnalyzer,
    CharacterExtractor,
    ContextGenerator,
    EmotionalAnalyzer,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentState {
    pub status: StepStatus,
    #[serde(default)]
    pub updated_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStates {
    pub text_analyzer: ComponentState,
    pub character_extractor: ComponentState,
    pub context_generator: ComponentState,
    pub emotional_analyzer: ComponentState,
}

impl ComponentStates {
    pub fn get(&self, component: ChapterComponent) -> &ComponentState {
        match component {
            ChapterComponent::TextAnalyzer => &self.text_analyzer,
            ChapterComponent::CharacterExtractor => &self.character_extractor,
            ChapterComponent::ContextGenerator => &self.context_generator,
            ChapterComponent::EmotionalAnalyzer => &self.emotional_analyzer,
        }
    }

    fn get_mut(&mut self, component: ChapterComponent) -> &mut ComponentState {
        match component {
            ChapterComponent::TextAnalyzer => &mut self.text_analyzer,
            ChapterComponent::CharacterExtractor => &mut self.character_extractor,
            ChapterComponent::ContextGenerator => &mut self.context_generator,
            ChapterComponent::EmotionalAnalyzer => &mut self.emotional_analyzer,
        }
    }

    pub fn all_completed(&self) -> bool {
        [
            &self.text_analyzer,
            &self.character_extractor,
            &self.context_generator,
            &self.emotional_analyzer,
        ]
        .iter()
        .all(|state| state.status == StepStatus::Completed)
    }
}

/// Per-dimension quality scores in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAssurance {
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

impl QualityAssurance {
    /// Mean of all recorded scores, if any.
    pub fn overall(&self) -> Option<f64> {
        if self.scores.is_empty() {
            return None;
        }
        Some(self.scores.values().sum::<f64>() / self.scores.len() as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterProcessingState {
    pub chapter_number: u32,
    pub phase: ChapterPhase,
    #[serde(default)]
    pub components: ComponentStates,
    #[serde(default)]
    pub integration_results: BTreeMap<String, Value>,
    #[serde(default)]
    pub quality: QualityAssurance,
}

impl ChapterProcessingState {
    pub fn new(chapter_number: u32) -> Self {
        Self {
            chapter_number,
            phase: ChapterPhase::PreAnalysis,
            components: ComponentStates::default(),
            integration_results: BTreeMap::new(),
            quality: QualityAssurance::default(),
        }
    }

    /// Move to the next phase. Returns the new phase, or `None` once finalized.
    pub fn advance_phase(&mut self) -> Option<ChapterPhase> {
        let next = self.phase.next()?;
        self.phase = next;
        Some(next)
    }

    pub fn set_component_status(
        &mut self,
        component: ChapterComponent,
        status: StepStatus,
        error: Option<String>,
        now: OffsetDateTime,
    ) {
        let state = self.components.get_mut(component);
        state.status = status;
        state.error = error;
        state.updated_at = Some(now);
    }

    pub fn component(&self, component: ChapterComponent) -> &ComponentState {
        self.components.get(component)
    }

    pub fn record_integration_result(&mut self, key: impl Into<String>, value: Value) {
        self.integration_results.insert(key.into(), value);
    }

    /// Record a quality score, clamped into `[0, 1]`. NaN scores are ignored.
    pub fn set_quality_score(&mut self, dimension: impl Into<String>, score: f64) {
        if score.is_nan() {
            return;
        }
        self.quality
            .scores
            .insert(dimension.into(), score.clamp(0.0, 1.0));
    }

    pub fn is_finalized(&self) -> bool {
        self.phase == ChapterPhase::Finalization
    }
}
