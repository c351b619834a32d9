//! AI-processing buffer state: a named, ordered pipeline of steps feeding an
//! output accumulator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::StepStatus;
use crate::buffer::checksum::{Checksum, fingerprint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProcessingKind {
    TextAnalysis,
    EmotionalArc,
    CharacterExtraction,
    ContextGeneration,
    PromptAssembly,
    Summarization,
}

/// What went into the computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDescriptor {
    pub data_type: String,
    pub size_bytes: u64,
    pub checksum: Checksum,
}

impl InputDescriptor {
    /// Describe an input value by type name, encoded size and checksum.
    pub fn describe<T: Serialize + ?Sized>(
        data_type: impl Into<String>,
        input: &T,
    ) -> Result<Self, serde_json::Error> {
        let print = fingerprint(input)?;
        Ok(Self {
            data_type: data_type.into(),
            size_bytes: print.size_bytes,
            checksum: print.checksum,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStep {
    pub name: String,
    pub status: StepStatus,
    #[serde(default)]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub intermediate_results: Map<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProcessingStep {
    fn new(name: String) -> Self {
        Self {
            name,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            intermediate_results: Map::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputAccumulator {
    /// Step results keyed by step name.
    #[serde(default)]
    pub partial_results: Map<String, Value>,
    #[serde(default)]
    pub final_result: Option<Value>,
    #[serde(default)]
    pub quality_metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_attempt_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiProcessingState {
    pub processing_kind: AiProcessingKind,
    pub input: InputDescriptor,
    #[serde(default)]
    pub steps: Vec<ProcessingStep>,
    #[serde(default)]
    pub output: OutputAccumulator,
    #[serde(default)]
    pub retry: RetryState,
}

impl AiProcessingState {
    pub fn new(processing_kind: AiProcessingKind, input: InputDescriptor) -> Self {
        Self {
            processing_kind,
            input,
            steps: Vec::new(),
            output: OutputAccumulator::default(),
            retry: RetryState::default(),
        }
    }

    /// Append a pending step. Step names are unique; returns false on a duplicate.
    pub fn add_step(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.step(&name).is_some() {
            return false;
        }
        self.steps.push(ProcessingStep::new(name));
        true
    }

    pub fn step(&self, name: &str) -> Option<&ProcessingStep> {
        self.steps.iter().find(|step| step.name == name)
    }

    fn step_mut(&mut self, name: &str) -> Option<&mut ProcessingStep> {
        self.steps.iter_mut().find(|step| step.name == name)
    }

    pub fn start_step(&mut self, name: &str, now: OffsetDateTime) -> bool {
        let Some(step) = self.step_mut(name) else {
            return false;
        };
        step.status = StepStatus::Running;
        step.started_at = Some(now);
        step.error = None;
        true
    }

    /// Mark a step completed and fold its result into the accumulator.
    ///
    /// Object results are merged key-by-key into the step's intermediate
    /// results; any other value is stored under `"value"`.
    pub fn complete_step(&mut self, name: &str, result: Value, now: OffsetDateTime) -> bool {
        let Some(step) = self.step_mut(name) else {
            return false;
        };

        step.status = StepStatus::Completed;
        step.started_at.get_or_insert(now);
        step.completed_at = Some(now);
        step.error = None;
        match &result {
            Value::Object(map) => step
                .intermediate_results
                .extend(map.iter().map(|(k, v)| (k.clone(), v.clone()))),
            other => {
                step.intermediate_results
                    .insert("value".to_string(), other.clone());
            }
        }

        self.output.partial_results.insert(name.to_string(), result);
        true
    }

    pub fn fail_step(&mut self, name: &str, error: impl Into<String>, now: OffsetDateTime) -> bool {
        let error = error.into();
        let Some(step) = self.step_mut(name) else {
            return false;
        };

        step.status = StepStatus::Failed;
        step.completed_at = Some(now);
        step.error = Some(error.clone());

        self.retry.attempts += 1;
        self.retry.last_error = Some(error);
        self.retry.last_attempt_at = Some(now);
        true
    }

    /// Store the final result. Non-finite metrics are discarded.
    pub fn finalize(&mut self, result: Value, quality_metrics: BTreeMap<String, f64>) {
        self.output.final_result = Some(result);
        self.output.quality_metrics.extend(
            quality_metrics
                .into_iter()
                .filter(|(_, value)| value.is_finite()),
        );
    }

    /// True once every step has reached a terminal status without failing.
    pub fn is_complete(&self) -> bool {
        !self.steps.is_empty()
            && self
                .steps
                .iter()
                .all(|step| matches!(step.status, StepStatus::Completed | StepStatus::Skipped))
    }

    pub fn pending_steps(&self) -> impl Iterator<Item = &ProcessingStep> {
        self.steps.iter().filter(|step| !step.status.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn state() -> AiProcessingState {
        let input = InputDescriptor::describe("chapter_text", "It was a dark and stormy night.")
            .expect("describe input");
        AiProcessingState::new(AiProcessingKind::TextAnalysis, input)
    }

    #[test]
    fn completing_a_step_records_intermediate_results() {
        let now = datetime!(2024-02-02 10:00 UTC);
        let mut state = state();
        assert!(state.add_step("extract"));
        assert!(state.start_step("extract", now));
        assert!(state.complete_step("extract", json!({"score": 0.8}), now));

        let step = state.step("extract").expect("step");
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.intermediate_results.get("score"), Some(&json!(0.8)));
        assert_eq!(
            state.output.partial_results.get("extract"),
            Some(&json!({"score": 0.8}))
        );
        assert!(state.is_complete());
    }

    #[test]
    fn duplicate_and_unknown_steps_are_rejected() {
        let now = datetime!(2024-02-02 10:00 UTC);
        let mut state = state();
        assert!(state.add_step("tokenize"));
        assert!(!state.add_step("tokenize"));
        assert!(!state.complete_step("missing", json!(1), now));
    }

    #[test]
    fn failures_feed_retry_bookkeeping() {
        let now = datetime!(2024-02-02 10:00 UTC);
        let mut state = state();
        state.add_step("score");
        state.add_step("summarize");
        assert!(state.fail_step("score", "model timed out", now));

        assert_eq!(state.retry.attempts, 1);
        assert_eq!(state.retry.last_error.as_deref(), Some("model timed out"));
        assert!(!state.is_complete());
        assert_eq!(state.pending_steps().count(), 1);
    }

    #[test]
    fn scalar_results_are_wrapped() {
        let now = datetime!(2024-02-02 10:00 UTC);
        let mut state = state();
        state.add_step("count");
        state.complete_step("count", json!(42), now);
        assert_eq!(
            state.step("count").expect("step").intermediate_results.get("value"),
            Some(&json!(42))
        );
    }

    #[test]
    fn finalize_discards_non_finite_metrics() {
        let mut state = state();
        let metrics = BTreeMap::from([
            ("coherence".to_string(), f64::NAN),
            ("fluency".to_string(), f64::INFINITY),
            ("relevance".to_string(), 0.9),
        ]);

        state.finalize(json!({"text": "done"}), metrics);

        assert_eq!(
            state.output.quality_metrics,
            BTreeMap::from([("relevance".to_string(), 0.9)])
        );
        assert_eq!(state.output.final_result, Some(json!({"text": "done"})));
    }

    #[test]
    fn input_descriptor_is_stable() {
        let a = InputDescriptor::describe("text", "same").expect("describe");
        let b = InputDescriptor::describe("text", "same").expect("describe");
        assert_eq!(a, b);
    }
}
