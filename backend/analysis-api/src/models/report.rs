use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::feature::FeatureId;
use super::plan::{ContentArea, Difficulty, EvaluationArea, LearningStage};

/// The five report groups. Membership is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GroupKey {
    #[serde(rename = "G1_concept_representation")]
    ConceptRepresentation,
    #[serde(rename = "G2_procedural_logic")]
    ProceduralLogic,
    #[serde(rename = "G3_metacognition")]
    Metacognition,
    #[serde(rename = "G4_persistence_pace")]
    PersistencePace,
    #[serde(rename = "G5_strategy_resource")]
    StrategyResource,
}

impl GroupKey {
    pub const ALL: [GroupKey; 5] = [
        GroupKey::ConceptRepresentation,
        GroupKey::ProceduralLogic,
        GroupKey::Metacognition,
        GroupKey::PersistencePace,
        GroupKey::StrategyResource,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKey::ConceptRepresentation => "G1_concept_representation",
            GroupKey::ProceduralLogic => "G2_procedural_logic",
            GroupKey::Metacognition => "G3_metacognition",
            GroupKey::PersistencePace => "G4_persistence_pace",
            GroupKey::StrategyResource => "G5_strategy_resource",
        }
    }

    pub fn members(&self) -> &'static [FeatureId] {
        match self {
            GroupKey::ConceptRepresentation => &[
                FeatureId::ConceptUnderstanding,
                FeatureId::RepresentationConversion,
                FeatureId::ConceptConnection,
                FeatureId::PriorKnowledgeUtilization,
                FeatureId::MisconceptionRisk,
                FeatureId::ExplanationClarity,
            ],
            GroupKey::ProceduralLogic => &[
                FeatureId::ProcedureAccuracy,
                FeatureId::LogicalConsistency,
                FeatureId::StepCompleteness,
                FeatureId::CalculationAccuracy,
                FeatureId::StepIntervalVariability,
                FeatureId::UnnecessaryInput,
                FeatureId::SolutionStructure,
                FeatureId::VerificationBehavior,
                FeatureId::NotationAccuracy,
            ],
            GroupKey::Metacognition => &[
                FeatureId::InitialDeliberation,
                FeatureId::FirstHintTiming,
                FeatureId::PostCompletionReflection,
                FeatureId::SelfCorrectionFrequency,
                FeatureId::MetacognitiveAlignment,
                FeatureId::HintResilience,
                FeatureId::PostTriggerLatency,
            ],
            GroupKey::PersistencePace => &[
                FeatureId::PreGiveUpChurn,
                FeatureId::LearningTrend,
                FeatureId::ResponseSpeedChange,
                FeatureId::InputRhythmInstability,
                FeatureId::LongestInactivity,
            ],
            GroupKey::StrategyResource => &[
                FeatureId::HintTypeSkew,
                FeatureId::StrategySwitching,
                FeatureId::ResourceDependence,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSummary {
    pub number: u32,
    pub problem_id: String,
    pub learning_stage: Option<LearningStage>,
    pub evaluation_area: Option<EvaluationArea>,
    pub content_area: Option<ContentArea>,
    pub difficulty: Option<Difficulty>,
    /// From the earliest attempt; false when the problem was never attempted.
    pub is_correct: bool,
}

/// Everything a report narrator receives for one problem set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportInput {
    pub problem_set_id: String,
    pub user_id: String,
    pub user_grade: Option<String>,
    pub feature_values: BTreeMap<String, Option<f64>>,
    pub group_scores: BTreeMap<GroupKey, f64>,
    pub questions: Vec<QuestionSummary>,
}
