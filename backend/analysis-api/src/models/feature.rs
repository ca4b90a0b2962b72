use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::stats::clamp;

/// The thirty behavioural slots. The slot number is only used as the `fN`
/// persistence key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureId {
    InitialDeliberation,
    ConceptUnderstanding,
    RepresentationConversion,
    ProcedureAccuracy,
    LogicalConsistency,
    StepCompleteness,
    CalculationAccuracy,
    FirstHintTiming,
    HintTypeSkew,
    StepIntervalVariability,
    PostCompletionReflection,
    SelfCorrectionFrequency,
    ConceptConnection,
    PreGiveUpChurn,
    LearningTrend,
    StrategySwitching,
    ResponseSpeedChange,
    UnnecessaryInput,
    MetacognitiveAlignment,
    PriorKnowledgeUtilization,
    HintResilience,
    SolutionStructure,
    MisconceptionRisk,
    ExplanationClarity,
    VerificationBehavior,
    InputRhythmInstability,
    LongestInactivity,
    NotationAccuracy,
    PostTriggerLatency,
    ResourceDependence,
}

impl FeatureId {
    pub const COUNT: usize = 30;

    pub const ALL: [FeatureId; FeatureId::COUNT] = [
        FeatureId::InitialDeliberation,
        FeatureId::ConceptUnderstanding,
        FeatureId::RepresentationConversion,
        FeatureId::ProcedureAccuracy,
        FeatureId::LogicalConsistency,
        FeatureId::StepCompleteness,
        FeatureId::CalculationAccuracy,
        FeatureId::FirstHintTiming,
        FeatureId::HintTypeSkew,
        FeatureId::StepIntervalVariability,
        FeatureId::PostCompletionReflection,
        FeatureId::SelfCorrectionFrequency,
        FeatureId::ConceptConnection,
        FeatureId::PreGiveUpChurn,
        FeatureId::LearningTrend,
        FeatureId::StrategySwitching,
        FeatureId::ResponseSpeedChange,
        FeatureId::UnnecessaryInput,
        FeatureId::MetacognitiveAlignment,
        FeatureId::PriorKnowledgeUtilization,
        FeatureId::HintResilience,
        FeatureId::SolutionStructure,
        FeatureId::MisconceptionRisk,
        FeatureId::ExplanationClarity,
        FeatureId::VerificationBehavior,
        FeatureId::InputRhythmInstability,
        FeatureId::LongestInactivity,
        FeatureId::NotationAccuracy,
        FeatureId::PostTriggerLatency,
        FeatureId::ResourceDependence,
    ];

    /// 1-based slot number.
    pub fn slot(self) -> u8 {
        self as u8 + 1
    }

    pub fn from_slot(slot: u8) -> Option<Self> {
        if slot == 0 {
            return None;
        }
        Self::ALL.get(usize::from(slot) - 1).copied()
    }

    pub fn key(self) -> String {
        format!("f{}", self.slot())
    }

    /// Accepts `"f3"`, `"F3"` and `"3"`. Anything else is rejected.
    pub fn parse_key(key: &str) -> Option<Self> {
        let key = key.trim();
        let digits = key
            .strip_prefix('f')
            .or_else(|| key.strip_prefix('F'))
            .unwrap_or(key);
        digits.parse::<u8>().ok().and_then(Self::from_slot)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.slot())
    }
}

/// Sparse slot values. A missing entry means "not computable", never zero.
/// Every stored value is finite and inside `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    values: BTreeMap<FeatureId, f64>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: FeatureId) -> Option<f64> {
        self.values.get(&id).copied()
    }

    pub fn set(&mut self, id: FeatureId, value: f64) {
        self.values.insert(id, clamp(value));
    }

    pub fn set_opt(&mut self, id: FeatureId, value: Option<f64>) {
        match value {
            Some(v) => self.set(id, v),
            None => {
                self.values.remove(&id);
            }
        }
    }

    /// Overwrites only the supplied slots. An explicit `None` clears a slot.
    pub fn apply_supplied(&mut self, supplied: &BTreeMap<FeatureId, Option<f64>>) {
        for (id, value) in supplied {
            self.set_opt(*id, *value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, f64)> + '_ {
        self.values.iter().map(|(id, v)| (*id, *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every slot keyed `f1..f30`, absent slots as `None`.
    pub fn to_slot_map(&self) -> BTreeMap<String, Option<f64>> {
        FeatureId::ALL
            .iter()
            .map(|id| (id.key(), self.get(*id)))
            .collect()
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FeatureId::COUNT))?;
        for id in FeatureId::ALL {
            map.serialize_entry(&id.key(), &self.get(id))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FeatureVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SlotVisitor;

        impl<'de> Visitor<'de> for SlotVisitor {
            type Value = FeatureVector;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of fN keys to nullable numbers")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut vector = FeatureVector::new();
                while let Some((key, value)) = access.next_entry::<String, Option<f64>>()? {
                    if let Some(id) = FeatureId::parse_key(&key) {
                        vector.set_opt(id, value.filter(|v| v.is_finite()));
                    }
                }
                Ok(vector)
            }
        }

        deserializer.deserialize_map(SlotVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureScope {
    Attempt,
    Set,
}

impl FeatureScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureScope::Attempt => "attempt",
            FeatureScope::Set => "set",
        }
    }
}

/// A persisted feature row. Attempt rows are keyed by attempt id; set rows by
/// a key derived from the problem set id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    #[serde(rename = "_id")]
    pub id: String,
    pub scope: FeatureScope,
    pub user_id: String,
    pub problem_set_id: String,
    pub problem_id: Option<String>,
    pub attempt_id: Option<String>,
    pub model_version: String,
    pub features: FeatureVector,
    pub computed_at: DateTime<Utc>,
}
