use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A closed set of problem tags along one planning dimension.
pub trait Category: Copy + Eq + std::fmt::Debug + Send + Sync + 'static {
    /// Every category in declaration order. Apportionment ties resolve in this order.
    const ALL: &'static [Self];

    /// Label stored on problems and in plan documents.
    fn label(&self) -> &'static str;

    fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.iter().copied().find(|c| c.label() == value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LearningStage {
    #[serde(rename = "기본")]
    Basic,
    #[serde(rename = "실생활응용")]
    RealLifeApplication,
}

impl Category for LearningStage {
    const ALL: &'static [Self] = &[LearningStage::Basic, LearningStage::RealLifeApplication];

    fn label(&self) -> &'static str {
        match self {
            LearningStage::Basic => "기본",
            LearningStage::RealLifeApplication => "실생활응용",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvaluationArea {
    #[serde(rename = "계산")]
    Calculation,
    #[serde(rename = "이해")]
    Understanding,
    #[serde(rename = "추론")]
    Reasoning,
    #[serde(rename = "문제해결")]
    ProblemSolving,
}

impl Category for EvaluationArea {
    const ALL: &'static [Self] = &[
        EvaluationArea::Calculation,
        EvaluationArea::Understanding,
        EvaluationArea::Reasoning,
        EvaluationArea::ProblemSolving,
    ];

    fn label(&self) -> &'static str {
        match self {
            EvaluationArea::Calculation => "계산",
            EvaluationArea::Understanding => "이해",
            EvaluationArea::Reasoning => "추론",
            EvaluationArea::ProblemSolving => "문제해결",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentArea {
    #[serde(rename = "수와 연산")]
    NumberAndOperation,
    #[serde(rename = "도형과 측정")]
    GeometryAndMeasurement,
    #[serde(rename = "변화와 관계")]
    ChangeAndRelation,
    #[serde(rename = "자료와 가능성")]
    DataAndProbability,
}

impl Category for ContentArea {
    const ALL: &'static [Self] = &[
        ContentArea::NumberAndOperation,
        ContentArea::GeometryAndMeasurement,
        ContentArea::ChangeAndRelation,
        ContentArea::DataAndProbability,
    ];

    fn label(&self) -> &'static str {
        match self {
            ContentArea::NumberAndOperation => "수와 연산",
            ContentArea::GeometryAndMeasurement => "도형과 측정",
            ContentArea::ChangeAndRelation => "변화와 관계",
            ContentArea::DataAndProbability => "자료와 가능성",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    #[serde(rename = "1")]
    Easy,
    #[serde(rename = "2")]
    Medium,
    #[serde(rename = "3")]
    Hard,
}

impl Category for Difficulty {
    const ALL: &'static [Self] = &[Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    fn label(&self) -> &'static str {
        match self {
            Difficulty::Easy => "1",
            Difficulty::Medium => "2",
            Difficulty::Hard => "3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount<C> {
    pub category: C,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    EqualDefault,
    AdaptiveFromAccuracy,
}

impl PlanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanSource::EqualDefault => "equal_default",
            PlanSource::AdaptiveFromAccuracy => "adaptive_from_accuracy",
        }
    }
}

/// Target item counts for the next problem set. Each dimension sums to `total_items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPlan {
    pub total_items: u32,
    pub learning_stage_counts: Vec<CategoryCount<LearningStage>>,
    pub evaluation_area_counts: Vec<CategoryCount<EvaluationArea>>,
    pub content_area_counts: Vec<CategoryCount<ContentArea>>,
    pub difficulty_counts: Vec<CategoryCount<Difficulty>>,
    pub source: PlanSource,
    pub generated_at: DateTime<Utc>,
}

impl GenerationPlan {
    pub fn count_of<C: Category>(counts: &[CategoryCount<C>], category: C) -> u32 {
        counts
            .iter()
            .find(|entry| entry.category == category)
            .map(|entry| entry.count)
            .unwrap_or(0)
    }

    pub fn dimension_totals(&self) -> [u32; 4] {
        fn sum<C>(counts: &[CategoryCount<C>]) -> u32 {
            counts.iter().map(|entry| entry.count).sum()
        }
        [
            sum(&self.learning_stage_counts),
            sum(&self.evaluation_area_counts),
            sum(&self.content_area_counts),
            sum(&self.difficulty_counts),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_back_to_categories() {
        for area in EvaluationArea::ALL {
            assert_eq!(EvaluationArea::parse(area.label()), Some(*area));
        }
        assert_eq!(ContentArea::parse(" 도형과 측정 "), Some(ContentArea::GeometryAndMeasurement));
        assert_eq!(Difficulty::parse("3"), Some(Difficulty::Hard));
        assert_eq!(LearningStage::parse("심화"), None);
    }

    #[test]
    fn serde_uses_stored_labels() {
        let json = serde_json::to_string(&EvaluationArea::Reasoning).unwrap();
        assert_eq!(json, "\"추론\"");
        let parsed: Difficulty = serde_json::from_str("\"2\"").unwrap();
        assert_eq!(parsed, Difficulty::Medium);
    }
}
