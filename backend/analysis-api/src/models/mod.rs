use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod attempt;
pub mod feature;
pub mod plan;
pub mod report;

use plan::{ContentArea, Difficulty, EvaluationArea, LearningStage};

/// Planning tags attached to a problem. Unknown labels are stored as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemTags {
    pub learning_stage: Option<LearningStage>,
    pub evaluation_area: Option<EvaluationArea>,
    pub content_area: Option<ContentArea>,
    pub difficulty: Option<Difficulty>,
}

impl ProblemTags {
    /// True when the evaluation area or the content area matches.
    pub fn shares_area(&self, other: &ProblemTags) -> bool {
        let evaluation = self.evaluation_area.is_some() && self.evaluation_area == other.evaluation_area;
        let content = self.content_area.is_some() && self.content_area == other.content_area;
        evaluation || content
    }

    pub fn has_area(&self) -> bool {
        self.evaluation_area.is_some() || self.content_area.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemInfo {
    pub id: String,
    pub problem_text: String,
    pub correct_option: Option<String>,
    pub tags: ProblemTags,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemSetStatus {
    InProgress,
    Completed,
}

impl ProblemSetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemSetStatus::InProgress => "in_progress",
            ProblemSetStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(ProblemSetStatus::InProgress),
            "completed" => Some(ProblemSetStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemSet {
    pub id: String,
    pub user_id: String,
    pub status: ProblemSetStatus,
    pub user_grade: Option<String>,
    pub diagnosis_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Final outcome of one attempt together with its problem tags. Input to the plan weighter.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedAttempt {
    pub is_correct: bool,
    pub tags: ProblemTags,
}
