use std::collections::HashMap;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, oid::ObjectId, Bson, Document},
    Collection, Database,
};

use super::AnalysisStore;
use crate::error::{AnalysisError, AnalysisResult};
use crate::metrics::track_db_operation;
use crate::models::attempt::{
    AttemptBundle, AttemptOutcome, HistoricalAttempt, RawSolveEvent, SolveAttempt, SolveEvent,
    SolveStep,
};
use crate::models::feature::{FeatureId, FeatureRow, FeatureScope, FeatureVector};
use crate::models::plan::{Category, ContentArea, Difficulty, EvaluationArea, GenerationPlan, LearningStage};
use crate::models::{GradedAttempt, ProblemInfo, ProblemSet, ProblemSetStatus, ProblemTags};
use crate::utils::time::{bson_to_chrono, chrono_to_bson};

const ATTEMPTS: &str = "solve_attempts";
const STEPS: &str = "solve_steps";
const EVENTS: &str = "solve_events";
const PROBLEMS: &str = "problems";
const PROBLEM_SETS: &str = "problem_sets";
const FEATURES: &str = "problem_features";
const PLANS: &str = "set_generation_plans";
const USERS: &str = "users";

pub struct MongoStore {
    mongo: Database,
}

impl MongoStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.mongo.collection::<Document>(name)
    }

    async fn find_all(
        &self,
        collection: &'static str,
        filter: Document,
        sort: Option<Document>,
    ) -> anyhow::Result<Vec<Document>> {
        track_db_operation("find", collection, async {
            let coll = self.collection(collection);
            let mut find = coll.find(filter);
            if let Some(sort) = sort {
                find = find.sort(sort);
            }
            let cursor = find
                .await
                .with_context(|| format!("Failed to query {}", collection))?;
            cursor
                .try_collect()
                .await
                .map_err(|e| anyhow!("{} cursor failure: {}", collection, e))
        })
        .await
    }

    async fn find_one(
        &self,
        collection: &'static str,
        filter: Document,
    ) -> anyhow::Result<Option<Document>> {
        track_db_operation("find_one", collection, async {
            self.collection(collection)
                .find_one(filter)
                .await
                .with_context(|| format!("Failed to query {}", collection))
        })
        .await
    }

    async fn user_grade(&self, user_id: &str) -> anyhow::Result<Option<String>> {
        let user = self.find_one(USERS, doc! { "_id": id_match(user_id) }).await?;
        Ok(user.and_then(|u| u.get_str("grade").ok().map(str::to_string)))
    }

    async fn problems_by_id(&self, ids: Vec<String>) -> anyhow::Result<HashMap<String, ProblemInfo>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let docs = self
            .find_all(PROBLEMS, doc! { "_id": { "$in": id_list(&ids) } }, None)
            .await?;
        Ok(docs
            .iter()
            .map(parse_problem)
            .map(|problem| (problem.id.clone(), problem))
            .collect())
    }
}

/// Matches a key stored either as an ObjectId or as a plain string.
fn id_match(id: &str) -> Bson {
    match ObjectId::parse_str(id) {
        Ok(oid) => Bson::Document(doc! { "$in": [Bson::ObjectId(oid), id] }),
        Err(_) => Bson::String(id.to_string()),
    }
}

fn id_list(ids: &[String]) -> Vec<Bson> {
    ids.iter()
        .flat_map(|id| {
            let mut values = vec![Bson::String(id.clone())];
            if let Ok(oid) = ObjectId::parse_str(id) {
                values.push(Bson::ObjectId(oid));
            }
            values
        })
        .collect()
}

fn string_field(document: &Document, key: &str) -> Option<String> {
    match document.get(key)? {
        Bson::String(value) => Some(value.clone()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::Int32(value) => Some(value.to_string()),
        Bson::Int64(value) => Some(value.to_string()),
        _ => None,
    }
}

fn number_field(document: &Document, key: &str) -> Option<f64> {
    match document.get(key)? {
        Bson::Double(value) => Some(*value),
        Bson::Int32(value) => Some(f64::from(*value)),
        Bson::Int64(value) => Some(*value as f64),
        _ => None,
    }
}

fn datetime_field(document: &Document, key: &str) -> Option<DateTime<Utc>> {
    match document.get(key)? {
        Bson::DateTime(value) => Some(bson_to_chrono(*value)),
        Bson::String(value) => DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

fn optional_datetime(value: Option<DateTime<Utc>>) -> Bson {
    value.map(|dt| Bson::DateTime(chrono_to_bson(dt))).unwrap_or(Bson::Null)
}

fn parse_tag<C: Category>(document: &Document, key: &str) -> Option<C> {
    string_field(document, key).and_then(|label| C::parse(&label))
}

fn parse_tags(document: &Document) -> ProblemTags {
    ProblemTags {
        learning_stage: parse_tag::<LearningStage>(document, "learning_stage"),
        evaluation_area: parse_tag::<EvaluationArea>(document, "evaluation_area"),
        content_area: parse_tag::<ContentArea>(document, "content_area"),
        difficulty: parse_tag::<Difficulty>(document, "difficulty"),
    }
}

fn parse_problem(document: &Document) -> ProblemInfo {
    ProblemInfo {
        id: string_field(document, "_id").unwrap_or_default(),
        problem_text: string_field(document, "problem_text").unwrap_or_default(),
        correct_option: string_field(document, "correct_option"),
        tags: parse_tags(document),
        created_at: datetime_field(document, "created_at").unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    }
}

fn parse_attempt(document: &Document) -> anyhow::Result<SolveAttempt> {
    let id = string_field(document, "_id").context("Attempt document missing _id")?;
    let started_at = datetime_field(document, "started_at")
        .with_context(|| format!("Attempt {} missing started_at", id))?;
    Ok(SolveAttempt {
        user_id: string_field(document, "user_id").unwrap_or_default(),
        problem_id: string_field(document, "problem_id").unwrap_or_default(),
        problem_set_id: string_field(document, "problem_set_id").unwrap_or_default(),
        started_at,
        submitted_at: datetime_field(document, "submitted_at"),
        first_input_at: datetime_field(document, "first_input_at"),
        outcome: string_field(document, "result").and_then(|r| AttemptOutcome::parse(&r)),
        expected_score: number_field(document, "expected_score"),
        self_confidence: number_field(document, "self_confidence"),
        attempt_count: number_field(document, "attempt_count").map_or(1, |n| n.max(0.0) as u32),
        id,
    })
}

/// Malformed attempt documents are skipped with a warning.
fn history_from_documents(documents: &[Document], exclude_attempt_id: &str) -> Vec<HistoricalAttempt> {
    let mut history = Vec::with_capacity(documents.len());
    for document in documents {
        let attempt = match parse_attempt(document) {
            Ok(attempt) => attempt,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping malformed historical attempt");
                continue;
            }
        };
        if attempt.id == exclude_attempt_id {
            continue;
        }
        history.push(HistoricalAttempt {
            attempt_id: attempt.id,
            started_at: attempt.started_at,
            first_input_at: attempt.first_input_at,
            outcome: attempt.outcome,
        });
    }
    history
}

fn parse_step(document: &Document) -> Option<SolveStep> {
    let created_at = datetime_field(document, "created_at")?;
    Some(SolveStep {
        step_index: number_field(document, "step_index")? as i32,
        content: string_field(document, "content").unwrap_or_default(),
        is_deleted: document.get_bool("is_deleted").unwrap_or(false),
        updated_at: datetime_field(document, "updated_at").unwrap_or(created_at),
        created_at,
    })
}

fn parse_event(document: &Document) -> Option<SolveEvent> {
    let raw = RawSolveEvent {
        event_type: string_field(document, "event_type").unwrap_or_default(),
        step_index: number_field(document, "step_index").map(|n| n as i32),
        payload: document
            .get("payload")
            .filter(|p| !matches!(p, Bson::Null))
            .map(|p| p.clone().into_relaxed_extjson()),
        client_timestamp: datetime_field(document, "client_timestamp"),
        server_timestamp: datetime_field(document, "server_timestamp"),
    };
    match SolveEvent::try_from(raw) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::warn!(error = %err, "Skipping malformed solve event");
            None
        }
    }
}

fn parse_problem_set(document: &Document, user_grade: Option<String>) -> anyhow::Result<ProblemSet> {
    let id = string_field(document, "_id").context("Problem set document missing _id")?;
    Ok(ProblemSet {
        user_id: string_field(document, "user_id").unwrap_or_default(),
        status: string_field(document, "status")
            .and_then(|s| ProblemSetStatus::parse(&s))
            .unwrap_or(ProblemSetStatus::InProgress),
        user_grade: string_field(document, "user_grade").or(user_grade),
        diagnosis_text: string_field(document, "diagnosis_text"),
        created_at: datetime_field(document, "created_at").unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        completed_at: datetime_field(document, "completed_at"),
        id,
    })
}

fn feature_row_document(row: &FeatureRow) -> Document {
    let mut document = doc! {
        "scope": row.scope.as_str(),
        "user_id": &row.user_id,
        "problem_set_id": &row.problem_set_id,
        "problem_id": row.problem_id.clone().map(Bson::String).unwrap_or(Bson::Null),
        "solve_attempt_id": row.attempt_id.clone().map(Bson::String).unwrap_or(Bson::Null),
        "model_version": &row.model_version,
        "updated_at": chrono_to_bson(row.computed_at),
    };
    for id in FeatureId::ALL {
        let value = row.features.get(id).map(Bson::Double).unwrap_or(Bson::Null);
        document.insert(id.key(), value);
    }
    document
}

fn parse_feature_row(document: &Document) -> anyhow::Result<FeatureRow> {
    let id = string_field(document, "_id").context("Feature row missing _id")?;
    let scope = match string_field(document, "scope").as_deref() {
        Some("set") => FeatureScope::Set,
        _ => FeatureScope::Attempt,
    };
    let mut features = FeatureVector::new();
    for slot in FeatureId::ALL {
        features.set_opt(slot, number_field(document, &slot.key()).filter(|v| v.is_finite()));
    }
    Ok(FeatureRow {
        scope,
        user_id: string_field(document, "user_id").unwrap_or_default(),
        problem_set_id: string_field(document, "problem_set_id").unwrap_or_default(),
        problem_id: string_field(document, "problem_id"),
        attempt_id: string_field(document, "solve_attempt_id"),
        model_version: string_field(document, "model_version").unwrap_or_default(),
        features,
        computed_at: datetime_field(document, "updated_at").unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        id,
    })
}

#[async_trait]
impl AnalysisStore for MongoStore {
    async fn load_attempt_bundle(&self, attempt_id: &str) -> AnalysisResult<AttemptBundle> {
        let document = self
            .find_one(ATTEMPTS, doc! { "_id": id_match(attempt_id) })
            .await?
            .ok_or_else(|| AnalysisError::not_found("attempt", attempt_id))?;
        let attempt = parse_attempt(&document)?;

        let steps = self
            .find_all(
                STEPS,
                doc! { "attempt_id": id_match(attempt_id) },
                Some(doc! { "step_index": 1 }),
            )
            .await?
            .iter()
            .filter_map(parse_step)
            .collect();

        let events = self
            .find_all(EVENTS, doc! { "attempt_id": id_match(attempt_id) }, None)
            .await?
            .iter()
            .filter_map(parse_event)
            .collect();

        let problem = self
            .find_one(PROBLEMS, doc! { "_id": id_match(&attempt.problem_id) })
            .await?
            .as_ref()
            .map(parse_problem);

        Ok(AttemptBundle {
            attempt,
            steps,
            events,
            problem,
        })
    }

    async fn find_user_history(
        &self,
        user_id: &str,
        tags: &ProblemTags,
        before: DateTime<Utc>,
        exclude_attempt_id: &str,
    ) -> AnalysisResult<Vec<HistoricalAttempt>> {
        let mut area_filters = Vec::new();
        if let Some(area) = tags.evaluation_area {
            area_filters.push(doc! { "evaluation_area": area.label() });
        }
        if let Some(area) = tags.content_area {
            area_filters.push(doc! { "content_area": area.label() });
        }
        if area_filters.is_empty() {
            return Ok(Vec::new());
        }

        let problem_ids: Vec<String> = self
            .find_all(PROBLEMS, doc! { "$or": area_filters }, None)
            .await?
            .iter()
            .filter_map(|p| string_field(p, "_id"))
            .collect();
        if problem_ids.is_empty() {
            return Ok(Vec::new());
        }

        let filter = doc! {
            "user_id": id_match(user_id),
            "problem_id": { "$in": id_list(&problem_ids) },
            "started_at": { "$lt": chrono_to_bson(before) },
        };
        let documents = self
            .find_all(ATTEMPTS, filter, Some(doc! { "started_at": 1 }))
            .await?;

        Ok(history_from_documents(&documents, exclude_attempt_id))
    }

    async fn load_problem_set(&self, problem_set_id: &str) -> AnalysisResult<ProblemSet> {
        let document = self
            .find_one(PROBLEM_SETS, doc! { "_id": id_match(problem_set_id) })
            .await?
            .ok_or_else(|| AnalysisError::not_found("problem set", problem_set_id))?;
        let user_id = string_field(&document, "user_id").unwrap_or_default();
        let grade = self.user_grade(&user_id).await?;
        Ok(parse_problem_set(&document, grade)?)
    }

    async fn list_set_attempts(&self, problem_set_id: &str) -> AnalysisResult<Vec<SolveAttempt>> {
        let documents = self
            .find_all(
                ATTEMPTS,
                doc! { "problem_set_id": id_match(problem_set_id) },
                Some(doc! { "started_at": 1, "_id": 1 }),
            )
            .await?;
        Ok(documents
            .iter()
            .map(parse_attempt)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    async fn list_set_problems(&self, problem_set_id: &str) -> AnalysisResult<Vec<ProblemInfo>> {
        let documents = self
            .find_all(
                PROBLEMS,
                doc! { "problem_set_id": id_match(problem_set_id) },
                Some(doc! { "created_at": 1, "_id": 1 }),
            )
            .await?;
        Ok(documents.iter().map(parse_problem).collect())
    }

    async fn list_attempt_rows(&self, problem_set_id: &str) -> AnalysisResult<Vec<FeatureRow>> {
        let documents = self
            .find_all(
                FEATURES,
                doc! { "problem_set_id": problem_set_id, "scope": FeatureScope::Attempt.as_str() },
                Some(doc! { "_id": 1 }),
            )
            .await?;
        Ok(documents
            .iter()
            .map(parse_feature_row)
            .collect::<anyhow::Result<Vec<_>>>()?)
    }

    async fn load_feature_row(&self, row_id: &str) -> AnalysisResult<Option<FeatureRow>> {
        let document = self.find_one(FEATURES, doc! { "_id": row_id }).await?;
        Ok(document.as_ref().map(parse_feature_row).transpose()?)
    }

    async fn upsert_feature_row(&self, row: &FeatureRow) -> AnalysisResult<()> {
        let update = doc! {
            "$set": feature_row_document(row),
            "$setOnInsert": { "created_at": chrono_to_bson(Utc::now()) },
        };
        track_db_operation("upsert", FEATURES, async {
            self.collection(FEATURES)
                .update_one(doc! { "_id": &row.id }, update)
                .upsert(true)
                .await
                .context("Failed to upsert feature row")
        })
        .await?;
        Ok(())
    }

    async fn latest_completed_set(&self, user_id: &str) -> AnalysisResult<Option<ProblemSet>> {
        let documents = track_db_operation("find", PROBLEM_SETS, async {
            let cursor = self
                .collection(PROBLEM_SETS)
                .find(doc! {
                    "user_id": id_match(user_id),
                    "status": ProblemSetStatus::Completed.as_str(),
                })
                .sort(doc! { "created_at": -1 })
                .limit(1)
                .await
                .context("Failed to query completed problem sets")?;
            cursor
                .try_collect::<Vec<Document>>()
                .await
                .map_err(|e| anyhow!("Problem set cursor failure: {}", e))
        })
        .await?;

        match documents.first() {
            Some(document) => {
                let grade = self.user_grade(user_id).await?;
                Ok(Some(parse_problem_set(document, grade)?))
            }
            None => Ok(None),
        }
    }

    async fn list_graded_attempts(
        &self,
        user_id: &str,
        problem_set_id: Option<&str>,
    ) -> AnalysisResult<Vec<GradedAttempt>> {
        let mut filter = doc! { "user_id": id_match(user_id) };
        if let Some(set_id) = problem_set_id {
            filter.insert("problem_set_id", id_match(set_id));
        }
        let attempts = self
            .find_all(ATTEMPTS, filter, Some(doc! { "started_at": 1 }))
            .await?
            .iter()
            .map(parse_attempt)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut problem_ids: Vec<String> = attempts.iter().map(|a| a.problem_id.clone()).collect();
        problem_ids.sort();
        problem_ids.dedup();
        let problems = self.problems_by_id(problem_ids).await?;

        Ok(attempts
            .into_iter()
            .map(|attempt| GradedAttempt {
                is_correct: attempt.is_correct(),
                tags: problems
                    .get(&attempt.problem_id)
                    .map(|p| p.tags.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn replace_active_plan(
        &self,
        user_id: &str,
        problem_set_id: &str,
        plan: &GenerationPlan,
    ) -> AnalysisResult<()> {
        let plan_bson = bson::to_bson(plan).context("Failed to encode generation plan")?;
        track_db_operation("replace_plan", PLANS, async {
            let collection = self.collection(PLANS);
            collection
                .delete_many(doc! { "user_id": user_id, "_id": { "$ne": problem_set_id } })
                .await
                .context("Failed to clear previous plans")?;
            collection
                .update_one(
                    doc! { "_id": problem_set_id },
                    doc! {
                        "$set": {
                            "user_id": user_id,
                            "plan_json": plan_bson,
                            "updated_at": chrono_to_bson(Utc::now()),
                        }
                    },
                )
                .upsert(true)
                .await
                .context("Failed to store generation plan")?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn load_plan(&self, problem_set_id: &str) -> AnalysisResult<Option<GenerationPlan>> {
        let Some(document) = self.find_one(PLANS, doc! { "_id": problem_set_id }).await? else {
            return Ok(None);
        };
        let plan = document
            .get("plan_json")
            .cloned()
            .context("Plan document missing plan_json")?;
        let plan = bson::from_bson::<GenerationPlan>(plan).context("Failed to decode generation plan")?;
        Ok(Some(plan))
    }

    async fn complete_problem_set(
        &self,
        problem_set_id: &str,
        diagnosis_text: &str,
    ) -> AnalysisResult<()> {
        let now = Utc::now();
        let result = track_db_operation("update", PROBLEM_SETS, async {
            self.collection(PROBLEM_SETS)
                .update_one(
                    doc! { "_id": id_match(problem_set_id) },
                    doc! {
                        "$set": {
                            "diagnosis_text": diagnosis_text,
                            "status": ProblemSetStatus::Completed.as_str(),
                            "completed_at": optional_datetime(Some(now)),
                        }
                    },
                )
                .await
                .context("Failed to store diagnosis text")
        })
        .await?;
        if result.matched_count == 0 {
            return Err(AnalysisError::not_found("problem set", problem_set_id));
        }
        Ok(())
    }

    async fn ping(&self) -> AnalysisResult<()> {
        track_db_operation("ping", "admin", async {
            self.mongo
                .run_command(doc! { "ping": 1 })
                .await
                .context("MongoDB ping failed")
        })
        .await?;
        Ok(())
    }
}
