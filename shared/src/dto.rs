use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    Javascript,
    Typescript,
    Python,
    Java,
    C,
    Cpp,
    Csharp,
    Php,
    Rust,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TrialStatus {
    Pending,
    NeedsReview,
    Completed,
}

/// A named entity (developer, model or pattern) whose code submissions are
/// compared against each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// One candidate's implementation inside a subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    #[serde(rename = "candidateId")]
    pub candidate_id: Uuid,
    pub content: String,
}

/// A benchmarking task bundling one snippet per candidate plus shared context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: Uuid,
    #[serde(rename = "batchId")]
    pub batch_id: Uuid,
    #[serde(rename = "thingName")]
    pub thing_name: String,
    #[serde(default)]
    pub context: String,
    pub language: Language,
    #[serde(default)]
    pub snippets: Vec<Snippet>,
    #[serde(rename = "trialsNeeded")]
    pub trials_needed: i32,
    #[serde(rename = "providerId", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(rename = "modelId", default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// The parsed outcome of one assessment pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentResult {
    #[serde(rename = "providerId")]
    pub provider_id: String,
    #[serde(rename = "modelId")]
    pub model_id: String,
    #[serde(rename = "reportMarkdown")]
    pub report_markdown: String,
    /// Candidate id (or raw display name) -> raw score string, e.g. "7/15".
    #[serde(default)]
    pub scores: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// One execution of the assessment pipeline against a subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    #[serde(rename = "subjectId")]
    pub subject_id: Uuid,
    #[serde(rename = "batchId")]
    pub batch_id: Uuid,
    pub status: TrialStatus,
    #[serde(rename = "providerId", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(rename = "modelId", default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<AssessmentResult>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/// A named grouping of subjects and the candidate lineup eligible for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "candidateIds", default)]
    pub candidate_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

/* ---------------- write payloads ---------------- */

fn default_trials_needed() -> i32 {
    3
}

fn default_status() -> TrialStatus {
    TrialStatus::Pending
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(rename = "candidateIds", default)]
    pub candidate_ids: Vec<Uuid>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubjectInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(rename = "batchId")]
    pub batch_id: Uuid,
    #[serde(rename = "thingName")]
    pub thing_name: String,
    #[serde(default)]
    pub context: String,
    pub language: Language,
    #[serde(default)]
    pub snippets: Vec<Snippet>,
    #[serde(rename = "trialsNeeded", default = "default_trials_needed")]
    pub trials_needed: i32,
    #[serde(rename = "providerId", default)]
    pub provider_id: Option<String>,
    #[serde(rename = "modelId", default)]
    pub model_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrialInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(rename = "subjectId")]
    pub subject_id: Uuid,
    #[serde(rename = "batchId")]
    pub batch_id: Uuid,
    #[serde(default = "default_status")]
    pub status: TrialStatus,
    #[serde(rename = "providerId", default)]
    pub provider_id: Option<String>,
    #[serde(rename = "modelId", default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub result: Option<AssessmentResult>,
}

/* ---------------- assessment wire types ---------------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessRequest {
    #[serde(rename = "thingName")]
    pub thing_name: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub snippets: Vec<Snippet>,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(rename = "providerId", default)]
    pub provider_id: Option<String>,
    #[serde(rename = "modelId", default)]
    pub model_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessResponse {
    pub report: String,
    #[serde(default)]
    pub scores: BTreeMap<String, String>,
}
