//! Domain entities and the persisted application state.
//!
//! The survey side is a tree: a survey owns its questions, a question
//! owns its choices. Responses live beside the tree and reference
//! questions and choices by id, so deletions must cascade explicitly
//! (see `Registry::delete_survey` and the reconciler).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// An organization that surveys can be scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user profile. The organization gates access to
/// organization-scoped surveys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub organization: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    /// Salted digest; never exposed through the API.
    pub password_digest: String,
    pub profile: UserProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// API-safe view of a user.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub organization: Option<Uuid>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            organization: user.profile.organization,
        }
    }
}

/// Question answer modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Text,
    MultipleChoice,
    SingleChoice,
}

/// A selectable choice belonging to exactly one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A question belonging to exactly one survey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    pub question_type: QuestionType,
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Question {
    /// Looks up an owned choice by id.
    #[must_use]
    pub fn choice(&self, choice_id: Uuid) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == choice_id)
    }
}

/// A survey and its owned question tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Survey {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub creator: Uuid,
    #[serde(default)]
    pub organization: Option<Uuid>,
    pub is_active: bool,
    #[serde(default)]
    pub requires_organization: bool,
    #[serde(default)]
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Survey {
    /// Looks up an owned question by id.
    #[must_use]
    pub fn question(&self, question_id: Uuid) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }
}

/// One answer within a response, referencing exactly one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub id: Uuid,
    pub question: Uuid,
    #[serde(default)]
    pub text_answer: Option<String>,
    #[serde(default)]
    pub selected_choices: Vec<Uuid>,
}

/// A submitted response and its owned answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub id: Uuid,
    pub survey: Uuid,
    #[serde(default)]
    pub respondent: Option<Uuid>,
    pub submitted_at: DateTime<Utc>,
    pub answers: Vec<Answer>,
}

/// An immutable reference to one stored CSV file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvUpload {
    pub id: Uuid,
    pub user: Uuid,
    pub filename: String,
    pub path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A saved analysis. The plot records are an opaque denormalized
/// payload; no foreign key to individual uploads is retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub user: Uuid,
    pub title: String,
    pub author_name: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub plots: Vec<serde_json::Value>,
}

/// A server-side token pair with expiries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Uuid,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// The complete persisted application state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub organizations: HashMap<Uuid, Organization>,
    #[serde(default)]
    pub users: HashMap<Uuid, User>,
    #[serde(default)]
    pub surveys: HashMap<Uuid, Survey>,
    #[serde(default)]
    pub responses: HashMap<Uuid, SurveyResponse>,
    #[serde(default)]
    pub uploads: HashMap<Uuid, CsvUpload>,
    #[serde(default)]
    pub analyses: HashMap<Uuid, Analysis>,
    /// Sessions keyed by access token.
    #[serde(default)]
    pub sessions: HashMap<String, Session>,
}

impl AppState {
    /// Finds a user by email.
    #[must_use]
    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users.values().find(|u| u.email == email)
    }

    /// Deletes a survey together with everything it owns: questions,
    /// choices, and every response (with its answers) submitted to it.
    ///
    /// The cascade is spelled out here rather than hidden in storage
    /// configuration so the ownership invariant stays testable.
    pub fn delete_survey_cascade(&mut self, survey_id: Uuid) -> Option<Survey> {
        let survey = self.surveys.remove(&survey_id)?;
        self.responses.retain(|_, r| r.survey != survey_id);
        Some(survey)
    }

    /// Deletes every answer that references one of the given questions,
    /// across all responses to the survey. Used when the reconciler
    /// removes questions from a survey.
    pub fn delete_answers_for_questions(&mut self, survey_id: Uuid, question_ids: &[Uuid]) {
        if question_ids.is_empty() {
            return;
        }
        for response in self.responses.values_mut() {
            if response.survey == survey_id {
                response.answers.retain(|a| !question_ids.contains(&a.question));
            }
        }
    }
}
