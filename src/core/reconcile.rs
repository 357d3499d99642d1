//! Survey graph reconciliation.
//!
//! Converges a survey's persisted question/choice tree to a partial
//! update payload: matched ids are updated in place, unmatched payloads
//! create new children, and existing children not referenced by a
//! present list are deleted. Scalar fields use merge semantics: a field
//! absent from the payload keeps its current value.
//!
//! "List absent" and "list present but empty" are distinct: `None`
//! leaves children untouched, `Some(vec![])` deletes them all.

use super::model::{Choice, Question, QuestionType, Survey};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Partial update payload for one choice.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChoicePatch {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub text: String,
}

/// Partial update payload for one question.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionPatch {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub text: String,
    pub question_type: QuestionType,
    #[serde(default)]
    pub choices: Option<Vec<ChoicePatch>>,
}

/// Partial update payload for a survey.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SurveyPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub requires_organization: Option<bool>,
    #[serde(default)]
    pub questions: Option<Vec<QuestionPatch>>,
}

/// What the reconciler did, for auditing and cascades.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub questions_created: usize,
    pub questions_updated: usize,
    pub questions_deleted: usize,
    pub choices_created: usize,
    pub choices_updated: usize,
    pub choices_deleted: usize,
    /// Ids of deleted questions; the caller must delete the answers
    /// that reference them.
    pub deleted_question_ids: Vec<Uuid>,
}

impl ReconcileOutcome {
    /// True when the payload changed nothing beyond timestamps.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.questions_created == 0
            && self.questions_updated == 0
            && self.questions_deleted == 0
            && self.choices_created == 0
            && self.choices_updated == 0
            && self.choices_deleted == 0
    }
}

/// Applies `patch` to `survey` in memory.
///
/// An incoming id that matches no existing child is treated as a
/// create; ids are never adoptable across surveys or questions.
/// The caller persists the mutated survey and cascades answer deletion
/// for `deleted_question_ids`.
pub fn reconcile(
    survey: &mut Survey,
    patch: &SurveyPatch,
    now: DateTime<Utc>,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    if let Some(title) = &patch.title {
        survey.title.clone_from(title);
    }
    if let Some(description) = &patch.description {
        survey.description.clone_from(description);
    }
    if let Some(is_active) = patch.is_active {
        survey.is_active = is_active;
    }
    if let Some(requires_organization) = patch.requires_organization {
        survey.requires_organization = requires_organization;
    }

    if let Some(question_patches) = &patch.questions {
        let existing_ids: HashSet<Uuid> = survey.questions.iter().map(|q| q.id).collect();
        let mut referenced: HashSet<Uuid> = HashSet::new();
        let mut created: Vec<Question> = Vec::new();

        for question_patch in question_patches {
            match question_patch.id.filter(|id| existing_ids.contains(id)) {
                Some(id) => {
                    referenced.insert(id);
                    let question = survey
                        .questions
                        .iter_mut()
                        .find(|q| q.id == id)
                        .expect("id checked against existing set");
                    let scalar_changed = question.text != question_patch.text
                        || question.question_type != question_patch.question_type;
                    question.text.clone_from(&question_patch.text);
                    question.question_type = question_patch.question_type;
                    if scalar_changed {
                        question.updated_at = now;
                        outcome.questions_updated += 1;
                    }
                    reconcile_choices(question, question_patch.choices.as_deref(), now, &mut outcome);
                }
                None => {
                    let mut question = Question {
                        id: Uuid::new_v4(),
                        text: question_patch.text.clone(),
                        question_type: question_patch.question_type,
                        choices: Vec::new(),
                        created_at: now,
                        updated_at: now,
                    };
                    outcome.questions_created += 1;
                    reconcile_choices(
                        &mut question,
                        question_patch.choices.as_deref(),
                        now,
                        &mut outcome,
                    );
                    created.push(question);
                }
            }
        }

        let mut deleted_ids = Vec::new();
        survey.questions.retain(|q| {
            if referenced.contains(&q.id) {
                true
            } else {
                deleted_ids.push(q.id);
                false
            }
        });
        outcome.questions_deleted = deleted_ids.len();
        outcome.deleted_question_ids = deleted_ids;
        survey.questions.extend(created);
    }

    survey.updated_at = now;
    outcome
}

fn reconcile_choices(
    question: &mut Question,
    patches: Option<&[ChoicePatch]>,
    now: DateTime<Utc>,
    outcome: &mut ReconcileOutcome,
) {
    let Some(patches) = patches else {
        return;
    };

    let existing_ids: HashSet<Uuid> = question.choices.iter().map(|c| c.id).collect();
    let mut referenced: HashSet<Uuid> = HashSet::new();
    let mut created: Vec<Choice> = Vec::new();

    for patch in patches {
        match patch.id.filter(|id| existing_ids.contains(id)) {
            Some(id) => {
                referenced.insert(id);
                let choice = question
                    .choices
                    .iter_mut()
                    .find(|c| c.id == id)
                    .expect("id checked against existing set");
                if choice.text != patch.text {
                    choice.text.clone_from(&patch.text);
                    choice.updated_at = now;
                    outcome.choices_updated += 1;
                }
            }
            None => {
                created.push(Choice {
                    id: Uuid::new_v4(),
                    text: patch.text.clone(),
                    created_at: now,
                    updated_at: now,
                });
                outcome.choices_created += 1;
            }
        }
    }

    let before = question.choices.len();
    question.choices.retain(|c| referenced.contains(&c.id));
    outcome.choices_deleted += before - question.choices.len();
    question.choices.extend(created);
}
