//! Organization gating and submission validation.
//!
//! A survey with `requires_organization` set is only readable and
//! answerable by an authenticated user whose profile organization
//! matches the survey's. Unauthenticated access and organization
//! mismatch are reported distinctly (401 vs 403 at the API boundary).

use super::error::{CanvassError, Result};
use super::model::{Survey, User};

/// Checks whether `user` may read or answer `survey`.
///
/// # Errors
/// Auth error when the survey is gated and no user is present;
/// forbidden error when the user's organization does not match.
pub fn check_survey_access(survey: &Survey, user: Option<&User>, origin: &str) -> Result<()> {
    if !survey.requires_organization {
        return Ok(());
    }

    let Some(user) = user else {
        return Err(CanvassError::auth(
            "authentication_required",
            "Authentication required for this survey",
            origin,
        ));
    };

    match user.profile.organization {
        Some(org) if Some(org) == survey.organization => Ok(()),
        _ => Err(CanvassError::forbidden(
            "organization_mismatch",
            "You don't have access to this survey",
            origin,
        )
        .with_context("survey_id", survey.id.to_string())),
    }
}

/// Validates that `requires_organization` implies a non-null
/// organization. Applied at every survey write.
pub fn check_organization_requirement(survey: &Survey, origin: &str) -> Result<()> {
    if survey.requires_organization && survey.organization.is_none() {
        return Err(CanvassError::validation(
            "organization_required",
            "Organization is required when organization access is required",
            origin,
        )
        .with_context("field", "organization_id"));
    }
    Ok(())
}

/// Validates one answer payload against the survey's question tree:
/// the question must belong to the survey and every selected choice
/// must belong to that question.
pub fn check_answer(
    survey: &Survey,
    question_id: uuid::Uuid,
    selected_choices: &[uuid::Uuid],
    origin: &str,
) -> Result<()> {
    let Some(question) = survey.question(question_id) else {
        return Err(CanvassError::validation(
            "unknown_question",
            format!("Question '{question_id}' does not belong to this survey"),
            origin,
        )
        .with_context("field", "question"));
    };

    for choice_id in selected_choices {
        if question.choice(*choice_id).is_none() {
            return Err(CanvassError::validation(
                "unknown_choice",
                format!("Choice '{choice_id}' does not belong to question '{question_id}'"),
                origin,
            )
            .with_context("field", "selected_choices"));
        }
    }
    Ok(())
}
