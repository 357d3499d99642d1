//! Application service over the snapshot store.
//!
//! The registry reads the current state, applies one operation, and
//! writes the whole snapshot back, so every multi-entity write
//! (nested survey creation, reconciliation, response submission)
//! commits atomically. Ownership scoping happens here: analyses and
//! uploads are looked up by `(id, user)`, and a foreign id reads as
//! not-found rather than leaking existence.

use crate::analytics::report::{render_pdf, PdfRenderer, TextPdfRenderer};
use crate::analytics::{build_plot, group_by, DataTable, PlotData, PlotSpec};
use crate::core::access::{check_answer, check_organization_requirement, check_survey_access};
use crate::core::auth;
use crate::core::error::{CanvassError, Result};
use crate::core::model::{
    Analysis, Answer, AppState, CsvUpload, Organization, Survey, SurveyResponse, User,
    UserProfile, UserView,
};
use crate::core::reconcile::{reconcile, QuestionPatch, ReconcileOutcome, SurveyPatch};
use crate::storage::{FileStateStore, FileStorage, InMemoryStateStore, StateStore};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Configuration for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base directory for canvass data (snapshot and uploads).
    pub data_dir: PathBuf,
    /// Access token lifetime in minutes.
    pub access_token_minutes: i64,
    /// Refresh token lifetime in days.
    pub refresh_token_days: i64,
}

impl RegistryConfig {
    /// Creates a config with the default data directory
    /// (`CANVASS_DATA_DIR` or `~/.canvass`).
    #[must_use]
    pub fn default_dir() -> Self {
        if let Ok(data_dir) = env::var("CANVASS_DATA_DIR") {
            return Self::with_dir(PathBuf::from(data_dir));
        }
        let data_dir =
            dirs::home_dir().map_or_else(|| PathBuf::from(".canvass"), |h| h.join(".canvass"));
        Self::with_dir(data_dir)
    }

    /// Creates a config with a custom data directory.
    #[must_use]
    pub fn with_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            access_token_minutes: auth::ACCESS_TOKEN_MINUTES,
            refresh_token_days: auth::REFRESH_TOKEN_DAYS,
        }
    }

    /// Returns the path to the snapshot file.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }
}

/// New-user payload.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
}

/// Survey creation payload: scalars plus the initial question tree.
#[derive(Debug, Clone, Deserialize)]
pub struct SurveyDraft {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub requires_organization: bool,
    #[serde(default)]
    pub questions: Vec<QuestionPatch>,
}

const fn default_true() -> bool {
    true
}

/// One answer in a submission payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerSubmission {
    pub question: Uuid,
    #[serde(default)]
    pub text_answer: Option<String>,
    #[serde(default)]
    pub selected_choices: Vec<Uuid>,
}

/// Analysis creation/update payload.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisDraft {
    pub title: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub plots: Vec<Value>,
}

/// Token pair handed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Successful login: tokens plus the user view.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    pub access: String,
    pub refresh: String,
    pub user: UserView,
}

/// Result of storing one CSV upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub id: Uuid,
    pub columns: Vec<String>,
}

/// A rendered PDF export.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// The registry: all operations behind the HTTP and CLI surfaces.
pub struct Registry {
    store: Arc<dyn StateStore>,
    files: FileStorage,
    renderer: Arc<dyn PdfRenderer>,
    config: RegistryConfig,
}

impl Registry {
    /// Opens or creates a registry at the default location.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be opened.
    pub fn open() -> Result<Self> {
        Self::open_with_config(RegistryConfig::default_dir())
    }

    /// Opens or creates a registry with custom config.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be opened.
    pub fn open_with_config(config: RegistryConfig) -> Result<Self> {
        let store = FileStateStore::open(config.state_path()).map_err(|e| {
            CanvassError::system("store_open_failed", e.to_string(), "registry:open")
        })?;
        Ok(Self::with_store(Arc::new(store), config))
    }

    /// Creates a registry with a custom state store (for testing).
    #[must_use]
    pub fn with_store(store: Arc<dyn StateStore>, config: RegistryConfig) -> Self {
        let files = FileStorage::new(config.data_dir.clone());
        Self {
            store,
            files,
            renderer: Arc::new(TextPdfRenderer),
            config,
        }
    }

    /// Creates an in-memory registry rooted at `data_dir` (for testing).
    #[must_use]
    pub fn in_memory(data_dir: PathBuf) -> Self {
        Self::with_store(
            Arc::new(InMemoryStateStore::new()),
            RegistryConfig::with_dir(data_dir),
        )
    }

    /// Swaps the PDF renderer.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn PdfRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn state(&self) -> Result<AppState> {
        self.store.read().map_err(|e| {
            CanvassError::system("state_read_failed", e.to_string(), "registry:state")
        })
    }

    fn persist(&self, state: &AppState) -> Result<()> {
        self.store.write(state).map_err(|e| {
            CanvassError::system("state_write_failed", e.to_string(), "registry:persist")
        })
    }

    // ---- auth ----

    /// Registers a new user and their profile.
    ///
    /// # Errors
    /// Validation errors for empty/duplicate fields or an unknown
    /// organization.
    pub fn register(&self, payload: &RegisterUser) -> Result<UserView> {
        let origin = "registry:register";
        if payload.username.trim().is_empty() {
            return Err(
                CanvassError::validation("invalid_username", "Username cannot be empty", origin)
                    .with_context("field", "username"),
            );
        }
        if payload.email.trim().is_empty() || !payload.email.contains('@') {
            return Err(CanvassError::validation(
                "invalid_email",
                format!("'{}' is not a valid email address", payload.email),
                origin,
            )
            .with_context("field", "email"));
        }
        if payload.password.len() < 8 {
            return Err(CanvassError::validation(
                "weak_password",
                "Password must be at least 8 characters",
                origin,
            )
            .with_context("field", "password"));
        }

        let mut state = self.state()?;
        if state.user_by_email(&payload.email).is_some() {
            return Err(CanvassError::validation(
                "email_taken",
                format!("A user with email '{}' already exists", payload.email),
                origin,
            )
            .with_context("field", "email"));
        }
        if state.users.values().any(|u| u.username == payload.username) {
            return Err(CanvassError::validation(
                "username_taken",
                format!("Username '{}' is already taken", payload.username),
                origin,
            )
            .with_context("field", "username"));
        }
        if let Some(org) = payload.organization_id {
            if !state.organizations.contains_key(&org) {
                return Err(CanvassError::validation(
                    "unknown_organization",
                    format!("Organization '{org}' does not exist"),
                    origin,
                )
                .with_context("field", "organization_id"));
            }
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: payload.username.clone(),
            email: payload.email.clone(),
            password_digest: auth::new_password_digest(&payload.password),
            profile: UserProfile {
                organization: payload.organization_id,
                created_at: now,
                updated_at: now,
            },
            created_at: now,
            updated_at: now,
        };
        let view = UserView::from(&user);
        state.users.insert(user.id, user);
        self.persist(&state)?;
        info!("registered user {}", view.email);
        Ok(view)
    }

    /// Authenticates by email and password, issuing a token pair.
    ///
    /// # Errors
    /// Not-found for an unknown email, auth error for a bad password.
    pub fn login(&self, email: &str, password: &str) -> Result<LoginResult> {
        let origin = "registry:login";
        let mut state = self.state()?;
        let user = state.user_by_email(email).cloned().ok_or_else(|| {
            CanvassError::not_found("user_not_found", "User does not exist", origin)
        })?;
        if !auth::verify_password(password, &user.password_digest) {
            return Err(CanvassError::auth(
                "invalid_credentials",
                "Invalid credentials",
                origin,
            ));
        }

        // Nothing else ever deletes dead sessions, so sweep them here.
        let now = Utc::now();
        state.sessions.retain(|_, s| auth::refresh_valid(s, now));

        let session = auth::issue_session(
            user.id,
            now,
            self.config.access_token_minutes,
            self.config.refresh_token_days,
        );
        let result = LoginResult {
            access: session.access_token.clone(),
            refresh: session.refresh_token.clone(),
            user: UserView::from(&user),
        };
        state.sessions.insert(session.access_token.clone(), session);
        self.persist(&state)?;
        Ok(result)
    }

    /// Rotates a session from its refresh token.
    ///
    /// # Errors
    /// Auth error for an unknown or expired refresh token.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let origin = "registry:refresh";
        let now = Utc::now();
        let mut state = self.state()?;

        let old_access = state
            .sessions
            .iter()
            .find(|(_, s)| s.refresh_token == refresh_token)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| {
                CanvassError::auth("invalid_refresh_token", "Unknown refresh token", origin)
            })?;
        let old = state
            .sessions
            .remove(&old_access)
            .expect("key taken from the map");
        if !auth::refresh_valid(&old, now) {
            self.persist(&state)?;
            return Err(CanvassError::auth(
                "refresh_token_expired",
                "Refresh token has expired",
                origin,
            )
            .with_hint("Log in again"));
        }

        let session = auth::issue_session(
            old.user,
            now,
            self.config.access_token_minutes,
            self.config.refresh_token_days,
        );
        let pair = TokenPair {
            access: session.access_token.clone(),
            refresh: session.refresh_token.clone(),
        };
        state.sessions.insert(session.access_token.clone(), session);
        self.persist(&state)?;
        Ok(pair)
    }

    /// Resolves an access token to its user.
    ///
    /// # Errors
    /// Auth error for an unknown or expired token.
    pub fn authenticate(&self, access_token: &str) -> Result<User> {
        let origin = "registry:authenticate";
        let state = self.state()?;
        let session = state.sessions.get(access_token).ok_or_else(|| {
            CanvassError::auth("invalid_token", "Unknown access token", origin)
        })?;
        if !auth::access_valid(session, Utc::now()) {
            return Err(CanvassError::auth(
                "token_expired",
                "Access token has expired",
                origin,
            )
            .with_hint("Use the refresh endpoint to obtain a new token"));
        }
        state.users.get(&session.user).cloned().ok_or_else(|| {
            CanvassError::system("session_user_missing", "Session user no longer exists", origin)
        })
    }

    /// Updates the user's profile organization (`None` clears it).
    ///
    /// # Errors
    /// Validation error for an unknown organization.
    pub fn update_profile(&self, user_id: Uuid, organization: Option<Uuid>) -> Result<UserView> {
        let origin = "registry:update_profile";
        let mut state = self.state()?;
        if let Some(org) = organization {
            if !state.organizations.contains_key(&org) {
                return Err(CanvassError::validation(
                    "unknown_organization",
                    format!("Organization '{org}' does not exist"),
                    origin,
                )
                .with_context("field", "organization_id"));
            }
        }
        let user = state.users.get_mut(&user_id).ok_or_else(|| {
            CanvassError::not_found("user_not_found", "User does not exist", origin)
        })?;
        let now = Utc::now();
        user.profile.organization = organization;
        user.profile.updated_at = now;
        user.updated_at = now;
        let view = UserView::from(&*user);
        self.persist(&state)?;
        Ok(view)
    }

    // ---- organizations ----

    /// Creates an organization.
    ///
    /// # Errors
    /// Validation error for an empty or duplicate name.
    pub fn create_organization(&self, name: &str) -> Result<Organization> {
        let origin = "registry:create_organization";
        if name.trim().is_empty() {
            return Err(CanvassError::validation(
                "invalid_organization_name",
                "Organization name cannot be empty",
                origin,
            )
            .with_context("field", "name"));
        }
        let mut state = self.state()?;
        if state.organizations.values().any(|o| o.name == name) {
            return Err(CanvassError::validation(
                "organization_exists",
                format!("Organization '{name}' already exists"),
                origin,
            )
            .with_context("field", "name"));
        }
        let now = Utc::now();
        let org = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.organizations.insert(org.id, org.clone());
        self.persist(&state)?;
        Ok(org)
    }

    /// Lists organizations sorted by name.
    ///
    /// # Errors
    /// Returns an error if state cannot be read.
    pub fn list_organizations(&self) -> Result<Vec<Organization>> {
        let state = self.state()?;
        let mut orgs: Vec<_> = state.organizations.into_values().collect();
        orgs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(orgs)
    }

    /// Gets one organization.
    ///
    /// # Errors
    /// Not-found for an unknown id.
    pub fn get_organization(&self, org_id: Uuid) -> Result<Organization> {
        let state = self.state()?;
        state.organizations.get(&org_id).cloned().ok_or_else(|| {
            CanvassError::not_found(
                "organization_not_found",
                "Organization not found",
                "registry:get_organization",
            )
            .with_context("organization_id", org_id.to_string())
        })
    }

    /// Operator view: every survey regardless of creator, most
    /// recently updated first.
    ///
    /// # Errors
    /// Returns an error if state cannot be read.
    pub fn all_surveys(&self) -> Result<Vec<Survey>> {
        let state = self.state()?;
        let mut surveys: Vec<_> = state.surveys.into_values().collect();
        surveys.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(surveys)
    }

    /// Operator reset: replaces the snapshot with an empty one.
    /// Uploaded CSV files on disk are left in place.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be written.
    pub fn clear_state(&self) -> Result<()> {
        self.persist(&AppState::default())?;
        info!("cleared all application state");
        Ok(())
    }

    // ---- surveys ----

    /// Creates a survey with its initial question tree.
    ///
    /// # Errors
    /// Validation errors for an empty title, an unknown organization,
    /// or a gated survey with no organization.
    pub fn create_survey(&self, creator: Uuid, draft: &SurveyDraft) -> Result<Survey> {
        let origin = "registry:create_survey";
        if draft.title.trim().is_empty() {
            return Err(
                CanvassError::validation("invalid_title", "Survey title cannot be empty", origin)
                    .with_context("field", "title"),
            );
        }
        let mut state = self.state()?;
        if let Some(org) = draft.organization_id {
            if !state.organizations.contains_key(&org) {
                return Err(CanvassError::validation(
                    "unknown_organization",
                    format!("Organization '{org}' does not exist"),
                    origin,
                )
                .with_context("field", "organization_id"));
            }
        }

        let now = Utc::now();
        let mut survey = Survey {
            id: Uuid::new_v4(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            creator,
            organization: draft.organization_id,
            is_active: draft.is_active,
            requires_organization: draft.requires_organization,
            questions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        // The initial question tree goes through the same
        // matched-update-or-create path as later edits.
        let patch = SurveyPatch {
            questions: Some(draft.questions.clone()),
            ..SurveyPatch::default()
        };
        reconcile(&mut survey, &patch, now);
        check_organization_requirement(&survey, origin)?;

        state.surveys.insert(survey.id, survey.clone());
        self.persist(&state)?;
        info!("created survey {} ({})", survey.title, survey.id);
        Ok(survey)
    }

    /// Lists the creator's surveys, most recently updated first.
    ///
    /// # Errors
    /// Returns an error if state cannot be read.
    pub fn list_surveys(&self, creator: Uuid) -> Result<Vec<Survey>> {
        let state = self.state()?;
        let mut surveys: Vec<_> = state
            .surveys
            .into_values()
            .filter(|s| s.creator == creator)
            .collect();
        surveys.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(surveys)
    }

    /// Gets one of the creator's surveys.
    ///
    /// # Errors
    /// Not-found when the id is unknown or owned by someone else.
    pub fn get_survey(&self, creator: Uuid, survey_id: Uuid) -> Result<Survey> {
        let state = self.state()?;
        state
            .surveys
            .get(&survey_id)
            .filter(|s| s.creator == creator)
            .cloned()
            .ok_or_else(|| survey_not_found(survey_id, "registry:get_survey"))
    }

    /// Organization-gated public read of a survey.
    ///
    /// # Errors
    /// Not-found for an unknown id; auth/forbidden per the gating
    /// rules in [`check_survey_access`].
    pub fn public_survey(&self, survey_id: Uuid, user: Option<&User>) -> Result<Survey> {
        let origin = "registry:public_survey";
        let state = self.state()?;
        let survey = state
            .surveys
            .get(&survey_id)
            .cloned()
            .ok_or_else(|| survey_not_found(survey_id, origin))?;
        check_survey_access(&survey, user, origin)?;
        Ok(survey)
    }

    /// Reconciles a survey against a partial update payload and
    /// cascades answer deletion for any removed questions.
    ///
    /// # Errors
    /// Not-found for a foreign or unknown id; validation error when
    /// the merged state gates on a missing organization.
    pub fn update_survey(
        &self,
        creator: Uuid,
        survey_id: Uuid,
        patch: &SurveyPatch,
    ) -> Result<(Survey, ReconcileOutcome)> {
        let origin = "registry:update_survey";
        let mut state = self.state()?;
        let mut survey = state
            .surveys
            .get(&survey_id)
            .filter(|s| s.creator == creator)
            .cloned()
            .ok_or_else(|| survey_not_found(survey_id, origin))?;

        let outcome = reconcile(&mut survey, patch, Utc::now());
        check_organization_requirement(&survey, origin)?;

        state.delete_answers_for_questions(survey_id, &outcome.deleted_question_ids);
        state.surveys.insert(survey_id, survey.clone());
        self.persist(&state)?;
        info!(
            "reconciled survey {survey_id}: +{}q ~{}q -{}q +{}c ~{}c -{}c",
            outcome.questions_created,
            outcome.questions_updated,
            outcome.questions_deleted,
            outcome.choices_created,
            outcome.choices_updated,
            outcome.choices_deleted,
        );
        Ok((survey, outcome))
    }

    /// Deletes a survey, cascading to questions, choices, responses,
    /// and answers.
    ///
    /// # Errors
    /// Not-found for a foreign or unknown id.
    pub fn delete_survey(&self, creator: Uuid, survey_id: Uuid) -> Result<()> {
        let origin = "registry:delete_survey";
        let mut state = self.state()?;
        let owned = state
            .surveys
            .get(&survey_id)
            .is_some_and(|s| s.creator == creator);
        if !owned {
            return Err(survey_not_found(survey_id, origin));
        }
        let _ = state.delete_survey_cascade(survey_id);
        self.persist(&state)?;
        info!("deleted survey {survey_id}");
        Ok(())
    }

    // ---- responses ----

    /// Submits one response with its answers in a single write.
    ///
    /// Gating matches the public read; every answer must reference a
    /// question of this survey and only that question's choices.
    ///
    /// # Errors
    /// Not-found, auth/forbidden, or validation per the rules above.
    pub fn submit_response(
        &self,
        survey_id: Uuid,
        user: Option<&User>,
        answers: &[AnswerSubmission],
    ) -> Result<SurveyResponse> {
        let origin = "registry:submit_response";
        let mut state = self.state()?;
        let survey = state
            .surveys
            .get(&survey_id)
            .cloned()
            .ok_or_else(|| CanvassError::not_found("survey_not_found", "Survey not found", origin))?;
        check_survey_access(&survey, user, origin)?;

        let mut validated = Vec::with_capacity(answers.len());
        for answer in answers {
            check_answer(&survey, answer.question, &answer.selected_choices, origin)?;
            validated.push(Answer {
                id: Uuid::new_v4(),
                question: answer.question,
                text_answer: answer.text_answer.clone(),
                selected_choices: answer.selected_choices.clone(),
            });
        }

        let response = SurveyResponse {
            id: Uuid::new_v4(),
            survey: survey_id,
            respondent: user.map(|u| u.id),
            submitted_at: Utc::now(),
            answers: validated,
        };
        state.responses.insert(response.id, response.clone());
        self.persist(&state)?;
        info!("recorded response {} to survey {survey_id}", response.id);
        Ok(response)
    }

    /// Lists responses: all of a survey's when `survey_id` is given,
    /// otherwise the user's own submissions.
    ///
    /// # Errors
    /// Returns an error if state cannot be read.
    pub fn list_responses(
        &self,
        user_id: Uuid,
        survey_id: Option<Uuid>,
    ) -> Result<Vec<SurveyResponse>> {
        let state = self.state()?;
        let mut responses: Vec<_> = state
            .responses
            .into_values()
            .filter(|r| match survey_id {
                Some(id) => r.survey == id,
                None => r.respondent == Some(user_id),
            })
            .collect();
        responses.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(responses)
    }

    // ---- analytics ----

    /// Stores one CSV upload and reports its column names.
    ///
    /// # Errors
    /// Validation error for an unparsable CSV; system error when the
    /// file cannot be stored.
    pub fn create_upload(&self, user_id: Uuid, filename: &str, content: &[u8]) -> Result<UploadResult> {
        let origin = "registry:create_upload";

        // Reject bad CSV before anything touches disk.
        let table = DataTable::from_reader(content).map_err(|e| {
            CanvassError::validation("invalid_csv", e.message, origin).with_context(
                "filename",
                filename.to_string(),
            )
        })?;

        let upload_id = Uuid::new_v4();
        let path = self
            .files
            .save(user_id, upload_id, filename, content)
            .map_err(|e| CanvassError::system("upload_store_failed", e.to_string(), origin))?;
        info!("stored upload {} for user {user_id}", path.display());

        let mut state = self.state()?;
        let upload = CsvUpload {
            id: upload_id,
            user: user_id,
            filename: filename.to_string(),
            path: path.display().to_string(),
            uploaded_at: Utc::now(),
        };
        let result = UploadResult {
            id: upload.id,
            columns: table.columns().to_vec(),
        };
        state.uploads.insert(upload.id, upload);
        self.persist(&state)?;
        Ok(result)
    }

    /// Gets one of the user's uploads.
    ///
    /// # Errors
    /// Not-found when the id is unknown or owned by someone else.
    pub fn get_upload(&self, user_id: Uuid, upload_id: Uuid) -> Result<CsvUpload> {
        let state = self.state()?;
        state
            .uploads
            .get(&upload_id)
            .filter(|u| u.user == user_id)
            .cloned()
            .ok_or_else(|| {
                CanvassError::not_found(
                    "upload_not_found",
                    "CSV file not found",
                    "registry:get_upload",
                )
                .with_context("csv_upload_id", upload_id.to_string())
            })
    }

    fn load_table(&self, user_id: Uuid, upload_id: Uuid) -> Result<DataTable> {
        let upload = self.get_upload(user_id, upload_id)?;
        DataTable::from_path(std::path::Path::new(&upload.path))
    }

    /// Builds chart-ready series for one of the user's uploads.
    ///
    /// # Errors
    /// Not-found for a foreign upload; validation/IO errors from the
    /// plot builder.
    pub fn plot_data(&self, user_id: Uuid, upload_id: Uuid, spec: &PlotSpec) -> Result<PlotData> {
        let table = self.load_table(user_id, upload_id)?;
        build_plot(&table, spec)
    }

    /// Frequency counts per requested column of one upload.
    ///
    /// # Errors
    /// Not-found for a foreign upload; validation error for an unknown
    /// column.
    pub fn group_by_upload(
        &self,
        user_id: Uuid,
        upload_id: Uuid,
        columns: &[String],
    ) -> Result<BTreeMap<String, Vec<Value>>> {
        let table = self.load_table(user_id, upload_id)?;
        group_by(&table, columns)
    }

    /// Saves an analysis.
    ///
    /// # Errors
    /// Validation error for an empty title.
    pub fn create_analysis(&self, user: &User, draft: &AnalysisDraft) -> Result<Analysis> {
        let origin = "registry:create_analysis";
        if draft.title.trim().is_empty() {
            return Err(
                CanvassError::validation("invalid_title", "Analysis title cannot be empty", origin)
                    .with_context("field", "title"),
            );
        }
        let mut state = self.state()?;
        let analysis = Analysis {
            id: Uuid::new_v4(),
            user: user.id,
            title: draft.title.clone(),
            author_name: draft
                .author_name
                .clone()
                .unwrap_or_else(|| user.username.clone()),
            date: Utc::now(),
            description: draft.description.clone(),
            plots: draft.plots.clone(),
        };
        state.analyses.insert(analysis.id, analysis.clone());
        self.persist(&state)?;
        info!("saved analysis {} ({})", analysis.title, analysis.id);
        Ok(analysis)
    }

    /// Lists the user's analyses, newest first.
    ///
    /// # Errors
    /// Returns an error if state cannot be read.
    pub fn list_analyses(&self, user_id: Uuid) -> Result<Vec<Analysis>> {
        let state = self.state()?;
        let mut analyses: Vec<_> = state
            .analyses
            .into_values()
            .filter(|a| a.user == user_id)
            .collect();
        analyses.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(analyses)
    }

    /// Gets one of the user's analyses.
    ///
    /// # Errors
    /// Not-found when the id is unknown or owned by someone else.
    pub fn get_analysis(&self, user_id: Uuid, analysis_id: Uuid) -> Result<Analysis> {
        let state = self.state()?;
        state
            .analyses
            .get(&analysis_id)
            .filter(|a| a.user == user_id)
            .cloned()
            .ok_or_else(|| analysis_not_found(analysis_id, "registry:get_analysis"))
    }

    /// Replaces an analysis's editable fields.
    ///
    /// # Errors
    /// Not-found for a foreign id, validation error for an empty title.
    pub fn update_analysis(
        &self,
        user_id: Uuid,
        analysis_id: Uuid,
        draft: &AnalysisDraft,
    ) -> Result<Analysis> {
        let origin = "registry:update_analysis";
        if draft.title.trim().is_empty() {
            return Err(
                CanvassError::validation("invalid_title", "Analysis title cannot be empty", origin)
                    .with_context("field", "title"),
            );
        }
        let mut state = self.state()?;
        let analysis = state
            .analyses
            .get_mut(&analysis_id)
            .filter(|a| a.user == user_id)
            .ok_or_else(|| analysis_not_found(analysis_id, origin))?;
        analysis.title.clone_from(&draft.title);
        if let Some(author) = &draft.author_name {
            analysis.author_name.clone_from(author);
        }
        analysis.description.clone_from(&draft.description);
        analysis.plots.clone_from(&draft.plots);
        let updated = analysis.clone();
        self.persist(&state)?;
        Ok(updated)
    }

    /// Deletes one of the user's analyses.
    ///
    /// # Errors
    /// Not-found for a foreign or unknown id.
    pub fn delete_analysis(&self, user_id: Uuid, analysis_id: Uuid) -> Result<()> {
        let origin = "registry:delete_analysis";
        let mut state = self.state()?;
        let owned = state
            .analyses
            .get(&analysis_id)
            .is_some_and(|a| a.user == user_id);
        if !owned {
            return Err(analysis_not_found(analysis_id, origin));
        }
        state.analyses.remove(&analysis_id);
        self.persist(&state)?;
        Ok(())
    }

    /// Renders one of the user's analyses to PDF.
    ///
    /// # Errors
    /// Not-found for a foreign id; system error when rendering fails.
    pub fn publish_analysis(&self, user_id: Uuid, analysis_id: Uuid) -> Result<PdfDocument> {
        let analysis = self.get_analysis(user_id, analysis_id)?;
        let bytes = render_pdf(&analysis, self.renderer.as_ref())?;
        info!("published analysis {analysis_id} ({} bytes)", bytes.len());
        Ok(PdfDocument {
            filename: format!("{}.pdf", analysis.title),
            bytes,
        })
    }
}

fn survey_not_found(survey_id: Uuid, origin: &str) -> CanvassError {
    CanvassError::not_found("survey_not_found", "Survey not found", origin)
        .with_context("survey_id", survey_id.to_string())
}

fn analysis_not_found(analysis_id: Uuid, origin: &str) -> CanvassError {
    CanvassError::not_found("analysis_not_found", "Analysis not found", origin)
        .with_context("analysis_id", analysis_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::PlotKind;
    use crate::core::error::ErrorCategory;
    use crate::core::model::{QuestionType, Session};
    use crate::core::reconcile::ChoicePatch;
    use chrono::Duration;
    use tempfile::TempDir;

    fn test_registry() -> (Registry, TempDir) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let reg = Registry::in_memory(tmp.path().to_path_buf());
        (reg, tmp)
    }

    fn register(reg: &Registry, email: &str, org: Option<Uuid>) -> User {
        let view = reg
            .register(&RegisterUser {
                username: email.split('@').next().unwrap_or(email).to_string(),
                email: email.to_string(),
                password: "correct horse".to_string(),
                organization_id: org,
            })
            .expect("register");
        reg.login(email, "correct horse").expect("login");
        let state = reg.state().expect("state");
        state.users.get(&view.id).cloned().expect("user")
    }

    fn draft_with_question() -> SurveyDraft {
        SurveyDraft {
            title: "Lunch".to_string(),
            description: "Food preferences".to_string(),
            organization_id: None,
            is_active: true,
            requires_organization: false,
            questions: vec![QuestionPatch {
                id: None,
                text: "Cuisine?".to_string(),
                question_type: QuestionType::SingleChoice,
                choices: Some(vec![
                    ChoicePatch {
                        id: None,
                        text: "Thai".to_string(),
                    },
                    ChoicePatch {
                        id: None,
                        text: "Mexican".to_string(),
                    },
                ]),
            }],
        }
    }

    #[test]
    fn register_login_and_authenticate() {
        let (reg, _tmp) = test_registry();
        let view = reg
            .register(&RegisterUser {
                username: "ada".to_string(),
                email: "ada@example.com".to_string(),
                password: "correct horse".to_string(),
                organization_id: None,
            })
            .unwrap();

        let login = reg.login("ada@example.com", "correct horse").unwrap();
        assert_eq!(login.user.id, view.id);

        let user = reg.authenticate(&login.access).unwrap();
        assert_eq!(user.email, "ada@example.com");

        let err = reg.login("ada@example.com", "wrong").unwrap_err();
        assert_eq!(err.category, ErrorCategory::Auth);
        let err = reg.login("nobody@example.com", "x").unwrap_err();
        assert_eq!(err.category, ErrorCategory::NotFound);
    }

    #[test]
    fn refresh_rotates_the_pair() {
        let (reg, _tmp) = test_registry();
        register(&reg, "ada@example.com", None);
        let login = reg.login("ada@example.com", "correct horse").unwrap();

        let pair = reg.refresh(&login.refresh).unwrap();
        assert_ne!(pair.access, login.access);

        // The old access token is gone; the new one works.
        assert!(reg.authenticate(&login.access).is_err());
        assert!(reg.authenticate(&pair.access).is_ok());

        // The old refresh token cannot be replayed.
        assert!(reg.refresh(&login.refresh).is_err());
    }

    #[test]
    fn login_sweeps_expired_sessions() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);

        let mut state = reg.state().unwrap();
        let now = Utc::now();
        state.sessions.insert(
            "stale-access".to_string(),
            Session {
                access_token: "stale-access".to_string(),
                refresh_token: "stale-refresh".to_string(),
                user: ada.id,
                access_expires_at: now - Duration::days(8),
                refresh_expires_at: now - Duration::days(1),
            },
        );
        reg.persist(&state).unwrap();

        reg.login("ada@example.com", "correct horse").unwrap();

        let state = reg.state().unwrap();
        assert!(!state.sessions.contains_key("stale-access"));
        // The session from `register` and the fresh one both survive.
        assert_eq!(state.sessions.len(), 2);
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let (reg, _tmp) = test_registry();
        register(&reg, "ada@example.com", None);
        let err = reg
            .register(&RegisterUser {
                username: "ada2".to_string(),
                email: "ada@example.com".to_string(),
                password: "correct horse".to_string(),
                organization_id: None,
            })
            .unwrap_err();
        assert_eq!(err.code, "email_taken");
    }

    #[test]
    fn survey_create_and_owner_scoping() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);
        let eve = register(&reg, "eve@example.com", None);

        let survey = reg.create_survey(ada.id, &draft_with_question()).unwrap();
        assert_eq!(survey.questions.len(), 1);
        assert_eq!(survey.questions[0].choices.len(), 2);

        assert!(reg.get_survey(ada.id, survey.id).is_ok());
        let err = reg.get_survey(eve.id, survey.id).unwrap_err();
        assert_eq!(err.category, ErrorCategory::NotFound);
    }

    #[test]
    fn gated_survey_requires_organization_at_create() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);
        let mut draft = draft_with_question();
        draft.requires_organization = true;
        let err = reg.create_survey(ada.id, &draft).unwrap_err();
        assert_eq!(err.code, "organization_required");
    }

    #[test]
    fn update_survey_reconciles_and_cascades_answers() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);
        let survey = reg.create_survey(ada.id, &draft_with_question()).unwrap();
        let question = &survey.questions[0];

        // A respondent answers the question.
        reg.submit_response(
            survey.id,
            Some(&ada),
            &[AnswerSubmission {
                question: question.id,
                text_answer: None,
                selected_choices: vec![question.choices[0].id],
            }],
        )
        .unwrap();

        // Replace the tree with one new question; the old one goes away.
        let patch = SurveyPatch {
            questions: Some(vec![QuestionPatch {
                id: None,
                text: "Allergies?".to_string(),
                question_type: QuestionType::Text,
                choices: None,
            }]),
            ..SurveyPatch::default()
        };
        let (updated, outcome) = reg.update_survey(ada.id, survey.id, &patch).unwrap();
        assert_eq!(outcome.questions_deleted, 1);
        assert_eq!(updated.questions.len(), 1);

        // The answer referencing the deleted question is gone too.
        let responses = reg.list_responses(ada.id, Some(survey.id)).unwrap();
        assert_eq!(responses.len(), 1);
        assert!(responses[0].answers.is_empty());
    }

    #[test]
    fn idempotent_update_reports_noop() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);
        let survey = reg.create_survey(ada.id, &draft_with_question()).unwrap();

        let patch = SurveyPatch {
            title: Some(survey.title.clone()),
            description: Some(survey.description.clone()),
            is_active: Some(survey.is_active),
            requires_organization: Some(survey.requires_organization),
            questions: Some(
                survey
                    .questions
                    .iter()
                    .map(|q| QuestionPatch {
                        id: Some(q.id),
                        text: q.text.clone(),
                        question_type: q.question_type,
                        choices: Some(
                            q.choices
                                .iter()
                                .map(|c| ChoicePatch {
                                    id: Some(c.id),
                                    text: c.text.clone(),
                                })
                                .collect(),
                        ),
                    })
                    .collect(),
            ),
        };
        let (_, outcome) = reg.update_survey(ada.id, survey.id, &patch).unwrap();
        assert!(outcome.is_noop(), "outcome: {outcome:?}");
    }

    #[test]
    fn organization_gating_on_submission() {
        let (reg, _tmp) = test_registry();
        let org1 = reg.create_organization("Org1").unwrap();
        let _org2 = reg.create_organization("Org2").unwrap();
        let creator = register(&reg, "creator@example.com", Some(org1.id));
        let member = register(&reg, "member@example.com", Some(org1.id));
        let outsider = register(
            &reg,
            "outsider@example.com",
            Some(_org2.id),
        );
        let unaffiliated = register(&reg, "lone@example.com", None);

        let mut draft = draft_with_question();
        draft.organization_id = Some(org1.id);
        draft.requires_organization = true;
        let survey = reg.create_survey(creator.id, &draft).unwrap();
        let question_id = survey.questions[0].id;
        let answer = |_: ()| AnswerSubmission {
            question: question_id,
            text_answer: Some("Thai".to_string()),
            selected_choices: Vec::new(),
        };

        let err = reg
            .submit_response(survey.id, Some(&outsider), &[answer(())])
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Forbidden);

        let err = reg
            .submit_response(survey.id, Some(&unaffiliated), &[answer(())])
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Forbidden);

        let err = reg
            .submit_response(survey.id, None, &[answer(())])
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Auth);

        assert!(reg
            .submit_response(survey.id, Some(&member), &[answer(())])
            .is_ok());
    }

    #[test]
    fn submission_rejects_foreign_choice() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);
        let survey = reg.create_survey(ada.id, &draft_with_question()).unwrap();
        let question_id = survey.questions[0].id;

        let err = reg
            .submit_response(
                survey.id,
                Some(&ada),
                &[AnswerSubmission {
                    question: question_id,
                    text_answer: None,
                    selected_choices: vec![Uuid::new_v4()],
                }],
            )
            .unwrap_err();
        assert_eq!(err.code, "unknown_choice");

        // Nothing was written.
        assert!(reg.list_responses(ada.id, Some(survey.id)).unwrap().is_empty());
    }

    #[test]
    fn delete_survey_cascades() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);
        let survey = reg.create_survey(ada.id, &draft_with_question()).unwrap();
        reg.submit_response(survey.id, Some(&ada), &[]).unwrap();

        reg.delete_survey(ada.id, survey.id).unwrap();
        assert!(reg.get_survey(ada.id, survey.id).is_err());
        assert!(reg.list_responses(ada.id, Some(survey.id)).unwrap().is_empty());
    }

    #[test]
    fn upload_reports_columns_and_scopes_by_owner() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);
        let eve = register(&reg, "eve@example.com", None);

        let upload = reg
            .create_upload(ada.id, "data.csv", b"x,y\n1,10\n2,20\n")
            .unwrap();
        assert_eq!(upload.columns, ["x", "y"]);

        let spec = PlotSpec {
            plot_type: PlotKind::Scatter,
            x_axis: Some("x".to_string()),
            y_axes: vec!["y".to_string()],
        };
        assert!(reg.plot_data(ada.id, upload.id, &spec).is_ok());

        let err = reg.plot_data(eve.id, upload.id, &spec).unwrap_err();
        assert_eq!(err.category, ErrorCategory::NotFound);
    }

    #[test]
    fn reuploaded_filename_keeps_earlier_bytes() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);

        let first = reg
            .create_upload(ada.id, "data.csv", b"x,y\n1,10\n2,20\n")
            .unwrap();
        let second = reg
            .create_upload(ada.id, "data.csv", b"a,b\n3,30\n")
            .unwrap();
        assert_eq!(second.columns, ["a", "b"]);

        // The first upload still serves its own columns.
        let spec = PlotSpec {
            plot_type: PlotKind::Scatter,
            x_axis: Some("x".to_string()),
            y_axes: vec!["y".to_string()],
        };
        let plot = reg.plot_data(ada.id, first.id, &spec).unwrap();
        assert_eq!(plot.data[0].y.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn upload_rejects_unparsable_csv() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);
        let err = reg
            .create_upload(ada.id, "bad.csv", b"a,b\n\xff\xfe,1\n")
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);
        assert_eq!(err.code, "invalid_csv");
    }

    #[test]
    fn group_by_via_upload() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);
        let upload = reg
            .create_upload(ada.id, "data.csv", b"status\nopen\nopen\nclosed\n")
            .unwrap();
        let out = reg
            .group_by_upload(ada.id, upload.id, &["status".to_string()])
            .unwrap();
        assert_eq!(out["status"].len(), 2);
    }

    #[test]
    fn analysis_lifecycle_and_publish() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);
        let analysis = reg
            .create_analysis(
                &ada,
                &AnalysisDraft {
                    title: "Q3 Review".to_string(),
                    author_name: None,
                    description: "Numbers".to_string(),
                    plots: vec![serde_json::json!({"title": "Revenue"})],
                },
            )
            .unwrap();
        assert_eq!(analysis.author_name, "ada");

        let doc = reg.publish_analysis(ada.id, analysis.id).unwrap();
        assert_eq!(doc.filename, "Q3 Review.pdf");
        assert!(doc.bytes.starts_with(b"%PDF"));

        reg.delete_analysis(ada.id, analysis.id).unwrap();
        assert!(reg.get_analysis(ada.id, analysis.id).is_err());
    }

    #[test]
    fn analyses_are_owner_scoped() {
        let (reg, _tmp) = test_registry();
        let ada = register(&reg, "ada@example.com", None);
        let eve = register(&reg, "eve@example.com", None);
        let analysis = reg
            .create_analysis(
                &ada,
                &AnalysisDraft {
                    title: "Private".to_string(),
                    author_name: None,
                    description: String::new(),
                    plots: Vec::new(),
                },
            )
            .unwrap();

        assert!(reg.get_analysis(eve.id, analysis.id).is_err());
        assert!(reg.list_analyses(eve.id).unwrap().is_empty());
        assert!(reg.delete_analysis(eve.id, analysis.id).is_err());
    }
}
