//! Integration tests for canvass.
//!
//! These drive the HTTP request handler end to end over a file-backed
//! registry, so routing, auth, the survey reconciler, the analytics
//! pipeline, and snapshot persistence are all exercised together.

use canvass::core::registry::{Registry, RegistryConfig};
use canvass::server::{handle_api_request_inner, ApiMethod, ApiResponse};
use serde_json::{json, Value};

fn file_registry(data_dir: &std::path::Path) -> Registry {
    let config = RegistryConfig::with_dir(data_dir.to_path_buf());
    Registry::open_with_config(config).expect("registry")
}

fn post(reg: &Registry, path: &str, token: Option<&str>, body: Value) -> ApiResponse {
    let body = serde_json::to_vec(&body).expect("json body");
    let auth = token.map(|t| format!("Bearer {t}"));
    handle_api_request_inner(ApiMethod::Post, path, auth.as_deref(), Some(&body), reg)
}

fn get(reg: &Registry, path: &str, token: Option<&str>) -> ApiResponse {
    let auth = token.map(|t| format!("Bearer {t}"));
    handle_api_request_inner(ApiMethod::Get, path, auth.as_deref(), None, reg)
}

fn data(resp: &ApiResponse) -> Value {
    let v: Value = serde_json::from_slice(&resp.body).expect("json body");
    assert_eq!(v["success"], true, "unexpected error: {v}");
    v["data"].clone()
}

fn error_code(resp: &ApiResponse) -> String {
    let v: Value = serde_json::from_slice(&resp.body).expect("json body");
    assert_eq!(v["success"], false, "expected an error: {v}");
    v["error"]["code"].as_str().expect("code").to_string()
}

fn register_and_login(reg: &Registry, email: &str, organization_id: Option<&str>) -> String {
    let resp = post(
        reg,
        "/api/auth/register",
        None,
        json!({
            "username": email.split('@').next().unwrap(),
            "email": email,
            "password": "correct horse",
            "password2": "correct horse",
            "organization_id": organization_id,
        }),
    );
    assert_eq!(resp.status_code, 200, "{}", String::from_utf8_lossy(&resp.body));

    let resp = post(
        reg,
        "/api/auth/login",
        None,
        json!({"email": email, "password": "correct horse"}),
    );
    assert_eq!(resp.status_code, 200);
    data(&resp)["access"].as_str().expect("access").to_string()
}

#[test]
fn survey_lifecycle_with_reconciling_updates() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let reg = file_registry(tmp.path());
    let token = register_and_login(&reg, "ada@example.com", None);

    // Create a survey with one single-choice question.
    let resp = post(
        &reg,
        "/api/surveys/create",
        Some(&token),
        json!({
            "title": "Lunch",
            "description": "Food preferences",
            "questions": [{
                "text": "Cuisine?",
                "question_type": "single_choice",
                "choices": [{"text": "Thai"}, {"text": "Mexican"}],
            }],
        }),
    );
    assert_eq!(resp.status_code, 200, "{}", String::from_utf8_lossy(&resp.body));
    let survey = data(&resp);
    let survey_id = survey["id"].as_str().unwrap().to_string();
    let question = &survey["questions"][0];
    let question_id = question["id"].as_str().unwrap().to_string();
    let thai_id = question["choices"][0]["id"].as_str().unwrap().to_string();

    // Update: rename the question in place, keep one choice, add one.
    let resp = post(
        &reg,
        "/api/surveys/update",
        Some(&token),
        json!({
            "survey_id": survey_id,
            "survey": {
                "questions": [{
                    "id": question_id,
                    "text": "Preferred cuisine?",
                    "question_type": "single_choice",
                    "choices": [
                        {"id": thai_id, "text": "Thai"},
                        {"text": "Italian"},
                    ],
                }],
            },
        }),
    );
    assert_eq!(resp.status_code, 200, "{}", String::from_utf8_lossy(&resp.body));
    let updated = data(&resp);
    let updated_question = &updated["questions"][0];

    // Same question id survives; the Mexican choice is gone.
    assert_eq!(updated_question["id"].as_str().unwrap(), question_id);
    assert_eq!(updated_question["text"], "Preferred cuisine?");
    let choices = updated_question["choices"].as_array().unwrap();
    assert_eq!(choices.len(), 2);
    assert_eq!(choices[0]["id"].as_str().unwrap(), thai_id);
    assert_eq!(choices[1]["text"], "Italian");

    // An update that omits the questions field leaves the tree alone.
    let resp = post(
        &reg,
        "/api/surveys/update",
        Some(&token),
        json!({
            "survey_id": survey_id,
            "survey": {"title": "Lunch survey"},
        }),
    );
    let untouched = data(&resp);
    assert_eq!(untouched["title"], "Lunch survey");
    assert_eq!(untouched["questions"].as_array().unwrap().len(), 1);

    // Deleting the survey makes further reads 404.
    let resp = post(
        &reg,
        "/api/surveys/delete",
        Some(&token),
        json!({"survey_id": survey_id}),
    );
    assert_eq!(resp.status_code, 200);
    let resp = get(
        &reg,
        &format!("/api/surveys/get?survey_id={survey_id}"),
        Some(&token),
    );
    assert_eq!(resp.status_code, 404);
}

#[test]
fn state_survives_reopening_the_registry() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let survey_id;
    let token;
    {
        let reg = file_registry(tmp.path());
        token = register_and_login(&reg, "ada@example.com", None);
        let resp = post(
            &reg,
            "/api/surveys/create",
            Some(&token),
            json!({"title": "Persisted", "description": ""}),
        );
        survey_id = data(&resp)["id"].as_str().unwrap().to_string();
    }

    // A fresh registry over the same directory sees the same state,
    // including the session.
    let reg = file_registry(tmp.path());
    let resp = get(
        &reg,
        &format!("/api/surveys/get?survey_id={survey_id}"),
        Some(&token),
    );
    assert_eq!(resp.status_code, 200);
    assert_eq!(data(&resp)["title"], "Persisted");
}

#[test]
fn gated_survey_submission_and_response_listing() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let reg = file_registry(tmp.path());

    let org = reg.create_organization("Acme").expect("org");
    let org_id = org.id.to_string();
    let creator = register_and_login(&reg, "creator@example.com", Some(&org_id));
    let member = register_and_login(&reg, "member@example.com", Some(&org_id));
    let outsider = register_and_login(&reg, "outsider@example.com", None);

    let resp = post(
        &reg,
        "/api/surveys/create",
        Some(&creator),
        json!({
            "title": "Members only",
            "description": "",
            "organization_id": org_id,
            "requires_organization": true,
            "questions": [{
                "text": "Team?",
                "question_type": "text",
            }],
        }),
    );
    let survey = data(&resp);
    let survey_id = survey["id"].as_str().unwrap().to_string();
    let question_id = survey["questions"][0]["id"].as_str().unwrap().to_string();

    let submission = json!({
        "survey_id": survey_id,
        "answers": [{"question": question_id, "text_answer": "Platform"}],
    });

    // Anonymous: 401. Wrong organization: 403. Member: 200.
    let resp = post(&reg, "/api/responses/create", None, submission.clone());
    assert_eq!(resp.status_code, 401);
    assert_eq!(error_code(&resp), "authentication_required");

    let resp = post(&reg, "/api/responses/create", Some(&outsider), submission.clone());
    assert_eq!(resp.status_code, 403);
    assert_eq!(error_code(&resp), "organization_mismatch");

    let resp = post(&reg, "/api/responses/create", Some(&member), submission);
    assert_eq!(resp.status_code, 200);

    // An answer against a question from another survey is rejected.
    let resp = post(
        &reg,
        "/api/responses/create",
        Some(&member),
        json!({
            "survey_id": survey_id,
            "answers": [{"question": uuid::Uuid::new_v4(), "text_answer": "x"}],
        }),
    );
    assert_eq!(resp.status_code, 400);
    assert_eq!(error_code(&resp), "unknown_question");

    // The creator sees the survey's responses.
    let resp = get(
        &reg,
        &format!("/api/responses?survey_id={survey_id}"),
        Some(&creator),
    );
    let responses = data(&resp);
    assert_eq!(responses.as_array().unwrap().len(), 1);
    assert_eq!(
        responses[0]["answers"][0]["text_answer"],
        "Platform"
    );
}

#[test]
fn csv_upload_plot_and_groupby_pipeline() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let reg = file_registry(tmp.path());
    let token = register_and_login(&reg, "ada@example.com", None);

    let csv = "region,revenue,units\nnorth,100,5\nsouth,200,7\nnorth,150,\n";
    let resp = post(
        &reg,
        "/api/uploads/create",
        Some(&token),
        json!({"filename": "sales.csv", "content": csv}),
    );
    assert_eq!(resp.status_code, 200, "{}", String::from_utf8_lossy(&resp.body));
    let upload = data(&resp);
    assert_eq!(
        upload["columns"],
        json!(["region", "revenue", "units"])
    );
    let upload_id = upload["id"].as_str().unwrap().to_string();

    // Bar chart of revenue by region.
    let resp = post(
        &reg,
        "/api/plot-data",
        Some(&token),
        json!({
            "csv_upload_id": upload_id,
            "plot_type": "bar",
            "x_axis": "region",
            "y_axes": ["revenue"],
        }),
    );
    let plot = data(&resp);
    assert_eq!(plot["data"][0]["type"], "bar");
    assert_eq!(plot["data"][0]["x"], json!(["north", "south", "north"]));
    assert_eq!(plot["layout"]["title"], "revenue vs region");

    // Heatmap refuses the column with a missing cell, naming it.
    let resp = post(
        &reg,
        "/api/plot-data",
        Some(&token),
        json!({
            "csv_upload_id": upload_id,
            "plot_type": "heatmap",
            "x_axis": "region",
            "y_axes": ["units"],
        }),
    );
    assert_eq!(resp.status_code, 400);
    assert_eq!(error_code(&resp), "heatmap_missing_values");

    // Group-by counts per region.
    let resp = post(
        &reg,
        "/api/groupby",
        Some(&token),
        json!({"csv_upload_id": upload_id, "columns": ["region"]}),
    );
    let groups = data(&resp);
    assert_eq!(
        groups["region"],
        json!([
            {"region": "north", "count": 2},
            {"region": "south", "count": 1},
        ])
    );

    // Another user cannot reach the upload.
    let other = register_and_login(&reg, "eve@example.com", None);
    let resp = post(
        &reg,
        "/api/groupby",
        Some(&other),
        json!({"csv_upload_id": upload_id, "columns": ["region"]}),
    );
    assert_eq!(resp.status_code, 404);
}

#[test]
fn analysis_crud_and_pdf_publish() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let reg = file_registry(tmp.path());
    let token = register_and_login(&reg, "ada@example.com", None);

    let resp = post(
        &reg,
        "/api/analyses/create",
        Some(&token),
        json!({
            "title": "Q3 Review",
            "description": "Quarterly numbers",
            "plots": [{"title": "Revenue", "description": "by region"}],
        }),
    );
    let analysis_id = data(&resp)["id"].as_str().unwrap().to_string();

    let resp = post(
        &reg,
        "/api/analyses/update",
        Some(&token),
        json!({
            "analysis_id": analysis_id,
            "title": "Q3 Review (final)",
            "description": "Quarterly numbers",
        }),
    );
    assert_eq!(data(&resp)["title"], "Q3 Review (final)");

    let resp = post(
        &reg,
        "/api/publish-analysis",
        Some(&token),
        json!({"analysis_id": analysis_id}),
    );
    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.content_type, "application/pdf");
    assert!(resp.body.starts_with(b"%PDF-1.4"));
    let disposition = resp
        .extra_headers
        .iter()
        .find(|h| h.field.equiv("Content-Disposition"))
        .expect("disposition header");
    assert!(disposition
        .value
        .as_str()
        .contains("Q3 Review (final).pdf"));

    let resp = post(
        &reg,
        "/api/analyses/delete",
        Some(&token),
        json!({"analysis_id": analysis_id}),
    );
    assert_eq!(resp.status_code, 200);
    let resp = get(&reg, "/api/analyses", Some(&token));
    assert_eq!(data(&resp).as_array().unwrap().len(), 0);
}

#[test]
fn token_refresh_rotates_credentials() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let reg = file_registry(tmp.path());
    register_and_login(&reg, "ada@example.com", None);

    let resp = post(
        &reg,
        "/api/auth/login",
        None,
        json!({"email": "ada@example.com", "password": "correct horse"}),
    );
    let login = data(&resp);
    let old_access = login["access"].as_str().unwrap().to_string();
    let refresh = login["refresh"].as_str().unwrap().to_string();

    let resp = post(&reg, "/api/auth/refresh", None, json!({"refresh": refresh}));
    assert_eq!(resp.status_code, 200);
    let pair = data(&resp);
    let new_access = pair["access"].as_str().unwrap().to_string();
    assert_ne!(new_access, old_access);

    // The old pair is dead, the new access token works.
    let resp = get(&reg, "/api/auth/profile", Some(&old_access));
    assert_eq!(resp.status_code, 401);
    let resp = post(&reg, "/api/auth/refresh", None, json!({"refresh": refresh}));
    assert_eq!(resp.status_code, 401);
    let resp = get(&reg, "/api/auth/profile", Some(&new_access));
    assert_eq!(resp.status_code, 200);
}
