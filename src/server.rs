use crate::analytics::PlotSpec;
use crate::cli::output::CliResponse;
use crate::core::error::{CanvassError, Result};
use crate::core::model::{User, UserView};
use crate::core::reconcile::SurveyPatch;
use crate::core::registry::{AnalysisDraft, AnswerSubmission, RegisterUser, Registry, SurveyDraft};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
    Options,
}

impl ApiMethod {
    fn from_http(method: &tiny_http::Method) -> Option<Self> {
        match method {
            tiny_http::Method::Get => Some(Self::Get),
            tiny_http::Method::Post => Some(Self::Post),
            tiny_http::Method::Options => Some(Self::Options),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status_code: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    pub extra_headers: Vec<tiny_http::Header>,
}

impl ApiResponse {
    fn json<T: Serialize>(status_code: u16, value: &T) -> Result<Self> {
        let body = serde_json::to_vec_pretty(value).map_err(|e| {
            CanvassError::system("json_serialize_failed", e.to_string(), "server:json")
        })?;
        Ok(Self {
            status_code,
            content_type: "application/json",
            body,
            extra_headers: Vec::new(),
        })
    }

    fn text(status_code: u16, content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status_code,
            content_type,
            body: body.into(),
            extra_headers: Vec::new(),
        }
    }
}

fn parse_query(url: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Some((_path, qs)) = url.split_once('?') else {
        return out;
    };

    for part in qs.split('&') {
        if part.trim().is_empty() {
            continue;
        }

        let (k, v) = part.split_once('=').unwrap_or((part, ""));
        out.insert(k.to_string(), v.to_string());
    }

    out
}

fn query_uuid(query: &HashMap<String, String>, key: &str, origin: &str) -> Result<Uuid> {
    let raw = query.get(key).ok_or_else(|| {
        CanvassError::validation(
            format!("missing_{key}"),
            format!("Query parameter '{key}' is required"),
            origin,
        )
    })?;
    Uuid::parse_str(raw).map_err(|_| {
        CanvassError::validation(
            format!("invalid_{key}"),
            format!("'{raw}' is not a valid id"),
            origin,
        )
    })
}

fn cors_headers() -> Vec<tiny_http::Header> {
    vec![
        tiny_http::Header::from_bytes(&b"Access-Control-Allow-Origin"[..], &b"*"[..])
            .expect("static header"),
        tiny_http::Header::from_bytes(
            &b"Access-Control-Allow-Methods"[..],
            &b"GET, POST, OPTIONS"[..],
        )
        .expect("static header"),
        tiny_http::Header::from_bytes(
            &b"Access-Control-Allow-Headers"[..],
            &b"Content-Type, Authorization"[..],
        )
        .expect("static header"),
    ]
}

fn parse_json_body<T: for<'de> Deserialize<'de>>(body: Option<&[u8]>, origin: &str) -> Result<T> {
    let raw = body.ok_or_else(|| {
        CanvassError::validation("request_body_required", "Request body is required", origin)
    })?;

    serde_json::from_slice(raw).map_err(|e| {
        CanvassError::validation(
            "invalid_json_body",
            format!("Invalid JSON body: {e}"),
            origin,
        )
    })
}

fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    authorization?.strip_prefix("Bearer ").map(str::trim)
}

/// Resolves the Authorization header to a user, requiring one.
fn require_user(registry: &Registry, authorization: Option<&str>, origin: &str) -> Result<User> {
    let token = bearer_token(authorization).ok_or_else(|| {
        CanvassError::auth(
            "authentication_required",
            "Authentication credentials were not provided",
            origin,
        )
    })?;
    registry.authenticate(token)
}

/// Resolves the Authorization header when present. A missing header is
/// anonymous; a present but invalid token is still an auth error.
fn optional_user(registry: &Registry, authorization: Option<&str>) -> Result<Option<User>> {
    match bearer_token(authorization) {
        Some(token) => Ok(Some(registry.authenticate(token)?)),
        None => Ok(None),
    }
}

fn method_not_allowed(path: &str, method: ApiMethod, allowed: &'static str) -> Result<ApiResponse> {
    let err = CanvassError::validation(
        "method_not_allowed",
        format!("Method '{method:?}' is not allowed for '{path}'"),
        "server:handle_api_request",
    )
    .with_hint(format!("Allowed method(s): {allowed}"));
    let wrapped = CliResponse::<()>::error(&err);
    let mut resp = ApiResponse::json(405, &wrapped)?;
    resp.extra_headers.extend(cors_headers());
    Ok(resp)
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    password2: String,
    organization_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh: String,
}

#[derive(Debug, Deserialize)]
struct ProfileUpdateRequest {
    organization_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct OrganizationCreateRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SurveyUpdateRequest {
    survey_id: Uuid,
    survey: SurveyPatch,
}

#[derive(Debug, Deserialize)]
struct SurveyIdRequest {
    survey_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ResponseCreateRequest {
    survey_id: Uuid,
    #[serde(default)]
    answers: Vec<AnswerSubmission>,
}

#[derive(Debug, Deserialize)]
struct UploadCreateRequest {
    filename: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisUpdateRequest {
    analysis_id: Uuid,
    #[serde(flatten)]
    draft: AnalysisDraft,
}

#[derive(Debug, Deserialize)]
struct AnalysisIdRequest {
    analysis_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct PlotDataRequest {
    csv_upload_id: Uuid,
    #[serde(flatten)]
    spec: PlotSpec,
}

#[derive(Debug, Deserialize)]
struct GroupByRequest {
    csv_upload_id: Uuid,
    columns: Vec<String>,
}

fn ok_json<T: Serialize>(data: T) -> Result<ApiResponse> {
    let wrapped = CliResponse::success(data);
    let mut resp = ApiResponse::json(200, &wrapped)?;
    resp.extra_headers.extend(cors_headers());
    Ok(resp)
}

pub fn handle_api_request(
    method: ApiMethod,
    url: &str,
    authorization: Option<&str>,
    body: Option<&[u8]>,
) -> Result<ApiResponse> {
    let registry = Registry::open()?;
    Ok(handle_api_request_inner(
        method,
        url,
        authorization,
        body,
        &registry,
    ))
}

/// Routes one request, turning any handler error into the JSON error
/// envelope with the status its category maps to.
pub fn handle_api_request_inner(
    method: ApiMethod,
    url: &str,
    authorization: Option<&str>,
    body: Option<&[u8]>,
    registry: &Registry,
) -> ApiResponse {
    match route_api_request(method, url, authorization, body, registry) {
        Ok(resp) => resp,
        Err(e) => {
            let wrapped = CliResponse::<()>::error(&e);
            match ApiResponse::json(e.http_status(), &wrapped) {
                Ok(mut resp) => {
                    resp.extra_headers.extend(cors_headers());
                    resp
                }
                Err(_) => ApiResponse::text(500, "text/plain", "internal error\n"),
            }
        }
    }
}

#[allow(clippy::too_many_lines)]
fn route_api_request(
    method: ApiMethod,
    url: &str,
    authorization: Option<&str>,
    body: Option<&[u8]>,
    registry: &Registry,
) -> Result<ApiResponse> {
    if method == ApiMethod::Options {
        let mut resp = ApiResponse::text(204, "text/plain", "");
        resp.extra_headers.extend(cors_headers());
        return Ok(resp);
    }

    let (path, _qs) = url.split_once('?').unwrap_or((url, ""));

    match path {
        "/health" if method == ApiMethod::Get => {
            let mut resp = ApiResponse::text(200, "text/plain", "ok\n");
            resp.extra_headers.extend(cors_headers());
            Ok(resp)
        }
        "/api/version" if method == ApiMethod::Get => {
            ok_json(serde_json::json!({"version": env!("CARGO_PKG_VERSION")}))
        }
        "/api/auth/register" if method == ApiMethod::Post => {
            let req: RegisterRequest = parse_json_body(body, "server:auth:register")?;
            if req.password != req.password2 {
                return Err(CanvassError::validation(
                    "password_mismatch",
                    "Password fields didn't match",
                    "server:auth:register",
                )
                .with_context("field", "password2"));
            }
            ok_json(registry.register(&RegisterUser {
                username: req.username,
                email: req.email,
                password: req.password,
                organization_id: req.organization_id,
            })?)
        }
        "/api/auth/login" if method == ApiMethod::Post => {
            let req: LoginRequest = parse_json_body(body, "server:auth:login")?;
            ok_json(registry.login(&req.email, &req.password)?)
        }
        "/api/auth/refresh" if method == ApiMethod::Post => {
            let req: RefreshRequest = parse_json_body(body, "server:auth:refresh")?;
            ok_json(registry.refresh(&req.refresh)?)
        }
        "/api/auth/profile" if method == ApiMethod::Get => {
            let user = require_user(registry, authorization, "server:auth:profile")?;
            ok_json(UserView::from(&user))
        }
        "/api/auth/profile" if method == ApiMethod::Post => {
            let user = require_user(registry, authorization, "server:auth:profile")?;
            let req: ProfileUpdateRequest = parse_json_body(body, "server:auth:profile")?;
            ok_json(registry.update_profile(user.id, req.organization_id)?)
        }
        "/api/organizations" if method == ApiMethod::Get => {
            ok_json(registry.list_organizations()?)
        }
        "/api/organizations/create" if method == ApiMethod::Post => {
            let _user = require_user(registry, authorization, "server:organizations:create")?;
            let req: OrganizationCreateRequest =
                parse_json_body(body, "server:organizations:create")?;
            ok_json(registry.create_organization(&req.name)?)
        }
        "/api/surveys" if method == ApiMethod::Get => {
            let user = require_user(registry, authorization, "server:surveys:list")?;
            ok_json(registry.list_surveys(user.id)?)
        }
        "/api/surveys/create" if method == ApiMethod::Post => {
            let user = require_user(registry, authorization, "server:surveys:create")?;
            let draft: SurveyDraft = parse_json_body(body, "server:surveys:create")?;
            ok_json(registry.create_survey(user.id, &draft)?)
        }
        "/api/surveys/update" if method == ApiMethod::Post => {
            let user = require_user(registry, authorization, "server:surveys:update")?;
            let req: SurveyUpdateRequest = parse_json_body(body, "server:surveys:update")?;
            let (survey, _outcome) = registry.update_survey(user.id, req.survey_id, &req.survey)?;
            ok_json(survey)
        }
        "/api/surveys/delete" if method == ApiMethod::Post => {
            let user = require_user(registry, authorization, "server:surveys:delete")?;
            let req: SurveyIdRequest = parse_json_body(body, "server:surveys:delete")?;
            registry.delete_survey(user.id, req.survey_id)?;
            ok_json(serde_json::json!({ "deleted": req.survey_id }))
        }
        "/api/surveys/get" if method == ApiMethod::Get => {
            let user = require_user(registry, authorization, "server:surveys:get")?;
            let query = parse_query(url);
            let survey_id = query_uuid(&query, "survey_id", "server:surveys:get")?;
            ok_json(registry.get_survey(user.id, survey_id)?)
        }
        "/api/surveys/public" if method == ApiMethod::Get => {
            let user = optional_user(registry, authorization)?;
            let query = parse_query(url);
            let survey_id = query_uuid(&query, "survey_id", "server:surveys:public")?;
            ok_json(registry.public_survey(survey_id, user.as_ref())?)
        }
        "/api/responses/create" if method == ApiMethod::Post => {
            let user = optional_user(registry, authorization)?;
            let req: ResponseCreateRequest = parse_json_body(body, "server:responses:create")?;
            ok_json(registry.submit_response(req.survey_id, user.as_ref(), &req.answers)?)
        }
        "/api/responses" if method == ApiMethod::Get => {
            let user = require_user(registry, authorization, "server:responses:list")?;
            let query = parse_query(url);
            let survey_id = match query.get("survey_id") {
                Some(_) => Some(query_uuid(&query, "survey_id", "server:responses:list")?),
                None => None,
            };
            ok_json(registry.list_responses(user.id, survey_id)?)
        }
        "/api/uploads/create" if method == ApiMethod::Post => {
            let user = require_user(registry, authorization, "server:uploads:create")?;
            let req: UploadCreateRequest = parse_json_body(body, "server:uploads:create")?;
            ok_json(registry.create_upload(user.id, &req.filename, req.content.as_bytes())?)
        }
        "/api/analyses" if method == ApiMethod::Get => {
            let user = require_user(registry, authorization, "server:analyses:list")?;
            ok_json(registry.list_analyses(user.id)?)
        }
        "/api/analyses/create" if method == ApiMethod::Post => {
            let user = require_user(registry, authorization, "server:analyses:create")?;
            let draft: AnalysisDraft = parse_json_body(body, "server:analyses:create")?;
            ok_json(registry.create_analysis(&user, &draft)?)
        }
        "/api/analyses/update" if method == ApiMethod::Post => {
            let user = require_user(registry, authorization, "server:analyses:update")?;
            let req: AnalysisUpdateRequest = parse_json_body(body, "server:analyses:update")?;
            ok_json(registry.update_analysis(user.id, req.analysis_id, &req.draft)?)
        }
        "/api/analyses/delete" if method == ApiMethod::Post => {
            let user = require_user(registry, authorization, "server:analyses:delete")?;
            let req: AnalysisIdRequest = parse_json_body(body, "server:analyses:delete")?;
            registry.delete_analysis(user.id, req.analysis_id)?;
            ok_json(serde_json::json!({ "deleted": req.analysis_id }))
        }
        "/api/analyses/get" if method == ApiMethod::Get => {
            let user = require_user(registry, authorization, "server:analyses:get")?;
            let query = parse_query(url);
            let analysis_id = query_uuid(&query, "analysis_id", "server:analyses:get")?;
            ok_json(registry.get_analysis(user.id, analysis_id)?)
        }
        "/api/plot-data" if method == ApiMethod::Post => {
            let user = require_user(registry, authorization, "server:plot-data")?;
            let req: PlotDataRequest = parse_json_body(body, "server:plot-data")?;
            ok_json(registry.plot_data(user.id, req.csv_upload_id, &req.spec)?)
        }
        "/api/groupby" if method == ApiMethod::Post => {
            let user = require_user(registry, authorization, "server:groupby")?;
            let req: GroupByRequest = parse_json_body(body, "server:groupby")?;
            ok_json(registry.group_by_upload(user.id, req.csv_upload_id, &req.columns)?)
        }
        "/api/publish-analysis" if method == ApiMethod::Post => {
            let user = require_user(registry, authorization, "server:publish-analysis")?;
            let req: AnalysisIdRequest = parse_json_body(body, "server:publish-analysis")?;
            let doc = registry.publish_analysis(user.id, req.analysis_id)?;

            let disposition = format!("attachment; filename=\"{}\"", doc.filename);
            let mut resp = ApiResponse::text(200, "application/pdf", doc.bytes);
            resp.extra_headers.push(
                tiny_http::Header::from_bytes(
                    &b"Content-Disposition"[..],
                    disposition.as_bytes(),
                )
                .map_err(|()| {
                    CanvassError::system(
                        "invalid_header",
                        "Content-Disposition header could not be built",
                        "server:publish-analysis",
                    )
                })?,
            );
            resp.extra_headers.extend(cors_headers());
            Ok(resp)
        }
        "/health"
        | "/api/version"
        | "/api/organizations"
        | "/api/surveys"
        | "/api/surveys/get"
        | "/api/surveys/public"
        | "/api/responses"
        | "/api/analyses"
        | "/api/analyses/get" => method_not_allowed(path, method, "GET"),
        "/api/auth/register"
        | "/api/auth/login"
        | "/api/auth/refresh"
        | "/api/organizations/create"
        | "/api/surveys/create"
        | "/api/surveys/update"
        | "/api/surveys/delete"
        | "/api/responses/create"
        | "/api/uploads/create"
        | "/api/analyses/create"
        | "/api/analyses/update"
        | "/api/analyses/delete"
        | "/api/plot-data"
        | "/api/groupby"
        | "/api/publish-analysis" => method_not_allowed(path, method, "POST"),
        "/api/auth/profile" => method_not_allowed(path, method, "GET, POST"),
        _ => {
            let err = CanvassError::not_found(
                "endpoint_not_found",
                format!("Unknown endpoint '{path}'"),
                "server:handle_api_request",
            );
            let wrapped = CliResponse::<()>::error(&err);
            let mut resp = ApiResponse::json(404, &wrapped)?;
            resp.extra_headers.extend(cors_headers());
            Ok(resp)
        }
    }
}

pub fn serve(config: &ServeConfig) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let server = tiny_http::Server::http(&addr)
        .map_err(|e| CanvassError::system("server_bind_failed", e.to_string(), "server:serve"))?;

    eprintln!("canvass serve listening on http://{addr}");

    for mut req in server.incoming_requests() {
        let Some(method) = ApiMethod::from_http(req.method()) else {
            let _ = req.respond(tiny_http::Response::empty(405));
            continue;
        };

        let authorization = req
            .headers()
            .iter()
            .find(|h| h.field.equiv("Authorization"))
            .map(|h| h.value.as_str().to_string());

        let mut request_body = Vec::new();
        if method == ApiMethod::Post {
            let _ = req.as_reader().read_to_end(&mut request_body);
        }

        let response = match handle_api_request(
            method,
            req.url(),
            authorization.as_deref(),
            if request_body.is_empty() {
                None
            } else {
                Some(request_body.as_slice())
            },
        ) {
            Ok(r) => r,
            Err(e) => {
                let wrapped = CliResponse::<()>::error(&e);
                match ApiResponse::json(e.http_status(), &wrapped) {
                    Ok(mut r) => {
                        r.extra_headers.extend(cors_headers());
                        r
                    }
                    Err(_) => ApiResponse::text(500, "text/plain", "internal error\n"),
                }
            }
        };

        let mut tiny = tiny_http::Response::from_data(response.body)
            .with_status_code(response.status_code)
            .with_header(
                tiny_http::Header::from_bytes(
                    &b"Content-Type"[..],
                    response.content_type.as_bytes(),
                )
                .expect("content-type header"),
            );

        for h in response.extra_headers {
            tiny = tiny.with_header(h);
        }

        let _ = req.respond(tiny);
    }

    Ok(())
}
