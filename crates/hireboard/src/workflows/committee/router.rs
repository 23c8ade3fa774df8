use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{
    ApplicationId, CommitteeId, CommitteePolicy, FeedbackSubmission, PanelSeat, ReviewerId,
    StaffRole, TemplateId,
};
use super::instance::StateError;
use super::notify::Notifier;
use super::repository::{CommitteeStore, RepositoryError, StaffDirectory};
use super::service::{CommitteeService, CommitteeServiceError};
use super::template::{CatalogError, TemplateCatalog, TemplateDraft};
use super::token::TokenError;

/// Identity injected by the authenticated staff boundary. Authentication
/// itself happens upstream; this layer only enforces roles.
#[derive(Debug, Clone)]
pub struct StaffIdentity {
    pub staff_id: String,
    pub role: StaffRole,
}

fn staff_identity(headers: &HeaderMap) -> Result<StaffIdentity, Response> {
    let staff_id = headers
        .get("x-staff-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let role = headers
        .get("x-staff-role")
        .and_then(|value| value.to_str().ok())
        .and_then(StaffRole::parse);

    match (staff_id, role) {
        (Some(staff_id), Some(role)) => Ok(StaffIdentity { staff_id, role }),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            axum::Json(json!({ "error": "staff identity is required" })),
        )
            .into_response()),
    }
}

fn require_manage(headers: &HeaderMap) -> Result<StaffIdentity, Response> {
    let identity = staff_identity(headers)?;
    if identity.role.can_manage_committees() {
        Ok(identity)
    } else {
        Err(permission_denied())
    }
}

fn require_dissolve(headers: &HeaderMap) -> Result<StaffIdentity, Response> {
    let identity = staff_identity(headers)?;
    if identity.role.can_dissolve_committees() {
        Ok(identity)
    } else {
        Err(permission_denied())
    }
}

fn permission_denied() -> Response {
    (
        StatusCode::FORBIDDEN,
        axum::Json(json!({ "error": "permission denied for this role" })),
    )
        .into_response()
}

fn service_error_response(error: CommitteeServiceError) -> Response {
    let (status, message) = match &error {
        CommitteeServiceError::Validation(inner) => {
            (StatusCode::UNPROCESSABLE_ENTITY, inner.to_string())
        }
        CommitteeServiceError::Token(TokenError::NotFound) => {
            (StatusCode::NOT_FOUND, error.to_string())
        }
        CommitteeServiceError::Token(TokenError::Expired) => {
            (StatusCode::GONE, error.to_string())
        }
        CommitteeServiceError::Token(TokenError::AlreadyUsed) => {
            (StatusCode::CONFLICT, error.to_string())
        }
        CommitteeServiceError::State(StateError::MemberNotFound(_)) => {
            (StatusCode::NOT_FOUND, error.to_string())
        }
        CommitteeServiceError::State(_) => (StatusCode::CONFLICT, error.to_string()),
        CommitteeServiceError::Repository(RepositoryError::NotFound) => {
            (StatusCode::NOT_FOUND, "committee not found".to_string())
        }
        CommitteeServiceError::Repository(RepositoryError::DuplicateCommittee) => {
            (StatusCode::CONFLICT, error.to_string())
        }
        CommitteeServiceError::Repository(RepositoryError::Conflict) => {
            (StatusCode::CONFLICT, error.to_string())
        }
        CommitteeServiceError::Repository(RepositoryError::Unavailable(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
        CommitteeServiceError::ResendLimitReached { .. }
        | CommitteeServiceError::ResendCoolingDown => {
            (StatusCode::TOO_MANY_REQUESTS, error.to_string())
        }
    };

    (status, axum::Json(json!({ "error": message }))).into_response()
}

fn catalog_error_response(error: CatalogError) -> Response {
    let (status, message) = match &error {
        CatalogError::Validation(inner) => (StatusCode::UNPROCESSABLE_ENTITY, inner.to_string()),
        CatalogError::Repository(RepositoryError::NotFound) => {
            (StatusCode::NOT_FOUND, "template not found".to_string())
        }
        CatalogError::Repository(RepositoryError::Conflict) => {
            (StatusCode::CONFLICT, error.to_string())
        }
        CatalogError::Repository(_) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    };

    (status, axum::Json(json!({ "error": message }))).into_response()
}

/// Router builder for the unauthenticated feedback surface.
pub fn feedback_router<S, D, N>(service: Arc<CommitteeService<S, D, N>>) -> Router
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    Router::new()
        .route("/api/v1/feedback/:token", get(verify_handler::<S, D, N>))
        .route("/api/v1/feedback", post(submit_handler::<S, D, N>))
        .route(
            "/api/v1/feedback/decline",
            post(decline_handler::<S, D, N>),
        )
        .with_state(service)
}

/// Router builder for the staff-facing committee surface plus the
/// scheduler trigger.
pub fn committee_router<S, D, N>(service: Arc<CommitteeService<S, D, N>>) -> Router
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    Router::new()
        .route(
            "/api/v1/committees/template",
            post(assign_template_handler::<S, D, N>),
        )
        .route(
            "/api/v1/committees/custom",
            post(assign_custom_handler::<S, D, N>),
        )
        .route(
            "/api/v1/applications/:application_id/committee",
            get(committee_for_application_handler::<S, D, N>),
        )
        .route(
            "/api/v1/committees/:committee_id/members",
            post(add_member_handler::<S, D, N>),
        )
        .route(
            "/api/v1/committees/:committee_id/members/:reviewer_id",
            delete(remove_member_handler::<S, D, N>),
        )
        .route(
            "/api/v1/committees/:committee_id/members/:reviewer_id/resend",
            post(resend_link_handler::<S, D, N>),
        )
        .route(
            "/api/v1/committees/:committee_id/cancel",
            post(cancel_handler::<S, D, N>),
        )
        .route(
            "/api/v1/committees/:committee_id/reminders",
            post(manual_reminders_handler::<S, D, N>),
        )
        .route(
            "/api/v1/committees/reminders/run",
            post(reminder_sweep_handler::<S, D, N>),
        )
        .with_state(service)
}

/// Router builder for template administration.
pub fn template_router<S>(catalog: Arc<TemplateCatalog<S>>) -> Router
where
    S: CommitteeStore + 'static,
{
    Router::new()
        .route(
            "/api/v1/committee-templates",
            post(create_template_handler::<S>).get(list_templates_handler::<S>),
        )
        .route(
            "/api/v1/committee-templates/:template_id",
            get(get_template_handler::<S>).put(update_template_handler::<S>),
        )
        .route(
            "/api/v1/committee-templates/:template_id/deactivate",
            post(deactivate_template_handler::<S>),
        )
        .with_state(catalog)
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitFeedbackRequest {
    pub(crate) token: String,
    #[serde(flatten)]
    pub(crate) submission: FeedbackSubmission,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenOnlyRequest {
    pub(crate) token: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignTemplateRequest {
    pub(crate) application_id: String,
    pub(crate) template_id: String,
    #[serde(default)]
    pub(crate) policy_override: Option<CommitteePolicy>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssignCustomRequest {
    pub(crate) application_id: String,
    pub(crate) members: Vec<PanelSeat>,
    #[serde(default)]
    pub(crate) policy: CommitteePolicy,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CancelRequest {
    pub(crate) reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResendRequest {
    #[serde(default)]
    pub(crate) force: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct TemplateListQuery {
    pub(crate) category: Option<String>,
    #[serde(default)]
    pub(crate) include_inactive: bool,
}

pub(crate) async fn verify_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    Path(token): Path<String>,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    match service.verify_token(&token) {
        Ok(context) => (StatusCode::OK, axum::Json(context)).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn submit_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    axum::Json(request): axum::Json<SubmitFeedbackRequest>,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    match service.submit_feedback(&request.token, request.submission) {
        Ok(instance) => {
            let payload = json!({
                "status": "received",
                "committee_status": instance.status.label(),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn decline_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    axum::Json(request): axum::Json<TokenOnlyRequest>,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    match service.decline_feedback(&request.token) {
        Ok(_) => (StatusCode::OK, axum::Json(json!({ "status": "declined" }))).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn assign_template_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<AssignTemplateRequest>,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    let identity = match require_manage(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    match service.assign_from_template(
        ApplicationId(request.application_id),
        &TemplateId(request.template_id),
        request.policy_override,
        &identity.staff_id,
    ) {
        Ok(instance) => {
            (StatusCode::CREATED, axum::Json(instance.status_view())).into_response()
        }
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn assign_custom_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<AssignCustomRequest>,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    let identity = match require_manage(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    match service.assign_custom(
        ApplicationId(request.application_id),
        request.members,
        request.policy,
        &identity.staff_id,
    ) {
        Ok(instance) => {
            (StatusCode::CREATED, axum::Json(instance.status_view())).into_response()
        }
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn committee_for_application_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    if let Err(response) = require_manage(&headers) {
        return response;
    }

    match service.get_by_application(&ApplicationId(application_id.clone())) {
        Ok(Some(instance)) => (StatusCode::OK, axum::Json(instance.status_view())).into_response(),
        Ok(None) => {
            let payload = json!({
                "application_id": application_id,
                "committee": serde_json::Value::Null,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn add_member_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    headers: HeaderMap,
    Path(committee_id): Path<String>,
    axum::Json(seat): axum::Json<PanelSeat>,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    let identity = match require_manage(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    match service.add_member(&CommitteeId(committee_id), seat, &identity.staff_id) {
        Ok(instance) => (StatusCode::OK, axum::Json(instance.status_view())).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn remove_member_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    headers: HeaderMap,
    Path((committee_id, reviewer_id)): Path<(String, String)>,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    let identity = match require_dissolve(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    match service.remove_member(
        &CommitteeId(committee_id),
        &ReviewerId(reviewer_id),
        &identity.staff_id,
    ) {
        Ok(instance) => (StatusCode::OK, axum::Json(instance.status_view())).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn resend_link_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    headers: HeaderMap,
    Path((committee_id, reviewer_id)): Path<(String, String)>,
    axum::Json(request): axum::Json<ResendRequest>,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    let identity = match require_manage(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    match service.resend_link(
        &CommitteeId(committee_id),
        &ReviewerId(reviewer_id),
        request.force,
        &identity.staff_id,
    ) {
        Ok(token) => {
            let payload = json!({
                "status": "sent",
                "expires_at": token.expires_at,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn cancel_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    headers: HeaderMap,
    Path(committee_id): Path<String>,
    axum::Json(request): axum::Json<CancelRequest>,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    let identity = match require_dissolve(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    match service.cancel(&CommitteeId(committee_id), &identity.staff_id, &request.reason) {
        Ok(instance) => (StatusCode::OK, axum::Json(instance.status_view())).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn manual_reminders_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    headers: HeaderMap,
    Path(committee_id): Path<String>,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    let identity = match require_manage(&headers) {
        Ok(identity) => identity,
        Err(response) => return response,
    };

    match service.send_reminders(&CommitteeId(committee_id), &identity.staff_id) {
        Ok(sent) => (StatusCode::OK, axum::Json(json!({ "reminders_sent": sent }))).into_response(),
        Err(error) => service_error_response(error),
    }
}

/// Invoked by the external periodic scheduler, authenticated by a shared
/// secret rather than a user session.
pub(crate) async fn reminder_sweep_handler<S, D, N>(
    State(service): State<Arc<CommitteeService<S, D, N>>>,
    headers: HeaderMap,
) -> Response
where
    S: CommitteeStore + 'static,
    D: StaffDirectory + 'static,
    N: Notifier + 'static,
{
    let supplied = headers
        .get("x-scheduler-secret")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if supplied != service.settings().scheduler_secret {
        return (
            StatusCode::FORBIDDEN,
            axum::Json(json!({ "error": "invalid scheduler secret" })),
        )
            .into_response();
    }

    match service.run_reminder_sweep("scheduler") {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => service_error_response(error),
    }
}

pub(crate) async fn create_template_handler<S>(
    State(catalog): State<Arc<TemplateCatalog<S>>>,
    headers: HeaderMap,
    axum::Json(draft): axum::Json<TemplateDraft>,
) -> Response
where
    S: CommitteeStore + 'static,
{
    if let Err(response) = require_manage(&headers) {
        return response;
    }

    match catalog.create(draft) {
        Ok(template) => (StatusCode::CREATED, axum::Json(template)).into_response(),
        Err(error) => catalog_error_response(error),
    }
}

pub(crate) async fn list_templates_handler<S>(
    State(catalog): State<Arc<TemplateCatalog<S>>>,
    headers: HeaderMap,
    Query(query): Query<TemplateListQuery>,
) -> Response
where
    S: CommitteeStore + 'static,
{
    if let Err(response) = require_manage(&headers) {
        return response;
    }

    match catalog.list(query.category.as_deref(), query.include_inactive) {
        Ok(templates) => (StatusCode::OK, axum::Json(templates)).into_response(),
        Err(error) => catalog_error_response(error),
    }
}

pub(crate) async fn get_template_handler<S>(
    State(catalog): State<Arc<TemplateCatalog<S>>>,
    headers: HeaderMap,
    Path(template_id): Path<String>,
) -> Response
where
    S: CommitteeStore + 'static,
{
    if let Err(response) = require_manage(&headers) {
        return response;
    }

    match catalog.get(&TemplateId(template_id)) {
        Ok(template) => (StatusCode::OK, axum::Json(template)).into_response(),
        Err(error) => catalog_error_response(error),
    }
}

pub(crate) async fn update_template_handler<S>(
    State(catalog): State<Arc<TemplateCatalog<S>>>,
    headers: HeaderMap,
    Path(template_id): Path<String>,
    axum::Json(draft): axum::Json<TemplateDraft>,
) -> Response
where
    S: CommitteeStore + 'static,
{
    if let Err(response) = require_manage(&headers) {
        return response;
    }

    match catalog.update(&TemplateId(template_id), draft) {
        Ok(template) => (StatusCode::OK, axum::Json(template)).into_response(),
        Err(error) => catalog_error_response(error),
    }
}

pub(crate) async fn deactivate_template_handler<S>(
    State(catalog): State<Arc<TemplateCatalog<S>>>,
    headers: HeaderMap,
    Path(template_id): Path<String>,
) -> Response
where
    S: CommitteeStore + 'static,
{
    if let Err(response) = require_dissolve(&headers) {
        return response;
    }

    match catalog.deactivate(&TemplateId(template_id)) {
        Ok(template) => (StatusCode::OK, axum::Json(template)).into_response(),
        Err(error) => catalog_error_response(error),
    }
}
