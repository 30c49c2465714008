//! API request handlers

use crate::adapters::{
    Contact, ContactInput, DataRetentionSettings, Deal, DealStage, NewDeal, NewTemplate,
    RecurringTaskTemplate, RetentionInput,
};
use crate::api::extractor::Principal;
use crate::dashboard::DashboardSummary;
use crate::error::CrmError;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared application state
pub type ApiState = Arc<AppState>;

// ============================================================================
// Health check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Body returned for a newly created document
#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub id: String,
}

fn created(id: String) -> (StatusCode, Json<CreatedResponse>) {
    (StatusCode::CREATED, Json(CreatedResponse { id }))
}

// ============================================================================
// Recurring task templates
// ============================================================================

pub async fn list_templates(
    State(state): State<ApiState>,
    Principal(owner): Principal,
) -> Result<Json<Vec<RecurringTaskTemplate>>, AppError> {
    Ok(Json(state.templates.list(&owner).await?))
}

pub async fn create_template(
    State(state): State<ApiState>,
    Principal(owner): Principal,
    Json(req): Json<NewTemplate>,
) -> Result<impl IntoResponse, AppError> {
    let id = state.templates.add(&owner, req).await?;
    Ok(created(id))
}

pub async fn delete_template(
    State(state): State<ApiState>,
    Principal(owner): Principal,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.templates.delete(&owner, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Data retention
// ============================================================================

pub async fn get_retention(
    State(state): State<ApiState>,
    Principal(owner): Principal,
) -> Result<Json<DataRetentionSettings>, AppError> {
    state
        .retention
        .get(&owner)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("No retention settings saved".to_string()))
}

pub async fn save_retention(
    State(state): State<ApiState>,
    Principal(owner): Principal,
    Json(req): Json<RetentionInput>,
) -> Result<Json<DataRetentionSettings>, AppError> {
    Ok(Json(state.retention.save(&owner, req).await?))
}

// ============================================================================
// Contacts
// ============================================================================

pub async fn list_contacts(
    State(state): State<ApiState>,
    Principal(owner): Principal,
) -> Result<Json<Vec<Contact>>, AppError> {
    Ok(Json(state.contacts.list(&owner).await?))
}

pub async fn create_contact(
    State(state): State<ApiState>,
    Principal(owner): Principal,
    Json(req): Json<ContactInput>,
) -> Result<impl IntoResponse, AppError> {
    let id = state.contacts.add(&owner, req).await?;
    Ok(created(id))
}

pub async fn update_contact(
    State(state): State<ApiState>,
    Principal(owner): Principal,
    Path(id): Path<String>,
    Json(req): Json<ContactInput>,
) -> Result<Json<Contact>, AppError> {
    Ok(Json(state.contacts.update(&owner, &id, req).await?))
}

pub async fn delete_contact(
    State(state): State<ApiState>,
    Principal(owner): Principal,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.contacts.delete(&owner, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Deals
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoveStageRequest {
    pub stage: DealStage,
}

pub async fn list_deals(
    State(state): State<ApiState>,
    Principal(owner): Principal,
) -> Result<Json<Vec<Deal>>, AppError> {
    Ok(Json(state.deals.list(&owner).await?))
}

pub async fn create_deal(
    State(state): State<ApiState>,
    Principal(owner): Principal,
    Json(req): Json<NewDeal>,
) -> Result<impl IntoResponse, AppError> {
    let id = state.deals.add(&owner, req).await?;
    Ok(created(id))
}

pub async fn move_deal_stage(
    State(state): State<ApiState>,
    Principal(owner): Principal,
    Path(id): Path<String>,
    Json(req): Json<MoveStageRequest>,
) -> Result<Json<Deal>, AppError> {
    Ok(Json(state.deals.move_stage(&owner, &id, req.stage).await?))
}

pub async fn delete_deal(
    State(state): State<ApiState>,
    Principal(owner): Principal,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.deals.delete(&owner, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Dashboard
// ============================================================================

pub async fn get_dashboard(
    State(state): State<ApiState>,
    Principal(owner): Principal,
) -> Result<Json<DashboardSummary>, AppError> {
    let (contacts, deals) = tokio::try_join!(state.contacts.list(&owner), state.deals.list(&owner))?;
    Ok(Json(DashboardSummary::compute(
        &contacts,
        &deals,
        chrono::Utc::now(),
    )))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<CrmError> for AppError {
    fn from(err: CrmError) -> Self {
        let message = err.to_string();
        match err {
            CrmError::InvalidArgument(_) => AppError::BadRequest(message),
            CrmError::NotFound(_) => AppError::NotFound(message),
            CrmError::PermissionDenied(_) => AppError::Forbidden(message),
            CrmError::Unavailable(_) => AppError::Unavailable(message),
            CrmError::MalformedRecord { .. } => AppError::Internal(anyhow::Error::new(err)),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}
