use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use crate::monitor::ScheduleRegistry;
use crate::store_manager::StoreHandle;
use shared::protocol::{API_PREFIX, HISTORY_CHART_LIMIT};
use shared::types::{HistoryRecord, NewService, OwnerId, Service, ServiceConfig, ServiceId};

#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub scheduler: ScheduleRegistry,
}

#[derive(Deserialize)]
pub struct ServiceQuery {
    pub owner: Option<OwnerId>,
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub id: ServiceId,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub scheduled: usize,
}

type ApiError = (StatusCode, String);

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/services", get(list_services).post(create_service))
        .route(
            "/services/:id",
            get(get_service).put(update_service).delete(delete_service),
        )
        .route("/services/:id/history", get(get_history));

    Router::new().nest(API_PREFIX, api).with_state(state)
}

fn internal(context: &str, e: anyhow::Error) -> ApiError {
    tracing::error!("{}: {:#}", context, e);
    (StatusCode::INTERNAL_SERVER_ERROR, context.to_string())
}

fn not_found() -> ApiError {
    (StatusCode::NOT_FOUND, "Service not found".to_string())
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        scheduled: state.scheduler.active_count(),
    })
}

async fn list_services(
    State(state): State<AppState>,
    Query(params): Query<ServiceQuery>,
) -> Result<Json<Vec<Service>>, ApiError> {
    let services = match params.owner {
        Some(owner_id) => state.store.get_by_owner(owner_id).await,
        None => state.store.get_all().await,
    };

    services
        .map(Json)
        .map_err(|e| internal("Error fetching services", e))
}

async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<Service>, ApiError> {
    state
        .store
        .get_one(id)
        .await
        .map_err(|e| internal("Error fetching service", e))?
        .map(Json)
        .ok_or_else(not_found)
}

async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    let exists = state
        .store
        .get_one(id)
        .await
        .map_err(|e| internal("Error fetching service", e))?
        .is_some();
    if !exists {
        return Err(not_found());
    }

    state
        .store
        .recent_history(id, HISTORY_CHART_LIMIT)
        .await
        .map(Json)
        .map_err(|e| internal("Error fetching service history", e))
}

async fn create_service(
    State(state): State<AppState>,
    Json(new): Json<NewService>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    new.config
        .validate()
        .map_err(|msg| (StatusCode::BAD_REQUEST, msg))?;

    let service = state
        .store
        .insert(new)
        .await
        .map_err(|e| internal("Error adding service", e))?;

    let id = service.id;
    state.scheduler.schedule(service);
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn update_service(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
    Json(config): Json<ServiceConfig>,
) -> Result<Json<Service>, ApiError> {
    config
        .validate()
        .map_err(|msg| (StatusCode::BAD_REQUEST, msg))?;

    let service = state
        .store
        .update_config(id, config)
        .await
        .map_err(|e| internal("Error updating service", e))?
        .ok_or_else(not_found)?;

    state.scheduler.schedule(service.clone());
    Ok(Json(service))
}

async fn delete_service(
    State(state): State<AppState>,
    Path(id): Path<ServiceId>,
) -> Result<StatusCode, ApiError> {
    let deleted = state
        .store
        .delete(id)
        .await
        .map_err(|e| internal("Error deleting service", e))?;

    // The row is gone first, so an in-flight check can no longer write
    state.scheduler.cancel(id);

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found())
    }
}
