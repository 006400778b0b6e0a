// HTTP request handlers
use crate::application::errors::SchedulerError;
use crate::presentation::app_state::AppState;
use crate::presentation::dto::{
    machine_details_to_dto, machine_set_to_dto, machine_to_dto, transition_to_dto, ErrorDto,
    MachineDetailsDto, MachineDto, MachineSetDto, RefreshDto, TransitionDto,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

pub enum ApiError {
    NotFound(usize),
    Unavailable(String),
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::UnknownMachine(index) => ApiError::NotFound(index),
            other => ApiError::Unavailable(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::NotFound(index) => (StatusCode::NOT_FOUND, format!("no machine at index {}", index)),
            ApiError::Unavailable(reason) => {
                tracing::warn!("Refresh rejected: {}", reason);
                (StatusCode::SERVICE_UNAVAILABLE, reason)
            }
        };
        (status, Json(ErrorDto { error })).into_response()
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Latest published set of all machines
pub async fn list_machines(State(state): State<Arc<AppState>>) -> Json<MachineSetDto> {
    let set = state.machine_service.get_all_machines();
    Json(machine_set_to_dto(&set))
}

/// One machine with its time shares; keeps the machine on the detail cadence
pub async fn machine_details(
    Path(index): Path<usize>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<MachineDetailsDto>, ApiError> {
    state
        .machine_service
        .get_machine_details(index)
        .map(|machine| Json(machine_details_to_dto(&machine)))
        .ok_or(ApiError::NotFound(index))
}

/// Run an extra poll cycle over every machine
pub async fn refresh_machines(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshDto>, ApiError> {
    let cycle = state.machine_service.request_refresh().await?;
    Ok(Json(RefreshDto { cycle }))
}

/// Re-read a single machine now
pub async fn refresh_machine(
    Path(index): Path<usize>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<MachineDto>, ApiError> {
    let machine = state.machine_service.request_detail_refresh(index).await?;
    Ok(Json(machine_to_dto(&machine)))
}

/// Recent state transitions, oldest first
pub async fn machine_history(
    Path(index): Path<usize>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TransitionDto>>, ApiError> {
    let history = state
        .machine_service
        .machine_history(index)
        .ok_or(ApiError::NotFound(index))?;
    Ok(Json(history.iter().map(transition_to_dto).collect()))
}
