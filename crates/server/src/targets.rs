//! Target API endpoints

use api_types::{
    allocation::AllocationListResponse,
    target::{TargetNew, TargetView},
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection, rejection::PathRejection},
    http::StatusCode,
};
use engine::NewTarget;
use uuid::Uuid;

use crate::{
    ServerError,
    server::ServerState,
    views::{allocation_view, money, target_kind_from_api, target_view, utc_or_now},
};

pub async fn register(
    State(state): State<ServerState>,
    payload: Result<Json<TargetNew>, JsonRejection>,
) -> Result<(StatusCode, Json<TargetView>), ServerError> {
    let Json(payload) = payload?;
    let mut new = NewTarget::new(
        target_kind_from_api(payload.kind),
        money(payload.outstanding_minor, payload.currency),
    )
    .created_at(utc_or_now(payload.created_at));
    if let Some(reference) = payload.reference {
        new = new.reference(reference);
    }

    let target = state.engine.register_target(new).await?;
    Ok((StatusCode::CREATED, Json(target_view(&target))))
}

pub async fn get(
    State(state): State<ServerState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<TargetView>, ServerError> {
    let Path(id) = id?;
    let target = state.engine.get_target(id).await?;
    Ok(Json(target_view(&target)))
}

pub async fn close(
    State(state): State<ServerState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<TargetView>, ServerError> {
    let Path(id) = id?;
    let target = state.engine.close_target(id).await?;
    Ok(Json(target_view(&target)))
}

pub async fn reopen(
    State(state): State<ServerState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<TargetView>, ServerError> {
    let Path(id) = id?;
    let target = state.engine.reopen_target(id).await?;
    Ok(Json(target_view(&target)))
}

pub async fn allocations(
    State(state): State<ServerState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AllocationListResponse>, ServerError> {
    let Path(id) = id?;
    let allocations = state.engine.list_allocations_for_target(id).await?;
    Ok(Json(AllocationListResponse {
        allocations: allocations.iter().map(allocation_view).collect(),
    }))
}
