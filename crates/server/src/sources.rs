//! Source API endpoints

use api_types::{
    allocation::AllocationListResponse,
    source::{SourceNew, SourceSummaryView, SourceView, SourceVoid},
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection, rejection::PathRejection},
    http::StatusCode,
};
use engine::NewSource;
use uuid::Uuid;

use crate::{
    ServerError,
    server::ServerState,
    views::{allocation_view, money, optional_json, source_kind_from_api, source_view, utc_or_now},
};

pub async fn register(
    State(state): State<ServerState>,
    payload: Result<Json<SourceNew>, JsonRejection>,
) -> Result<(StatusCode, Json<SourceView>), ServerError> {
    let Json(payload) = payload?;
    let mut new = NewSource::new(
        source_kind_from_api(payload.kind),
        money(payload.total_minor, payload.currency),
    )
    .issued_at(utc_or_now(payload.issued_at));
    if let Some(reference) = payload.reference {
        new = new.reference(reference);
    }

    let source = state.engine.register_source(new).await?;
    Ok((StatusCode::CREATED, Json(source_view(&source))))
}

pub async fn summary(
    State(state): State<ServerState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SourceSummaryView>, ServerError> {
    let Path(id) = id?;
    let summary = state.engine.source_summary(id).await?;
    Ok(Json(SourceSummaryView {
        source: source_view(&summary.source),
        applied_minor: summary.applied.amount_minor(),
        remaining_minor: summary.remaining.amount_minor(),
        active_allocations: summary.active_allocations,
    }))
}

pub async fn void(
    State(state): State<ServerState>,
    id: Result<Path<Uuid>, PathRejection>,
    body: Bytes,
) -> Result<Json<SourceView>, ServerError> {
    let Path(id) = id?;
    let payload: SourceVoid = optional_json(&body)?;
    let source = state
        .engine
        .void_source(id, utc_or_now(payload.voided_at))
        .await?;
    Ok(Json(source_view(&source)))
}

pub async fn allocations(
    State(state): State<ServerState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AllocationListResponse>, ServerError> {
    let Path(id) = id?;
    let allocations = state.engine.list_allocations_for_source(id).await?;
    Ok(Json(AllocationListResponse {
        allocations: allocations.iter().map(allocation_view).collect(),
    }))
}
