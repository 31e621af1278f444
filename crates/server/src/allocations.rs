//! Allocation API endpoints

use api_types::allocation::{
    AllocationDetailResponse, AllocationListResponse, AllocationNew, AllocationReverse,
    AllocationView, BatchNew,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection, rejection::PathRejection},
    http::StatusCode,
};
use axum_extra::TypedHeader;
use engine::{AllocateCmd, BatchAllocateCmd, ReverseCmd};
use uuid::Uuid;

use crate::{
    ServerError,
    server::{IdempotencyKey, ServerState},
    views::{allocation_view, money, optional_json, reversal_view, utc_or_now},
};

pub async fn allocate(
    State(state): State<ServerState>,
    idempotency_key: Option<TypedHeader<IdempotencyKey>>,
    payload: Result<Json<AllocationNew>, JsonRejection>,
) -> Result<(StatusCode, Json<AllocationView>), ServerError> {
    let Json(payload) = payload?;
    let mut cmd = AllocateCmd::new(
        payload.source_id,
        payload.target_id,
        money(payload.amount_minor, payload.currency),
    )
    .occurred_at(utc_or_now(payload.occurred_at));
    if let Some(note) = payload.note {
        cmd = cmd.note(note);
    }
    if let Some(TypedHeader(IdempotencyKey(key))) = idempotency_key {
        cmd = cmd.idempotency_key(key);
    }

    let allocation = state.engine.allocate(cmd).await?;
    Ok((StatusCode::CREATED, Json(allocation_view(&allocation))))
}

pub async fn allocate_batch(
    State(state): State<ServerState>,
    idempotency_key: Option<TypedHeader<IdempotencyKey>>,
    payload: Result<Json<BatchNew>, JsonRejection>,
) -> Result<(StatusCode, Json<AllocationListResponse>), ServerError> {
    let Json(payload) = payload?;
    if payload.items.is_empty() {
        return Err(ServerError::Generic("items must not be empty".to_string()));
    }

    let mut cmd = payload.items.into_iter().fold(
        BatchAllocateCmd::new().occurred_at(utc_or_now(payload.occurred_at)),
        |cmd, item| {
            cmd.item(
                item.source_id,
                item.target_id,
                money(item.amount_minor, item.currency),
            )
        },
    );
    if let Some(note) = payload.note {
        cmd = cmd.note(note);
    }
    if let Some(TypedHeader(IdempotencyKey(key))) = idempotency_key {
        cmd = cmd.idempotency_key(key);
    }

    let allocations = state.engine.allocate_batch(cmd).await?;
    Ok((
        StatusCode::CREATED,
        Json(AllocationListResponse {
            allocations: allocations.iter().map(allocation_view).collect(),
        }),
    ))
}

pub async fn detail(
    State(state): State<ServerState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<AllocationDetailResponse>, ServerError> {
    let Path(id) = id?;
    let allocation = state.engine.allocation(id).await?;
    let reversals = state.engine.reversals_for(id).await?;
    Ok(Json(AllocationDetailResponse {
        allocation: allocation_view(&allocation),
        reversals: reversals.iter().map(reversal_view).collect(),
    }))
}

pub async fn reverse(
    State(state): State<ServerState>,
    id: Result<Path<Uuid>, PathRejection>,
    idempotency_key: Option<TypedHeader<IdempotencyKey>>,
    body: Bytes,
) -> Result<Json<AllocationView>, ServerError> {
    let Path(id) = id?;
    let payload: AllocationReverse = optional_json(&body)?;

    let mut cmd = ReverseCmd::new(id).occurred_at(utc_or_now(payload.occurred_at));
    if let Some(amount_minor) = payload.amount_minor {
        // The amount is in the allocation's currency.
        let allocation = state.engine.allocation(id).await?;
        cmd = cmd.amount(engine::Money::new(amount_minor, allocation.currency()));
    }
    if let Some(reason) = payload.reason {
        cmd = cmd.reason(reason);
    }
    if let Some(TypedHeader(IdempotencyKey(key))) = idempotency_key {
        cmd = cmd.idempotency_key(key);
    }

    let allocation = state.engine.reverse(cmd).await?;
    Ok(Json(allocation_view(&allocation)))
}
