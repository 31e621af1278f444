use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::IntoResponse,
};
use engine::{EngineError, ErrorKind};

use serde::Serialize;
pub use server::{router, run_with_listener};

mod allocations;
mod server;
mod sources;
mod statistics;
mod targets;
mod views;

pub mod types {
    pub use api_types::{Currency, ErrorResponse};

    pub mod source {
        pub use api_types::source::{
            SourceKind, SourceNew, SourceStatus, SourceSummaryView, SourceView, SourceVoid,
        };
    }

    pub mod target {
        pub use api_types::target::{TargetKind, TargetNew, TargetStatus, TargetView};
    }

    pub mod allocation {
        pub use api_types::allocation::{
            AllocationDetailResponse, AllocationListResponse, AllocationNew, AllocationReverse,
            AllocationStatus, AllocationView, BatchItem, BatchNew, ReversalView,
        };
    }

    pub mod stats {
        pub use api_types::stats::{
            ConvertedStatistic, CurrencyStatistic, Rate, Statistics, StatisticsQuery,
        };
    }
}

pub enum ServerError {
    Engine(EngineError),
    Generic(String),
}

#[derive(Serialize)]
struct Error {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
}

fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::IdempotencyKeyReused => StatusCode::CONFLICT,
        ErrorKind::Database => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::InvalidId => StatusCode::BAD_REQUEST,
        ErrorKind::CurrencyMismatch
        | ErrorKind::InsufficientSourceBalance
        | ErrorKind::TargetOverAllocation
        | ErrorKind::SourceClosed
        | ErrorKind::TargetClosed
        | ErrorKind::AlreadyReversed
        | ErrorKind::ExcessiveReversal
        | ErrorKind::SourceHasActiveAllocations
        | ErrorKind::InvalidAmount
        | ErrorKind::RateUnavailable
        | ErrorKind::BatchRejected => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn message_for_engine_error(err: EngineError) -> String {
    match err {
        EngineError::Database(db_err) => {
            tracing::error!("database error: {db_err}");
            "internal server error".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ServerError::Engine(err) => {
                // A rejected batch answers with the status of the failing item.
                let kind = err.root_kind();
                let index = match &err {
                    EngineError::BatchRejected { index, .. } => Some(*index),
                    _ => None,
                };
                let body = Error {
                    error: message_for_engine_error(err),
                    kind: Some(kind),
                    index,
                };
                (status_for_kind(kind), body)
            }
            ServerError::Generic(error) => (
                StatusCode::BAD_REQUEST,
                Error {
                    error,
                    kind: None,
                    index: None,
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ServerError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

impl From<JsonRejection> for ServerError {
    fn from(value: JsonRejection) -> Self {
        Self::Generic(value.body_text())
    }
}

impl From<PathRejection> for ServerError {
    fn from(value: PathRejection) -> Self {
        Self::Generic(value.body_text())
    }
}
