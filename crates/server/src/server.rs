use axum::{
    Router,
    routing::{get, post},
};
use axum_extra::headers::{Error as AxumError, Header};

use std::sync::Arc;

use crate::{allocations, sources, statistics, targets};
use engine::Engine;

static IDEMPOTENCY_KEY_HEADER: axum::http::HeaderName =
    axum::http::HeaderName::from_static("idempotency-key");

#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<Engine>,
}

/// `TypedHeader` for the optional `Idempotency-Key` request header.
///
/// A repeated write carrying the same key returns the result of the first
/// one instead of applying it twice.
#[derive(Debug)]
pub(crate) struct IdempotencyKey(pub String);

impl Header for IdempotencyKey {
    fn name() -> &'static axum::http::HeaderName {
        &IDEMPOTENCY_KEY_HEADER
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, AxumError>
    where
        Self: Sized,
        I: Iterator<Item = &'i axum::http::HeaderValue>,
    {
        let value = values.next().ok_or_else(AxumError::invalid)?;
        let Ok(value) = value.to_str() else {
            return Err(AxumError::invalid());
        };
        let value = value.trim();
        if value.is_empty() {
            return Err(AxumError::invalid());
        }

        Ok(IdempotencyKey(value.to_string()))
    }

    fn encode<E: Extend<axum::http::HeaderValue>>(&self, values: &mut E) {
        match axum::http::HeaderValue::from_str(&self.0) {
            Ok(value) => values.extend(std::iter::once(value)),
            Err(_) => tracing::error!("failed to encode idempotency-key header"),
        }
    }
}

pub fn router(engine: Arc<Engine>) -> Router {
    let state = ServerState { engine };
    Router::new()
        .route("/sources", post(sources::register))
        .route("/sources/{id}", get(sources::summary))
        .route("/sources/{id}/void", post(sources::void))
        .route("/sources/{id}/allocations", get(sources::allocations))
        .route("/targets", post(targets::register))
        .route("/targets/{id}", get(targets::get))
        .route("/targets/{id}/close", post(targets::close))
        .route("/targets/{id}/reopen", post(targets::reopen))
        .route("/targets/{id}/allocations", get(targets::allocations))
        .route("/allocations", post(allocations::allocate))
        .route("/allocations/batch", post(allocations::allocate_batch))
        .route("/allocations/{id}", get(allocations::detail))
        .route("/allocations/{id}/reverse", post(allocations::reverse))
        .route("/stats", post(statistics::get_stats))
        .with_state(state)
}

pub async fn run_with_listener(
    engine: Engine,
    listener: tokio::net::TcpListener,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router(Arc::new(engine))).await
}
