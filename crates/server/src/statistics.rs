//! Statistics API endpoints

use api_types::stats::{Statistics, StatisticsQuery};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use chrono::Utc;
use engine::{Conversion, SourceFilter, StaticRates};

use crate::{
    ServerError,
    server::ServerState,
    views::{currency_from_api, source_kind_from_api, statistics_view, utc_or_now},
};

/// Per-currency totals of the matching sources; folded into
/// `display_currency` with the rates from the body when one is given.
pub async fn get_stats(
    State(state): State<ServerState>,
    payload: Result<Json<StatisticsQuery>, JsonRejection>,
) -> Result<Json<Statistics>, ServerError> {
    let Json(payload) = payload?;

    let filter = SourceFilter {
        kind: payload.kind.map(source_kind_from_api),
        currency: payload.currency.map(currency_from_api),
        issued_from: payload.issued_from.map(|dt| dt.with_timezone(&Utc)),
        issued_to: payload.issued_to.map(|dt| dt.with_timezone(&Utc)),
        include_voided: payload.include_voided,
    };
    let rates = payload.rates.iter().fold(StaticRates::new(), |rates, rate| {
        rates.with_rate(
            currency_from_api(rate.from),
            currency_from_api(rate.to),
            rate.rate,
        )
    });
    let conversion = payload.display_currency.map(|display| Conversion {
        display: currency_from_api(display),
        as_of: utc_or_now(payload.as_of),
        rates: &rates,
    });

    let stats = state
        .engine
        .source_statistics(&filter, conversion)
        .await?;
    Ok(Json(statistics_view(&stats)))
}
