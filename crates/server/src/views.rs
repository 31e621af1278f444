//! Mapping between engine types and the JSON shapes of `api_types`.

use api_types::{
    Currency,
    allocation::{AllocationStatus, AllocationView, ReversalView},
    source::{SourceKind, SourceStatus, SourceView},
    stats::{ConvertedStatistic, CurrencyStatistic, Statistics},
    target::{TargetKind, TargetStatus, TargetView},
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::de::DeserializeOwned;

use crate::ServerError;

pub(crate) fn currency_from_api(currency: Currency) -> engine::Currency {
    match currency {
        Currency::Aud => engine::Currency::Aud,
        Currency::Cad => engine::Currency::Cad,
        Currency::Chf => engine::Currency::Chf,
        Currency::Eur => engine::Currency::Eur,
        Currency::Gbp => engine::Currency::Gbp,
        Currency::Jpy => engine::Currency::Jpy,
        Currency::Kwd => engine::Currency::Kwd,
        Currency::Usd => engine::Currency::Usd,
    }
}

pub(crate) fn currency_to_api(currency: engine::Currency) -> Currency {
    match currency {
        engine::Currency::Aud => Currency::Aud,
        engine::Currency::Cad => Currency::Cad,
        engine::Currency::Chf => Currency::Chf,
        engine::Currency::Eur => Currency::Eur,
        engine::Currency::Gbp => Currency::Gbp,
        engine::Currency::Jpy => Currency::Jpy,
        engine::Currency::Kwd => Currency::Kwd,
        engine::Currency::Usd => Currency::Usd,
    }
}

pub(crate) fn money(amount_minor: i64, currency: Currency) -> engine::Money {
    engine::Money::new(amount_minor, currency_from_api(currency))
}

pub(crate) fn utc_or_now(value: Option<DateTime<FixedOffset>>) -> DateTime<Utc> {
    value.map_or_else(Utc::now, |dt| dt.with_timezone(&Utc))
}

pub(crate) fn source_kind_from_api(kind: SourceKind) -> engine::SourceKind {
    match kind {
        SourceKind::CreditNote => engine::SourceKind::CreditNote,
        SourceKind::Payment => engine::SourceKind::Payment,
    }
}

pub(crate) fn target_kind_from_api(kind: TargetKind) -> engine::TargetKind {
    match kind {
        TargetKind::Invoice => engine::TargetKind::Invoice,
        TargetKind::Expense => engine::TargetKind::Expense,
        TargetKind::Project => engine::TargetKind::Project,
    }
}

pub(crate) fn source_view(source: &engine::AllocatableSource) -> SourceView {
    SourceView {
        id: source.id,
        kind: match source.kind {
            engine::SourceKind::CreditNote => SourceKind::CreditNote,
            engine::SourceKind::Payment => SourceKind::Payment,
        },
        reference: source.reference.clone(),
        currency: currency_to_api(source.currency),
        total_minor: source.total.amount_minor(),
        remaining_minor: source.remaining.amount_minor(),
        status: match source.status {
            engine::SourceStatus::Open => SourceStatus::Open,
            engine::SourceStatus::Voided => SourceStatus::Voided,
        },
        issued_at: source.issued_at,
        voided_at: source.voided_at,
    }
}

pub(crate) fn target_view(target: &engine::AllocationTarget) -> TargetView {
    TargetView {
        id: target.id,
        kind: match target.kind {
            engine::TargetKind::Invoice => TargetKind::Invoice,
            engine::TargetKind::Expense => TargetKind::Expense,
            engine::TargetKind::Project => TargetKind::Project,
        },
        reference: target.reference.clone(),
        currency: currency_to_api(target.currency),
        amount_minor: target.amount.amount_minor(),
        outstanding_minor: target.outstanding.amount_minor(),
        status: match target.status {
            engine::TargetStatus::Open => TargetStatus::Open,
            engine::TargetStatus::Closed => TargetStatus::Closed,
        },
        created_at: target.created_at,
    }
}

pub(crate) fn allocation_view(allocation: &engine::Allocation) -> AllocationView {
    AllocationView {
        id: allocation.id,
        source_id: allocation.source_id,
        target_id: allocation.target_id,
        currency: currency_to_api(allocation.currency()),
        amount_minor: allocation.amount.amount_minor(),
        reversed_minor: allocation.reversed_amount.amount_minor(),
        status: match allocation.status {
            engine::AllocationStatus::Active => AllocationStatus::Active,
            engine::AllocationStatus::Reversed => AllocationStatus::Reversed,
        },
        created_at: allocation.created_at,
        reversed_at: allocation.reversed_at,
        batch_id: allocation.batch_id,
        note: allocation.note.clone(),
    }
}

pub(crate) fn reversal_view(reversal: &engine::Reversal) -> ReversalView {
    ReversalView {
        id: reversal.id,
        amount_minor: reversal.amount.amount_minor(),
        reason: reversal.reason.clone(),
        created_at: reversal.created_at,
    }
}

pub(crate) fn statistics_view(stats: &engine::SourceStatistics) -> Statistics {
    Statistics {
        breakdown: stats
            .breakdown
            .iter()
            .map(|line| CurrencyStatistic {
                currency: currency_to_api(line.currency),
                count: line.count,
                total_minor: line.total.amount_minor(),
                applied_minor: line.applied.amount_minor(),
                remaining_minor: line.remaining.amount_minor(),
            })
            .collect(),
        converted: stats.converted.as_ref().map(|converted| ConvertedStatistic {
            currency: currency_to_api(converted.currency),
            as_of: converted.as_of,
            total_minor: converted.total.amount_minor(),
            applied_minor: converted.applied.amount_minor(),
            remaining_minor: converted.remaining.amount_minor(),
        }),
    }
}

/// Parses an optional JSON body; an empty body yields `T::default()`.
pub(crate) fn optional_json<T>(body: &[u8]) -> Result<T, ServerError>
where
    T: DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| ServerError::Generic(format!("invalid body: {err}")))
}
