use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Aud,
    Cad,
    Chf,
    Eur,
    Gbp,
    Jpy,
    Kwd,
    Usd,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable error classification (`not_found`, `target_over_allocation`...).
    /// Absent for malformed requests.
    pub kind: Option<String>,
    /// Index of the failing item when a batch was rejected.
    pub index: Option<usize>,
}

pub mod source {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum SourceKind {
        CreditNote,
        Payment,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum SourceStatus {
        Open,
        Voided,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct SourceNew {
        pub kind: SourceKind,
        pub currency: Currency,
        /// Must be > 0.
        pub total_minor: i64,
        /// External document number (credit note number, payment reference).
        pub reference: Option<String>,
        /// Optional: if absent, server uses now().
        pub issued_at: Option<DateTime<FixedOffset>>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct SourceView {
        pub id: Uuid,
        pub kind: SourceKind,
        pub reference: Option<String>,
        pub currency: Currency,
        pub total_minor: i64,
        pub remaining_minor: i64,
        pub status: SourceStatus,
        pub issued_at: DateTime<Utc>,
        pub voided_at: Option<DateTime<Utc>>,
    }

    /// A source with `applied`/`remaining` replayed from its allocations.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct SourceSummaryView {
        pub source: SourceView,
        pub applied_minor: i64,
        pub remaining_minor: i64,
        pub active_allocations: u64,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct SourceVoid {
        /// Optional: if absent, server uses now().
        pub voided_at: Option<DateTime<FixedOffset>>,
    }
}

pub mod target {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TargetKind {
        Invoice,
        Expense,
        Project,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum TargetStatus {
        Open,
        Closed,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct TargetNew {
        pub kind: TargetKind,
        pub currency: Currency,
        /// Must be >= 0.
        pub outstanding_minor: i64,
        pub reference: Option<String>,
        /// Optional: if absent, server uses now().
        pub created_at: Option<DateTime<FixedOffset>>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct TargetView {
        pub id: Uuid,
        pub kind: TargetKind,
        pub reference: Option<String>,
        pub currency: Currency,
        pub amount_minor: i64,
        pub outstanding_minor: i64,
        pub status: TargetStatus,
        pub created_at: DateTime<Utc>,
    }
}

pub mod allocation {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum AllocationStatus {
        Active,
        Reversed,
    }

    /// Request body for `POST /allocations`.
    ///
    /// Idempotency is requested with the `Idempotency-Key` header.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct AllocationNew {
        pub source_id: Uuid,
        pub target_id: Uuid,
        /// Must be > 0.
        pub amount_minor: i64,
        pub currency: Currency,
        pub note: Option<String>,
        /// Optional: if absent, server uses now().
        pub occurred_at: Option<DateTime<FixedOffset>>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct BatchItem {
        pub source_id: Uuid,
        pub target_id: Uuid,
        pub amount_minor: i64,
        pub currency: Currency,
    }

    /// Request body for `POST /allocations/batch`. Items are applied in order,
    /// all or none.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct BatchNew {
        pub items: Vec<BatchItem>,
        pub note: Option<String>,
        pub occurred_at: Option<DateTime<FixedOffset>>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct AllocationView {
        pub id: Uuid,
        pub source_id: Uuid,
        pub target_id: Uuid,
        pub currency: Currency,
        pub amount_minor: i64,
        pub reversed_minor: i64,
        pub status: AllocationStatus,
        pub created_at: DateTime<Utc>,
        pub reversed_at: Option<DateTime<Utc>>,
        pub batch_id: Option<Uuid>,
        pub note: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct AllocationListResponse {
        pub allocations: Vec<AllocationView>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ReversalView {
        pub id: Uuid,
        pub amount_minor: i64,
        pub reason: Option<String>,
        pub created_at: DateTime<Utc>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct AllocationDetailResponse {
        pub allocation: AllocationView,
        pub reversals: Vec<ReversalView>,
    }

    /// Request body for `POST /allocations/{id}/reverse`.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct AllocationReverse {
        /// Optional: if absent, the whole open amount is reversed.
        pub amount_minor: Option<i64>,
        pub reason: Option<String>,
        pub occurred_at: Option<DateTime<FixedOffset>>,
    }
}

pub mod stats {
    use rust_decimal::Decimal;

    use super::*;
    use crate::source::SourceKind;

    /// One exchange rate: one unit of `from` is worth `rate` units of `to`.
    #[derive(Debug, Serialize, Deserialize)]
    pub struct Rate {
        pub from: Currency,
        pub to: Currency,
        pub rate: Decimal,
    }

    /// Request body for `POST /stats`.
    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct StatisticsQuery {
        pub kind: Option<SourceKind>,
        pub currency: Option<Currency>,
        pub issued_from: Option<DateTime<FixedOffset>>,
        pub issued_to: Option<DateTime<FixedOffset>>,
        #[serde(default)]
        pub include_voided: bool,
        /// When set, the breakdown is also folded into this currency using
        /// `rates`.
        pub display_currency: Option<Currency>,
        /// Optional: if absent, server uses now().
        pub as_of: Option<DateTime<FixedOffset>>,
        #[serde(default)]
        pub rates: Vec<Rate>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct CurrencyStatistic {
        pub currency: Currency,
        pub count: u64,
        pub total_minor: i64,
        pub applied_minor: i64,
        pub remaining_minor: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct ConvertedStatistic {
        pub currency: Currency,
        pub as_of: DateTime<Utc>,
        pub total_minor: i64,
        pub applied_minor: i64,
        pub remaining_minor: i64,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Statistics {
        pub breakdown: Vec<CurrencyStatistic>,
        pub converted: Option<ConvertedStatistic>,
    }
}
