//! Command structs for engine operations.
//!
//! These types group parameters for write operations
//! (register/allocate/batch/reverse), keeping call sites readable and avoiding
//! long argument lists.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Currency, Money, SourceKind, TargetKind};

/// Register a new allocatable source (credit note issued, payment completed).
#[derive(Clone, Debug)]
pub struct NewSource {
    pub kind: SourceKind,
    pub total: Money,
    pub reference: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl NewSource {
    #[must_use]
    pub fn new(kind: SourceKind, total: Money) -> Self {
        Self {
            kind,
            total,
            reference: None,
            issued_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    #[must_use]
    pub fn issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }
}

/// Register a new allocation target (invoice, expense, project).
#[derive(Clone, Debug)]
pub struct NewTarget {
    pub kind: TargetKind,
    pub outstanding: Money,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewTarget {
    #[must_use]
    pub fn new(kind: TargetKind, outstanding: Money) -> Self {
        Self {
            kind,
            outstanding,
            reference: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Allocate `amount` from a source to a target.
#[derive(Clone, Debug)]
pub struct AllocateCmd {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub amount: Money,
    pub note: Option<String>,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AllocateCmd {
    #[must_use]
    pub fn new(source_id: Uuid, target_id: Uuid, amount: Money) -> Self {
        Self {
            source_id,
            target_id,
            amount,
            note: None,
            idempotency_key: None,
            occurred_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// One line of a batch allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationItem {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub amount: Money,
}

/// Allocate several items all-or-nothing, in the given order.
#[derive(Clone, Debug)]
pub struct BatchAllocateCmd {
    pub items: Vec<AllocationItem>,
    pub note: Option<String>,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl BatchAllocateCmd {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            note: None,
            idempotency_key: None,
            occurred_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn item(mut self, source_id: Uuid, target_id: Uuid, amount: Money) -> Self {
        self.items.push(AllocationItem {
            source_id,
            target_id,
            amount,
        });
        self
    }

    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

impl Default for BatchAllocateCmd {
    fn default() -> Self {
        Self::new()
    }
}

/// Reverse all (default) or part of an allocation.
#[derive(Clone, Debug)]
pub struct ReverseCmd {
    pub allocation_id: Uuid,
    pub amount: Option<Money>,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ReverseCmd {
    #[must_use]
    pub fn new(allocation_id: Uuid) -> Self {
        Self {
            allocation_id,
            amount: None,
            reason: None,
            idempotency_key: None,
            occurred_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

/// Selects the sources an aggregation runs over.
#[derive(Clone, Debug, Default)]
pub struct SourceFilter {
    pub kind: Option<SourceKind>,
    pub currency: Option<Currency>,
    pub issued_from: Option<DateTime<Utc>>,
    pub issued_to: Option<DateTime<Utc>>,
    pub include_voided: bool,
}
