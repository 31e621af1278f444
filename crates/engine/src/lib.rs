//! Bounded allocation of monetary amounts from sources to targets.
//!
//! A source (credit note, payment) holds a finite amount; a target (invoice,
//! expense, project) has an outstanding balance. The [`Engine`] moves money
//! between them through [`Allocation`] records while keeping
//! `0 <= remaining <= total` on every source and `0 <= outstanding <= amount`
//! on every target, under concurrent callers.

pub use aggregator::{
    ConvertedTotals, CurrencyTotals, RateProvider, SourceStatistics, StaticRates, aggregate,
    convert, convert_money,
};
pub use allocations::{Allocation, AllocationStatus};
pub use commands::{
    AllocateCmd, AllocationItem, BatchAllocateCmd, NewSource, NewTarget, ReverseCmd, SourceFilter,
};
pub use currency::Currency;
pub use error::{EngineError, ErrorKind};
pub use money::Money;
pub use ops::{
    Conversion, DEFAULT_MAX_CONFLICT_RETRIES, Engine, EngineBuilder, SourceSummary,
};
pub use reversals::Reversal;
pub use sources::{AllocatableSource, SourceKind, SourceStatus};
pub use targets::{AllocationTarget, TargetKind, TargetStatus};

mod aggregator;
mod allocations;
mod commands;
mod currency;
mod error;
mod money;
mod ops;
mod reversals;
mod sources;
mod targets;
mod util;

type ResultEngine<T> = Result<T, EngineError>;
