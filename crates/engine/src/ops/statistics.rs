use chrono::{DateTime, Utc};

use crate::{
    Currency, ResultEngine, SourceFilter,
    aggregator::{RateProvider, SourceStatistics, aggregate, convert},
};

use super::Engine;

/// Request for the converted view of [`Engine::source_statistics`].
#[derive(Clone, Copy)]
pub struct Conversion<'a> {
    pub display: Currency,
    pub as_of: DateTime<Utc>,
    pub rates: &'a dyn RateProvider,
}

impl Engine {
    /// Per-currency totals of the sources matching `filter`, plus the same
    /// totals folded into one currency when `conversion` is given.
    pub async fn source_statistics(
        &self,
        filter: &SourceFilter,
        conversion: Option<Conversion<'_>>,
    ) -> ResultEngine<SourceStatistics> {
        let sources = self.list_sources(filter).await?;
        let breakdown = aggregate(&sources)?;
        let converted = conversion
            .map(|c| convert(&breakdown, c.display, c.rates, c.as_of))
            .transpose()?;
        Ok(SourceStatistics {
            breakdown,
            converted,
        })
    }
}
