use std::future::Future;

use sea_orm::DatabaseConnection;

use crate::{EngineError, ResultEngine};

mod documents;
mod ledger;
mod queries;
mod reversal;
mod statistics;

pub use queries::SourceSummary;
pub use statistics::Conversion;

/// Default number of times a write is retried after a compare-and-set miss.
pub const DEFAULT_MAX_CONFLICT_RETRIES: usize = 3;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
macro_rules! with_tx {
    ($self:expr, |$tx:ident| $body:expr) => {{
        let $tx = $self.database.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// The allocation engine.
///
/// Owns every write to `remaining` (sources) and `outstanding` (targets).
/// Each write operation runs in a single database transaction; balance rows
/// are updated with compare-and-set on their `version` column and the
/// operation is retried from validation when another writer got there first.
#[derive(Debug)]
pub struct Engine {
    database: DatabaseConnection,
    max_conflict_retries: usize,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Runs `attempt` until it returns something other than `Conflict`, at
    /// most `max_conflict_retries + 1` times.
    async fn retry_on_conflict<T, F, Fut>(&self, operation: &str, mut attempt: F) -> ResultEngine<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ResultEngine<T>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(EngineError::Conflict(reason)) if retries < self.max_conflict_retries => {
                    retries += 1;
                    tracing::warn!(operation, retries, "concurrent modification, retrying: {reason}");
                }
                Err(EngineError::Conflict(reason)) => {
                    tracing::error!(operation, retries, "giving up after conflicts: {reason}");
                    return Err(EngineError::Conflict(reason));
                }
                other => return other,
            }
        }
    }
}

/// The builder for `Engine`
pub struct EngineBuilder {
    database: DatabaseConnection,
    max_conflict_retries: usize,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            database: DatabaseConnection::default(),
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// How many times a write is retried after losing a compare-and-set race.
    pub fn max_conflict_retries(mut self, retries: usize) -> EngineBuilder {
        self.max_conflict_retries = retries;
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        if matches!(self.database, DatabaseConnection::Disconnected) {
            return Err(EngineError::Database(sea_orm::DbErr::Custom(
                "engine requires a database connection".to_string(),
            )));
        }
        Ok(Engine {
            database: self.database,
            max_conflict_retries: self.max_conflict_retries,
        })
    }
}
