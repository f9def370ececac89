use std::{
    future::Future,
    pin::{Pin, pin},
};

use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};

use crate::{BalancePolicy, EngineError, Queries, ResultEngine};

mod records;
mod transfer;

/// Future returned by a unit-of-work body.
pub type TxFuture<'c, T> = Pin<Box<dyn Future<Output = ResultEngine<T>> + Send + 'c>>;

#[derive(Debug)]
pub struct Engine {
    database: DatabaseConnection,
    policy: BalancePolicy,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn policy(&self) -> BalancePolicy {
        self.policy
    }

    /// Record access outside of any unit of work.
    pub fn queries(&self) -> Queries<'_, DatabaseConnection> {
        Queries::new(&self.database)
    }

    /// Run `f` inside a database transaction, committing on success and
    /// rolling back on error.
    ///
    /// No retry happens here: a serialization failure reported by the backend
    /// reaches the caller like any other error.
    pub async fn with_tx<T, F>(&self, f: F) -> ResultEngine<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c Engine, Queries<'c, DatabaseTransaction>) -> TxFuture<'c, T> + Send,
    {
        self.with_tx_until(std::future::pending::<()>(), f).await
    }

    /// Same as [`with_tx`](Self::with_tx), but gives up as soon as `cancel`
    /// resolves. The body is dropped mid-flight and the transaction is rolled
    /// back, so nothing it wrote becomes visible.
    pub async fn with_tx_until<T, F, C>(&self, cancel: C, f: F) -> ResultEngine<T>
    where
        T: Send,
        C: Future<Output = ()> + Send,
        F: for<'c> FnOnce(&'c Engine, Queries<'c, DatabaseTransaction>) -> TxFuture<'c, T> + Send,
    {
        let mut cancel = pin!(cancel);
        let db_tx = tokio::select! {
            biased;
            () = &mut cancel => return Err(EngineError::Cancelled),
            res = self.database.begin() => res?,
        };
        tracing::debug!("unit of work started");

        let outcome = {
            let work = f(self, Queries::new(&db_tx));
            tokio::select! {
                biased;
                () = &mut cancel => Err(EngineError::Cancelled),
                res = work => res,
            }
        };

        match outcome {
            Ok(value) => {
                db_tx.commit().await?;
                tracing::debug!("unit of work committed");
                Ok(value)
            }
            Err(err) => {
                tracing::warn!("unit of work failed, rolling back: {err}");
                Err(rolled_back(err, db_tx.rollback().await))
            }
        }
    }
}

/// The error a failed unit of work reports once its rollback has run.
fn rolled_back(err: EngineError, rollback: Result<(), DbErr>) -> EngineError {
    match rollback {
        Ok(()) => err,
        Err(rollback) => {
            tracing::error!("rollback failed after \"{err}\": {rollback}");
            EngineError::Rollback {
                source: Box::new(err),
                rollback,
            }
        }
    }
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    policy: BalancePolicy,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Pick the negative-balance policy (defaults to
    /// [`BalancePolicy::AllowNegative`]).
    pub fn policy(mut self, policy: BalancePolicy) -> EngineBuilder {
        self.policy = policy;
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        self.database.ping().await?;
        Ok(Engine {
            database: self.database,
            policy: self.policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use sea_orm::RuntimeErr;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn successful_rollback_keeps_the_original_error() {
        let err = rolled_back(EngineError::InvalidAmount("abort".to_string()), Ok(()));
        assert_eq!(err, EngineError::InvalidAmount("abort".to_string()));
    }

    #[test]
    fn failed_rollback_reports_both_causes() {
        let err = rolled_back(
            EngineError::KeyNotFound("account 7".to_string()),
            Err(DbErr::Conn(RuntimeErr::Internal("connection reset".to_string()))),
        );
        let EngineError::Rollback { source, rollback } = &err else {
            panic!("expected a rollback failure, got {err}");
        };
        assert_eq!(**source, EngineError::KeyNotFound("account 7".to_string()));
        assert!(rollback.to_string().contains("connection reset"));
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(!err.is_retryable());
    }
}
