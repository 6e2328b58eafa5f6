//! Scoped database sessions.
//!
//! A [`SessionScope`] opens one [`Session`], lends it to a unit of work and
//! then finishes it: commit when the work succeeded, rollback when it failed,
//! and close in every case.
use crate::telemetry::error_chain_fmt;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Executor, PgPool, Postgres};
use std::future::Future;
use std::pin::Pin;

/// A unit-of-work handle against the database, scoping one transaction.
#[async_trait]
pub trait Session: Send {
    /// Run a statement inside the session's transaction and return the
    /// number of affected rows.
    async fn execute(&mut self, statement: &str) -> Result<u64, sqlx::Error>;
    async fn commit(&mut self) -> Result<(), sqlx::Error>;
    async fn rollback(&mut self) -> Result<(), sqlx::Error>;
    /// Release the session. Calling it more than once is a no-op.
    async fn close(&mut self) -> Result<(), sqlx::Error>;
}

/// Source of fresh sessions, usually backed by a connection pool.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Session>, sqlx::Error>;
}

/// The future returned by a unit of work borrowing a session for `'s`.
pub type UnitOfWork<'s, T> = Pin<Box<dyn Future<Output = Result<T, anyhow::Error>> + Send + 's>>;

#[derive(thiserror::Error)]
pub enum ScopeError {
    #[error("Failed to open a database session")]
    Acquire(#[source] sqlx::Error),
    #[error("The unit of work failed")]
    Work(#[source] anyhow::Error),
    #[error("Failed to commit the session transaction")]
    Commit(#[source] sqlx::Error),
    #[error("Failed to roll back the session transaction")]
    Rollback(#[source] sqlx::Error),
    #[error("Failed to close the database session")]
    Close(#[source] sqlx::Error),
}

impl std::fmt::Debug for ScopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

pub struct SessionScope<'f> {
    factory: &'f dyn SessionFactory,
}

impl<'f> SessionScope<'f> {
    pub fn new(factory: &'f dyn SessionFactory) -> Self {
        Self { factory }
    }

    /// Open a session, run `work` against it and finish the session.
    ///
    /// Exactly one of commit or rollback is attempted, and close always runs
    /// afterwards, even if that step fails. When several steps fail the
    /// earliest failure is returned and the others are logged.
    pub async fn run<T, F>(&self, work: F) -> Result<T, ScopeError>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut dyn Session) -> UnitOfWork<'s, T> + Send,
    {
        let mut session = self.factory.open().await.map_err(ScopeError::Acquire)?;

        let outcome = work(session.as_mut()).await;
        let finished = match &outcome {
            Ok(_) => session.commit().await.map_err(ScopeError::Commit),
            Err(_) => session.rollback().await.map_err(ScopeError::Rollback),
        };
        let closed = session.close().await.map_err(ScopeError::Close);

        match (outcome, finished, closed) {
            (Ok(value), Ok(()), Ok(())) => Ok(value),
            (Err(e), finished, closed) => {
                log_secondary(finished.err());
                log_secondary(closed.err());
                Err(ScopeError::Work(e))
            }
            (Ok(_), Err(e), closed) => {
                log_secondary(closed.err());
                Err(e)
            }
            (Ok(_), Ok(()), Err(e)) => Err(e),
        }
    }
}

fn log_secondary(error: Option<ScopeError>) {
    if let Some(e) = error {
        tracing::warn!(
            error.cause_chain = ?e,
            error.message = %e,
            "Session cleanup failed after an earlier error",
        );
    }
}

/// A session holding one pooled Postgres connection with an open transaction.
pub struct PgSession {
    connection: Option<PoolConnection<Postgres>>,
    in_transaction: bool,
}

impl PgSession {
    async fn begin(pool: &PgPool) -> Result<Self, sqlx::Error> {
        // Guarded before BEGIN is sent, so a cancelled BEGIN still closes the connection
        let mut session = Self {
            connection: Some(pool.acquire().await?),
            in_transaction: true,
        };
        session.connection()?.execute("BEGIN").await?;
        Ok(session)
    }

    fn connection(&mut self) -> Result<&mut PoolConnection<Postgres>, sqlx::Error> {
        self.connection
            .as_mut()
            .ok_or_else(|| sqlx::Error::Protocol("the session is already closed".into()))
    }

    async fn finish(&mut self, statement: &'static str) -> Result<(), sqlx::Error> {
        if !self.in_transaction {
            return Ok(());
        }
        self.connection()?.execute(statement).await?;
        self.in_transaction = false;
        Ok(())
    }
}

#[async_trait]
impl Session for PgSession {
    async fn execute(&mut self, statement: &str) -> Result<u64, sqlx::Error> {
        let result = self.connection()?.execute(statement).await?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.finish("ROLLBACK").await
    }

    async fn close(&mut self) -> Result<(), sqlx::Error> {
        let Some(connection) = self.connection.take() else {
            return Ok(());
        };
        if self.in_transaction {
            // Transaction state is unknown: never hand this connection back to the pool
            self.in_transaction = false;
            connection.close().await
        } else {
            drop(connection);
            Ok(())
        }
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        // Reached without `close` when the enclosing future is cancelled
        if self.in_transaction {
            if let Some(connection) = self.connection.as_mut() {
                connection.close_on_drop();
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct PgSessionFactory {
    pool: PgPool,
}

impl PgSessionFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionFactory for PgSessionFactory {
    async fn open(&self) -> Result<Box<dyn Session>, sqlx::Error> {
        let session = PgSession::begin(&self.pool).await?;
        Ok(Box::new(session))
    }
}
