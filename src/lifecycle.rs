//! Connection lifecycle.
//!
//! One connection is opened when the server starts and closed when it stops.
//! Handlers never reach it through global state: each invocation receives a
//! [`LifecycleContext`] that lends it the shared handle.

use std::future::Future;
use std::sync::Arc;

use anyhow::anyhow;

use crate::config::DbConfig;
use crate::connection::{Connection, PgConnection};
use crate::error::Result;

/// Request-scoped access to the shared connection.
#[derive(Clone)]
pub struct LifecycleContext {
    db: Arc<dyn Connection>,
}

impl LifecycleContext {
    pub fn new(db: Arc<dyn Connection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.db)
    }
}

/// Owns the process-wide connection between `start` and `stop`.
pub struct ConnectionManager {
    db: Arc<dyn Connection>,
}

impl ConnectionManager {
    /// Connect to the database. Unreachable servers and rejected credentials
    /// surface as [`GatewayError::Connection`](crate::GatewayError::Connection).
    pub async fn start(config: &DbConfig) -> Result<Self> {
        tracing::info!(db = %config.redacted(), "Connecting to PostgreSQL");
        let conn = PgConnection::connect(config).await?;
        tracing::info!("Database connection established");
        Ok(Self::from_connection(Arc::new(conn)))
    }

    /// Manage an already-open connection.
    pub fn from_connection(db: Arc<dyn Connection>) -> Self {
        Self { db }
    }

    pub fn context(&self) -> LifecycleContext {
        LifecycleContext::new(Arc::clone(&self.db))
    }

    /// Close the connection. Takes `self`, so it runs at most once.
    pub async fn stop(self) {
        self.db.close().await;
        tracing::info!("Database connection closed");
    }
}

/// Open the connection, run `body`, and close the connection afterwards.
pub async fn run<F, Fut, T>(config: &DbConfig, body: F) -> anyhow::Result<T>
where
    F: FnOnce(LifecycleContext) -> Fut,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let manager = ConnectionManager::start(config).await?;
    scoped(manager, body).await
}

/// Run `body` on its own task and stop `manager` exactly once, whether the
/// body returns, fails, or panics. A panic is resumed after the close.
pub async fn scoped<F, Fut, T>(manager: ConnectionManager, body: F) -> anyhow::Result<T>
where
    F: FnOnce(LifecycleContext) -> Fut,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let outcome = tokio::spawn(body(manager.context())).await;
    manager.stop().await;

    match outcome {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(anyhow!("server task was cancelled: {e}")),
    }
}
