//! PostgreSQL MCP Gateway
//!
//! A Model Context Protocol (MCP) server for PostgreSQL, built with rmcp.
//! It exposes three surfaces over one shared database connection:
//!
//! - the `pgschema://{table}` resource, listing a table's columns and types;
//! - the `run_sql` tool, which runs read-only `SELECT` queries;
//! - the `summarize_table` and `find_trends` analysis prompts.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rmcp::ServiceExt;
//! use rmcp_pg_gateway::{handlers, lifecycle, DbConfig, PostgresServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DbConfig::parse("host=localhost user=postgres dbname=mydb")?;
//!     let registry = Arc::new(handlers::registry()?);
//!
//!     lifecycle::run(&config, move |ctx| async move {
//!         let server = PostgresServer::new(registry, ctx);
//!         let service = server.serve((tokio::io::stdin(), tokio::io::stdout())).await?;
//!         service.waiting().await?;
//!         Ok::<_, anyhow::Error>(())
//!     })
//!     .await
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod lifecycle;
pub mod registry;
pub mod server;

pub use config::{Cli, DbConfig};
pub use connection::{Connection, PgConnection, QueryResult, Row};
pub use error::{GatewayError, Result};
pub use gate::{authorize, Authorization, REJECTION_MESSAGE};
pub use lifecycle::{ConnectionManager, LifecycleContext};
pub use registry::{Arguments, Handler, OperationDescriptor, OperationKind, Registry};
pub use server::PostgresServer;
