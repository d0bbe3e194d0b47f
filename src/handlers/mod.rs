//! The operations this gateway exposes, and their registration.

pub mod prompts;
pub mod query;
pub mod schema;

use std::sync::Arc;

use crate::connection::Connection;
use crate::error::Result;
use crate::registry::{Arguments, Handler, OperationDescriptor, Registry};

pub const SCHEMA_RESOURCE: &str = "pgschema://{table}";
pub const RUN_SQL: &str = "run_sql";
pub const SUMMARIZE_TABLE: &str = "summarize_table";
pub const FIND_TRENDS: &str = "find_trends";

/// Build the registry with every gateway operation.
pub fn registry() -> Result<Registry> {
    let mut registry = Registry::new();

    registry.register(
        OperationDescriptor::resource(SCHEMA_RESOURCE, "Column names and data types of a table")
            .with_params::<schema::TableParams>()?,
        Handler::connected(read_schema),
    )?;

    registry.register(
        OperationDescriptor::tool(RUN_SQL, "Run a read-only SELECT query and return one row per line")
            .with_params::<query::QueryParams>()?,
        Handler::connected(run_sql),
    )?;

    registry.register(
        OperationDescriptor::prompt(SUMMARIZE_TABLE, "Ask for the most important insights in a table")
            .with_params::<prompts::SummarizeTableParams>()?,
        Handler::pure(|args| prompts::summarize_table(args.get("table").unwrap_or_default())),
    )?;

    registry.register(
        OperationDescriptor::prompt(FIND_TRENDS, "Ask for patterns or trends in a column")
            .with_params::<prompts::FindTrendsParams>()?,
        Handler::pure(|args| {
            prompts::find_trends(
                args.get("column").unwrap_or_default(),
                args.get("table").unwrap_or_default(),
            )
        }),
    )?;

    Ok(registry)
}

async fn read_schema(conn: Arc<dyn Connection>, args: Arguments) -> Result<String> {
    let schema::TableParams { table } = args.parse(SCHEMA_RESOURCE)?;
    schema::describe(conn.as_ref(), &table).await
}

async fn run_sql(conn: Arc<dyn Connection>, args: Arguments) -> Result<String> {
    let query::QueryParams { query } = args.parse(RUN_SQL)?;
    Ok(query::execute(conn.as_ref(), &query).await)
}
