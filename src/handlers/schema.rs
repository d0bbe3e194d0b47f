//! `pgschema://{table}`: column listing for one table.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::connection::Connection;
use crate::error::Result;

/// Catalog lookup. No schema filter and no ordering: name collisions across
/// schemas are listed together, in whatever order the catalog returns them.
pub const COLUMNS_QUERY: &str = "SELECT column_name, data_type
     FROM information_schema.columns
     WHERE table_name = $1";

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TableParams {
    #[schemars(description = "Name of the table")]
    pub table: String,
}

/// One `column (type)` line per column. An unknown table yields `""`.
pub async fn describe(conn: &dyn Connection, table: &str) -> Result<String> {
    let rows = conn.query(COLUMNS_QUERY, &[table]).await?;

    let lines: Vec<String> = rows
        .iter()
        .map(|row| {
            format!(
                "{} ({})",
                row.get_str("column_name").unwrap_or_default(),
                row.get_str("data_type").unwrap_or_default()
            )
        })
        .collect();

    Ok(lines.join("\n"))
}
