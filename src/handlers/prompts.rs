//! Analysis prompt templates. Pure string substitution, no I/O.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SummarizeTableParams {
    #[schemars(description = "Table to summarize")]
    pub table: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FindTrendsParams {
    #[schemars(description = "Column to look for trends in")]
    pub column: String,
    #[schemars(description = "Table the column belongs to")]
    pub table: String,
}

pub fn summarize_table(table: &str) -> String {
    format!("What are the most important insights in the `{table}` table?")
}

pub fn find_trends(column: &str, table: &str) -> String {
    format!("Are there any patterns or trends in `{column}` from the `{table}` table?")
}
