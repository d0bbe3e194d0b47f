//! `run_sql`: gated ad-hoc queries.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::connection::{Connection, QueryResult};
use crate::error::{GatewayError, Result};
use crate::gate::{self, REJECTION_MESSAGE};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QueryParams {
    #[schemars(description = "SQL SELECT query to execute")]
    pub query: String,
}

/// Gate the query and, if allowed, run it.
pub async fn run(conn: &dyn Connection, query: &str) -> Result<QueryResult> {
    if !gate::authorize(query).is_allowed() {
        return Err(GatewayError::QueryRejected(REJECTION_MESSAGE));
    }
    conn.query(query, &[]).await
}

/// Run a query and render the outcome as text. Never fails: rejections come
/// back as the advisory and database failures as `Error: <message>`.
pub async fn execute(conn: &dyn Connection, query: &str) -> String {
    match run(conn, query).await {
        Ok(rows) => render(&rows),
        Err(GatewayError::QueryRejected(advisory)) => {
            tracing::warn!("Rejected non-SELECT query");
            advisory.to_string()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Query failed");
            format!("Error: {e}")
        }
    }
}

/// One line per row, rows and columns in database order.
pub fn render(rows: &QueryResult) -> String {
    rows.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::FakeConnection;
    use crate::connection::Row;
    use serde_json::Value;

    #[tokio::test]
    async fn test_select_one() {
        let conn = FakeConnection::returning(vec![Row::new().with("?column?", 1)]);
        let out = execute(&conn, "select 1").await;
        assert_eq!(out, r#"{"?column?": 1}"#);
        assert_eq!(conn.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_rows_render_one_per_line_in_order() {
        let conn = FakeConnection::returning(vec![
            Row::new().with("id", 2).with("name", "bob"),
            Row::new().with("id", 1).with("name", Value::Null),
        ]);
        let out = execute(&conn, "SELECT id, name FROM users ORDER BY id DESC").await;
        assert_eq!(out, "{\"id\": 2, \"name\": \"bob\"}\n{\"id\": 1, \"name\": null}");
    }

    #[tokio::test]
    async fn test_empty_result_is_empty_text() {
        let conn = FakeConnection::returning(vec![]);
        assert_eq!(execute(&conn, "select * from t where false").await, "");
    }

    #[tokio::test]
    async fn test_rejected_query_never_reaches_database() {
        let conn = FakeConnection::returning(vec![]);
        for query in ["delete from t", "drop table t", "", "  insert into t values (1)"] {
            assert_eq!(execute(&conn, query).await, REJECTION_MESSAGE);
        }
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn test_database_error_is_rendered() {
        let conn = FakeConnection::new(|_, _| {
            Err(GatewayError::Database(
                "relation \"nonexistent_table\" does not exist".into(),
            ))
        });
        let out = execute(&conn, "select * from nonexistent_table").await;
        assert_eq!(out, "Error: relation \"nonexistent_table\" does not exist");
    }

    #[tokio::test]
    async fn test_dropped_connection_is_rendered() {
        let conn = FakeConnection::returning(vec![]);
        conn.close().await;
        let out = execute(&conn, "select 1").await;
        assert!(out.starts_with("Error:"), "{out}");
    }

    #[tokio::test]
    async fn test_run_reports_rejection_as_error_value() {
        let conn = FakeConnection::returning(vec![]);
        assert!(matches!(
            run(&conn, "update t set a = 1").await,
            Err(GatewayError::QueryRejected(REJECTION_MESSAGE))
        ));
    }
}
