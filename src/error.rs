//! Error taxonomy for the gateway.
//!
//! Every handler returns [`GatewayError`] instead of panicking, and the MCP
//! adapter converts it into a protocol response in one place
//! ([`GatewayError::into_mcp_error`]).

use rmcp::ErrorData as McpError;
use thiserror::Error;

use crate::registry::OperationKind;

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Database unreachable, credentials refused, or connection closed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Supplied arguments do not match the declared parameter list.
    #[error("invalid parameters for {operation}: {reason}")]
    Validation { operation: String, reason: String },

    /// No operation registered under this (kind, name).
    #[error("{kind} not found: {name}")]
    NotFound { kind: OperationKind, name: String },

    /// The safety gate refused the query.
    #[error("{0}")]
    QueryRejected(&'static str),

    /// Failure reported by the database while running a statement.
    #[error("{0}")]
    Database(String),

    #[error("{kind} already registered: {name}")]
    DuplicateOperation { kind: OperationKind, name: String },

    #[error("invalid registration for {name}: {reason}")]
    InvalidRegistration { name: String, reason: String },
}

impl GatewayError {
    pub fn validation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: OperationKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Map onto the closest MCP error code.
    pub fn into_mcp_error(self) -> McpError {
        match self {
            GatewayError::Validation { .. } => McpError::invalid_params(self.to_string(), None),
            GatewayError::NotFound {
                kind: OperationKind::Resource,
                ..
            } => McpError::resource_not_found(self.to_string(), None),
            GatewayError::NotFound { .. } => McpError::invalid_params(self.to_string(), None),
            other => McpError::internal_error(other.to_string(), None),
        }
    }
}

impl From<tokio_postgres::Error> for GatewayError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            return GatewayError::Connection(err.to_string());
        }
        // Server-side errors carry the message Postgres produced; prefer it over
        // the driver's generic "db error" wrapper.
        match err.as_db_error() {
            Some(db) => GatewayError::Database(db.message().to_string()),
            None => GatewayError::Database(err.to_string()),
        }
    }
}

impl From<GatewayError> for McpError {
    fn from(err: GatewayError) -> Self {
        err.into_mcp_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::ErrorCode;

    #[test]
    fn test_validation_maps_to_invalid_params() {
        let err = GatewayError::validation("run_sql", "missing required parameter `query`");
        let mcp = err.into_mcp_error();
        assert_eq!(mcp.code, ErrorCode::INVALID_PARAMS);
        assert!(mcp.message.contains("run_sql"));
        assert!(mcp.message.contains("query"));
    }

    #[test]
    fn test_unknown_resource_maps_to_resource_not_found() {
        let err = GatewayError::not_found(OperationKind::Resource, "pgschema://");
        assert_eq!(err.into_mcp_error().code, ErrorCode::RESOURCE_NOT_FOUND);
    }

    #[test]
    fn test_database_error_maps_to_internal() {
        let err = GatewayError::Database("relation \"t\" does not exist".into());
        let mcp = err.into_mcp_error();
        assert_eq!(mcp.code, ErrorCode::INTERNAL_ERROR);
        assert_eq!(mcp.message, "relation \"t\" does not exist");
    }
}
