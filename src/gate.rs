//! Read-only gate for ad-hoc SQL.
//!
//! This is a lexical prefix check. A statement that starts with `select` but
//! reaches a data-modifying function or CTE is still allowed through.

/// Advisory returned in place of results for any rejected query.
pub const REJECTION_MESSAGE: &str = "Only SELECT queries are allowed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Allowed,
    Rejected,
}

impl Authorization {
    pub fn is_allowed(self) -> bool {
        self == Authorization::Allowed
    }
}

/// Allow the query iff, trimmed and lower-cased, it starts with `select`.
pub fn authorize(query: &str) -> Authorization {
    if query.trim().to_lowercase().starts_with("select") {
        Authorization::Allowed
    } else {
        Authorization::Rejected
    }
}
