//! Statement descriptors: SQL text plus its classification.

use std::fmt;

/// Whether a statement reads rows or changes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Query,
    Mutation,
}

/// Immutable SQL text tagged with its [`StatementKind`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Statement {
    sql: String,
    kind: StatementKind,
}

impl Statement {
    pub fn query(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            kind: StatementKind::Query,
        }
    }

    pub fn mutation(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            kind: StatementKind::Mutation,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_constructor() {
        let select = Statement::query("SELECT 1");
        let update = Statement::mutation("DELETE FROM t");
        assert_eq!(select.kind(), StatementKind::Query);
        assert_eq!(update.kind(), StatementKind::Mutation);
        assert_eq!(select.to_string(), "SELECT 1");
        assert_ne!(select, Statement::mutation("SELECT 1"));
    }
}
