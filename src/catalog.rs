// dbvault/src/catalog.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A logical database and the container workload that runs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRecord {
    pub id: i64,
    pub name: String,
    pub container_id: String,
    /// Engine role used for dump/restore/admin commands inside the container.
    pub username: String,
}

#[async_trait]
pub trait DatabaseCatalog: Send + Sync {
    /// Returns `None` for an unknown database id.
    async fn lookup(&self, database_id: i64) -> Result<Option<DatabaseRecord>>;
}

/// Catalog backed by the `databases` list in config.json.
pub struct StaticCatalog {
    entries: HashMap<i64, DatabaseRecord>,
}

impl StaticCatalog {
    pub fn new(records: Vec<DatabaseRecord>) -> Self {
        Self {
            entries: records.into_iter().map(|r| (r.id, r)).collect(),
        }
    }
}

#[async_trait]
impl DatabaseCatalog for StaticCatalog {
    async fn lookup(&self, database_id: i64) -> Result<Option<DatabaseRecord>> {
        Ok(self.entries.get(&database_id).cloned())
    }
}

fn database_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_-]*$").expect("static regex"))
}

/// Database names end up inside SQL statements, file names and tool argv, so
/// only a conservative character set is accepted and a leading '-' is refused.
pub fn validate_database_name(name: &str) -> Result<()> {
    if database_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "Invalid database name {:?}: only letters, digits, '_' and '-' are allowed, and it may not start with '-'",
            name
        ))
        .context("database name validation failed")
    }
}

/// Double-quotes an SQL identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Single-quotes an SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_database_name() {
        assert!(validate_database_name("app").is_ok());
        assert!(validate_database_name("app_prod-2").is_ok());
        assert!(validate_database_name("").is_err());
        assert!(validate_database_name("app db").is_err());
        assert!(validate_database_name("app;drop").is_err());
        assert!(validate_database_name("app\"x").is_err());
    }

    #[test]
    fn test_leading_dash_is_rejected() {
        assert!(validate_database_name("-fapp").is_err());
        assert!(validate_database_name("-").is_err());
        assert!(validate_database_name("_app").is_ok());
        assert!(validate_database_name("2024-app").is_ok());
    }

    #[test]
    fn test_quoting_escapes_delimiters() {
        assert_eq!(quote_ident("app"), "\"app\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[tokio::test]
    async fn test_static_catalog_lookup() -> anyhow::Result<()> {
        let catalog = StaticCatalog::new(vec![DatabaseRecord {
            id: 7,
            name: "app".to_string(),
            container_id: "app-db".to_string(),
            username: "postgres".to_string(),
        }]);

        assert_eq!(catalog.lookup(7).await?.map(|r| r.container_id), Some("app-db".to_string()));
        assert!(catalog.lookup(8).await?.is_none());
        Ok(())
    }
}
