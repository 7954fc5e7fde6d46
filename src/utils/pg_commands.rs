// dbvault/src/utils/pg_commands.rs
//! Command lines for the PostgreSQL client tools run inside database containers.

use crate::catalog::{DatabaseRecord, quote_ident, quote_literal};

// Maintenance database used for statements that act on the target database.
const ADMIN_DATABASE: &str = "postgres";

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// Plain-SQL dump written to stdout.
pub fn dump_command(db: &DatabaseRecord) -> Vec<String> {
    args(&[
        "pg_dump",
        "-U",
        &db.username,
        "--no-owner",
        "--no-acl",
        "-d",
        &db.name,
    ])
}

/// One administrative statement against the maintenance database.
pub fn admin_command(db: &DatabaseRecord, sql: &str) -> Vec<String> {
    args(&[
        "psql",
        "-X", // Do not read psqlrc
        "-q",
        "-U",
        &db.username,
        "-d",
        ADMIN_DATABASE,
        "-v",
        "ON_ERROR_STOP=1",
        "-c",
        sql,
    ])
}

/// psql reading a dump from stdin into the (freshly created) target database.
pub fn restore_command(db: &DatabaseRecord) -> Vec<String> {
    args(&[
        "psql",
        "-X",
        "-q",
        "-U",
        &db.username,
        "-d",
        &db.name,
        "-v",
        "ON_ERROR_STOP=1",
    ])
}

pub fn terminate_connections_sql(db_name: &str) -> String {
    format!(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = {} AND pid <> pg_backend_pid();",
        quote_literal(db_name)
    )
}

pub fn drop_database_sql(db_name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {};", quote_ident(db_name))
}

pub fn create_database_sql(db_name: &str, owner: &str) -> String {
    if owner.is_empty() {
        format!("CREATE DATABASE {};", quote_ident(db_name))
    } else {
        format!(
            "CREATE DATABASE {} OWNER {};",
            quote_ident(db_name),
            quote_ident(owner)
        )
    }
}
