//! Best-effort table name extraction from SQL text.
//!
//! Cache invalidation scopes to the tables a statement mentions. Extraction
//! is regex-based over `FROM`/`JOIN` clauses (plus `INTO` for INSERT and the
//! target of UPDATE); names are uppercased so invalidation matching is
//! case-insensitive. False positives cost an extra invalidation; deployments
//! whose SQL defeats the patterns should set
//! `CacheConfig::invalidate_all_on_write` instead.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::protocol::QueryType;

static FROM_RE: LazyLock<Regex> = LazyLock::new(|| ident_after("FROM"));
static JOIN_RE: LazyLock<Regex> = LazyLock::new(|| ident_after("JOIN"));
static INTO_RE: LazyLock<Regex> = LazyLock::new(|| ident_after("INTO"));
static UPDATE_RE: LazyLock<Regex> = LazyLock::new(|| ident_after("UPDATE"));

fn ident_after(keyword: &str) -> Regex {
    // Optionally schema-qualified identifier: name or schema.name
    let pattern = format!(
        r"(?i)\b{keyword}\s+([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)"
    );
    Regex::new(&pattern).expect("table extraction pattern is valid")
}

/// Extract the table names a statement mentions, uppercased.
#[must_use]
pub fn extract_tables(sql: &str, query_type: QueryType) -> HashSet<String> {
    let mut tables = HashSet::new();

    for re in [&*FROM_RE, &*JOIN_RE] {
        for captures in re.captures_iter(sql) {
            tables.insert(captures[1].to_ascii_uppercase());
        }
    }

    if query_type == QueryType::Insert {
        for captures in INTO_RE.captures_iter(sql) {
            tables.insert(captures[1].to_ascii_uppercase());
        }
    }

    if query_type == QueryType::Update {
        for captures in UPDATE_RE.captures_iter(sql) {
            tables.insert(captures[1].to_ascii_uppercase());
        }
    }

    tables
}
