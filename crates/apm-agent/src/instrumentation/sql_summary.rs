// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Short, low-cardinality labels for SQL statements.
//!
//! ```text
//! SELECT * FROM "users" WHERE id = $1   ->  SELECT FROM users
//! INSERT INTO orders (a, b) VALUES ...  ->  INSERT INTO orders
//! BEGIN                                 ->  BEGIN
//! ```

use lazy_static::lazy_static;
use regex::Regex;

pub const GENERIC_SQL: &str = "SQL";

const TABLE: &str = r#"("[^"]+"|`[^`]+`|[\w.$]+)"#;

lazy_static! {
    /// Leading keyword, allowing for an opening parenthesis.
    static ref KEYWORD_REGEX: Regex =
        Regex::new(r"^\s*\(?\s*([A-Za-z]+)").expect("failed creating regex");
    static ref SELECT_REGEX: Regex =
        Regex::new(&format!(r"(?is)^\s*\(?\s*SELECT\b.*?\bFROM\s+{TABLE}"))
            .expect("failed creating regex");
    static ref INSERT_REGEX: Regex =
        Regex::new(&format!(r"(?is)^\s*INSERT\s+INTO\s+{TABLE}")).expect("failed creating regex");
    static ref UPDATE_REGEX: Regex =
        Regex::new(&format!(r"(?is)^\s*UPDATE\s+(?:ONLY\s+)?{TABLE}"))
            .expect("failed creating regex");
    static ref DELETE_REGEX: Regex =
        Regex::new(&format!(r"(?is)^\s*DELETE\s+FROM\s+(?:ONLY\s+)?{TABLE}"))
            .expect("failed creating regex");
}

fn unquote(table: &str) -> &str {
    table
        .trim_start_matches(['"', '`'])
        .trim_end_matches(['"', '`'])
}

/// Reduces a statement to its keyword and primary table.
#[must_use]
pub fn sql_summary(sql: &str) -> String {
    let Some(keyword) = KEYWORD_REGEX
        .captures(sql)
        .and_then(|captures| captures.get(1))
        .map(|keyword| keyword.as_str().to_uppercase())
    else {
        return GENERIC_SQL.to_string();
    };

    let (pattern, label): (&Regex, &str) = match keyword.as_str() {
        "SELECT" => (&*SELECT_REGEX, "SELECT FROM"),
        "INSERT" => (&*INSERT_REGEX, "INSERT INTO"),
        "UPDATE" => (&*UPDATE_REGEX, "UPDATE"),
        "DELETE" => (&*DELETE_REGEX, "DELETE FROM"),
        _ => return keyword,
    };
    match pattern.captures(sql).and_then(|captures| captures.get(1)) {
        Some(table) => format!("{label} {}", unquote(table.as_str())),
        None => keyword,
    }
}
