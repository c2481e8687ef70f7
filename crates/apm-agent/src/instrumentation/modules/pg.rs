// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL client probe.
//!
//! Traces `Client.query` on the pure client and, only once the application
//! asks for it, on the native binding's client too. Queries complete through
//! a trailing callback, a callback at the end of a values array, or `end` /
//! `error` events on the returned query.

use std::sync::Arc;

use semver::VersionReq;
use serde_json::Value;

use crate::instrumentation::call::Arg;
use crate::instrumentation::probe::{LazyTarget, Probe, Target};
use crate::instrumentation::shim::{CompletionPolicy, Policy, Summary};
use crate::instrumentation::sql_summary::{sql_summary, GENERIC_SQL};

pub const NAME: &str = "pg";
pub const SUPPORTED_VERSIONS: &str = ">=4.0.0, <7.0.0";
pub const QUERY_KIND: &str = "db.postgresql.query";
pub const NATIVE_EXPORT: &str = "native";

/// The statement text: a string first argument, or a query config's `text`.
fn statement(args: &[Arg]) -> Option<&str> {
    match args.first()?.as_value()? {
        Value::String(sql) => Some(sql.as_str()),
        Value::Object(config) => config.get("text")?.as_str(),
        _ => None,
    }
}

#[must_use]
pub fn summarize(args: &[Arg]) -> Option<Summary> {
    let sql = statement(args)?;
    Some(Summary::new(sql_summary(sql), QUERY_KIND).with_extra("sql", sql))
}

#[must_use]
pub fn policy() -> Policy {
    Policy {
        name: NAME.to_string(),
        summarizer: Arc::new(summarize),
        fallback: Summary::new(GENERIC_SQL, QUERY_KIND),
        completion: vec![
            CompletionPolicy::TrailingCallback,
            CompletionPolicy::CallbackInArray,
            CompletionPolicy::EventPair {
                success: "end".to_string(),
                failure: "error".to_string(),
            },
        ],
    }
}

#[must_use]
pub fn probe() -> Probe {
    let query = Target::new("Client", "query");
    Probe {
        name: NAME.to_string(),
        supported: supported_versions(),
        targets: vec![query.clone()],
        lazy: vec![LazyTarget {
            export: NATIVE_EXPORT.to_string(),
            targets: vec![query],
        }],
        policy: Arc::new(policy()),
    }
}

fn supported_versions() -> VersionReq {
    VersionReq::parse(SUPPORTED_VERSIONS).unwrap_or(VersionReq::STAR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summarize_string() {
        let summary = summarize(&[Arg::from("SELECT * FROM users")]).unwrap();
        assert_eq!(summary.signature, "SELECT FROM users");
        assert_eq!(summary.kind, QUERY_KIND);
        assert_eq!(summary.extra["sql"], "SELECT * FROM users");
    }

    #[test]
    fn test_summarize_query_config() {
        let summary = summarize(&[Arg::from(json!({"text": "SELECT 1", "values": []}))]).unwrap();
        assert_eq!(summary.signature, "SELECT");
        assert_eq!(summary.kind, QUERY_KIND);
        assert_eq!(summary.extra["sql"], "SELECT 1");
    }

    #[test]
    fn test_summarize_unrecognized() {
        assert!(summarize(&[Arg::from(json!(42))]).is_none());
        assert!(summarize(&[Arg::from(json!({"text": 42}))]).is_none());
        assert!(summarize(&[]).is_none());
        let fallback = policy().fallback;
        assert_eq!(fallback.signature, GENERIC_SQL);
        assert_eq!(fallback.kind, QUERY_KIND);
    }

    #[test]
    fn test_supported_versions() {
        let supported = supported_versions();
        assert_ne!(supported, VersionReq::STAR);
        assert!(supported.matches(&semver::Version::new(4, 0, 0)));
        assert!(supported.matches(&semver::Version::new(6, 4, 2)));
        assert!(!supported.matches(&semver::Version::new(7, 0, 0)));
        assert!(!supported.matches(&semver::Version::new(3, 9, 0)));
    }
}
