// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Verbosity of the agent's own diagnostics.
//!
//! Set through `APM_LOG_LEVEL` or [`ConfigBuilder::log_level`](super::ConfigBuilder::log_level).
//! Parsing is case-insensitive; unknown values fall back to **INFO**.

use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Failures that stop the agent from doing its job.
    Error,
    Warn,
    /// Startup, disablement and delivery outcomes. Default.
    #[default]
    Info,
    /// Intercepted calls and payload details.
    Debug,
    Trace,
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl LogLevel {
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" | "fatal" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Invalid log level: '{s}'. Valid levels are: error, warn, info, debug, trace",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        if let Value::String(s) = value {
            match LogLevel::from_str(&s) {
                Ok(level) => Ok(level),
                Err(e) => {
                    error!("{}", e);
                    Ok(LogLevel::default())
                }
            }
        } else {
            error!("Expected a string for log level, got {:?}", value);
            Ok(LogLevel::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_str_case_insensitive() {
        assert_eq!(LogLevel::from_str("debug").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str("DEBUG").unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::from_str(" Warn ").unwrap(), LogLevel::Warn);
    }

    #[test]
    fn test_legacy_names() {
        assert_eq!(LogLevel::from_str("fatal").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("warning").unwrap(), LogLevel::Warn);
    }

    #[test]
    fn test_invalid() {
        let err = LogLevel::from_str("loud").unwrap_err();
        assert!(err.contains("loud"));
    }

    #[test]
    fn test_deserialize_falls_back_to_default() {
        let level: LogLevel = serde_json::from_value(json!("trace")).unwrap();
        assert_eq!(level, LogLevel::Trace);
        let level: LogLevel = serde_json::from_value(json!("nope")).unwrap();
        assert_eq!(level, LogLevel::Info);
        let level: LogLevel = serde_json::from_value(json!(5)).unwrap();
        assert_eq!(level, LogLevel::Info);
    }

    #[test]
    fn test_level_filter() {
        assert_eq!(LogLevel::Error.as_level_filter(), LevelFilter::ERROR);
        assert_eq!(LogLevel::Trace.as_directive(), "trace");
    }
}
