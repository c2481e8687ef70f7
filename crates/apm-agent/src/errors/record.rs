// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::request::HttpContext;
use crate::errors::stack::Frame;

/// Severity of a captured record, as understood by the collector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl ErrorLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorLevel::Debug => "debug",
            ErrorLevel::Info => "info",
            ErrorLevel::Warning => "warning",
            ErrorLevel::Error => "error",
            ErrorLevel::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(ErrorLevel::Debug),
            "info" => Ok(ErrorLevel::Info),
            "warn" | "warning" => Ok(ErrorLevel::Warning),
            "error" => Ok(ErrorLevel::Error),
            "fatal" | "critical" => Ok(ErrorLevel::Fatal),
            _ => Err(format!(
                "Invalid error level: '{s}'. Valid levels are: debug, info, warning, error, fatal",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Exception {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stacktrace {
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Machine {
    pub hostname: String,
}

/// Canonical captured failure, ready for delivery.
///
/// Records built from plain messages never carry `exception` or `culprit`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<Exception>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub culprit: Option<String>,
    pub level: ErrorLevel,
    /// UTC, second precision: `YYYY-MM-DDTHH:MM:SS`.
    pub timestamp: String,
    pub machine: Machine,
    pub extra: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpContext>,
}

impl ErrorRecord {
    #[must_use]
    pub fn frames(&self) -> &[Frame] {
        self.stacktrace
            .as_ref()
            .map_or(&[], |stacktrace| stacktrace.frames.as_slice())
    }
}
