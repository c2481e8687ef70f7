// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Normalization and enrichment of captured failures.
//!
//! `raw failure -> normalized record -> enriched record`. Both steps are pure
//! apart from reading the clock and capturing the stack.

use std::any::Any;
use std::panic::Location;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::error;

use crate::config::Config;
use crate::errors::record::{ErrorLevel, ErrorRecord, Exception, Machine, Stacktrace};
use crate::errors::request::{HttpContext, RequestContext};
use crate::errors::stack::{self, Frame};
use crate::proc;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const PANIC_TYPE: &str = "panic";

/// A failure as handed to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    Error {
        type_name: String,
        message: String,
        /// Messages of the `source()` chain, outermost first.
        causes: Vec<String>,
        /// Stack at the point the failure was built.
        frames: Vec<Frame>,
    },
    Message(String),
    Panic {
        message: String,
        location: Option<Frame>,
    },
}

impl Failure {
    pub fn from_error<E: std::error::Error + ?Sized>(error: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Failure::Error {
            type_name: short_type_name(std::any::type_name::<E>()),
            message: error.to_string(),
            causes,
            frames: stack::capture(None),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Failure::Message(message.into())
    }

    /// Built from the pieces a panic hook receives.
    #[must_use]
    pub fn panic(payload: &(dyn Any + Send), location: Option<&Location<'_>>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "Box<dyn Any>".to_string()
        };
        Failure::Panic {
            message,
            location: location.map(|location| Frame {
                filename: Some(location.file().to_string()),
                lineno: Some(location.line()),
                function: None,
            }),
        }
    }

    #[must_use]
    pub fn is_message(&self) -> bool {
        matches!(self, Failure::Message(_))
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Failure::Message(message.to_string())
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Failure::Message(message)
    }
}

/// Keeps the last two `::` segments of every path in a type name, generic
/// arguments included: `std::io::error::Error` becomes `error::Error` and
/// `dyn core::error::Error` becomes `dyn error::Error`.
fn short_type_name(full: &str) -> String {
    let mut short = String::with_capacity(full.len());
    let mut segment = String::new();
    for c in full.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            segment.push(c);
        } else {
            short.push_str(last_two_segments(&segment));
            segment.clear();
            short.push(c);
        }
    }
    short.push_str(last_two_segments(&segment));
    short
}

fn last_two_segments(path: &str) -> &str {
    let mut separators = path.rmatch_indices("::").map(|(index, _)| index);
    separators.next();
    match separators.next() {
        Some(index) => &path[index + 2..],
        None => path,
    }
}

/// Per-capture options.
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct CaptureOptions {
    pub level: Option<ErrorLevel>,
    pub extra: Map<String, Value>,
    pub http: Option<HttpContext>,
    /// Values substituted, in order, for `%s`/`%d` placeholders in a message.
    pub params: Vec<String>,
}

impl CaptureOptions {
    pub fn level(mut self, level: ErrorLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// The request is read immediately; only the sanitized context is kept.
    pub fn request<R: RequestContext + ?Sized>(mut self, request: &R) -> Self {
        self.http = Some(HttpContext::from_request(request));
        self
    }

    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }
}

/// Replaces `%s` and `%d` placeholders in order. `%%` is a literal percent.
#[must_use]
pub fn format_params(template: &str, params: &[String]) -> String {
    let mut formatted = String::with_capacity(template.len());
    let mut params = params.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            formatted.push(c);
            continue;
        }
        match chars.peek() {
            Some('%') => {
                chars.next();
                formatted.push('%');
            }
            Some(spec @ ('s' | 'd')) => {
                let spec = *spec;
                chars.next();
                match params.next() {
                    Some(param) => formatted.push_str(param),
                    None => {
                        formatted.push('%');
                        formatted.push(spec);
                    }
                }
            }
            _ => formatted.push('%'),
        }
    }
    formatted
}

#[derive(Debug, Clone)]
pub struct ErrorParser {
    hostname: String,
    stack_trace_limit: Option<usize>,
}

impl ErrorParser {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            hostname: config.hostname.clone(),
            stack_trace_limit: config.stack_trace_limit,
        }
    }

    #[must_use]
    pub fn parse(&self, failure: Failure, options: CaptureOptions) -> ErrorRecord {
        let record = self.normalize(failure, options);
        self.enrich(record)
    }

    fn limit(&self, mut frames: Vec<Frame>) -> Vec<Frame> {
        if let Some(limit) = self.stack_trace_limit {
            frames.truncate(limit);
        }
        frames
    }

    fn normalize(&self, failure: Failure, options: CaptureOptions) -> ErrorRecord {
        let CaptureOptions {
            level,
            mut extra,
            http,
            params,
        } = options;

        let (message, param_message, exception, frames, culprit, level) = match failure {
            Failure::Message(template) => {
                let mut frames = stack::capture(None);
                // the agent's entry point is not part of the caller's stack
                let agent = frames.iter().take_while(|f| stack::is_agent_frame(f)).count();
                frames.drain(..agent);
                let (message, param_message) = if params.is_empty() {
                    (template, None)
                } else {
                    (format_params(&template, &params), Some(template))
                };
                (
                    message,
                    param_message,
                    None,
                    self.limit(frames),
                    None,
                    level.unwrap_or(ErrorLevel::Info),
                )
            }
            Failure::Error {
                type_name,
                message,
                causes,
                frames,
            } => {
                if !causes.is_empty() {
                    extra.insert("causes".to_string(), Value::from(causes));
                }
                let frames = self.limit(frames);
                let culprit = stack::culprit(&frames);
                (
                    format!("{type_name}: {message}"),
                    None,
                    Some(Exception {
                        kind: type_name,
                        value: message,
                    }),
                    frames,
                    culprit,
                    level.unwrap_or(ErrorLevel::Error),
                )
            }
            Failure::Panic { message, location } => {
                let frames = self.limit(stack::capture(None));
                let culprit = location
                    .as_ref()
                    .and_then(|location| stack::culprit(std::slice::from_ref(location)))
                    .or_else(|| stack::culprit(&frames));
                (
                    format!("{PANIC_TYPE}: {message}"),
                    None,
                    Some(Exception {
                        kind: PANIC_TYPE.to_string(),
                        value: message,
                    }),
                    frames,
                    culprit,
                    level.unwrap_or(ErrorLevel::Fatal),
                )
            }
        };

        error!("{}", message);

        ErrorRecord {
            message,
            param_message,
            exception,
            stacktrace: (!frames.is_empty()).then_some(Stacktrace { frames }),
            culprit,
            level,
            timestamp: String::new(),
            machine: Machine {
                hostname: String::new(),
            },
            extra,
            http,
        }
    }

    fn enrich(&self, mut record: ErrorRecord) -> ErrorRecord {
        record.timestamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        record.machine = Machine {
            hostname: self.hostname.clone(),
        };
        record
            .extra
            .insert("runtime".to_string(), Value::from(proc::runtime_version()));
        record
    }
}
