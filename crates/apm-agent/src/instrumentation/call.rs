// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dynamic call model for instrumentable library methods.
//!
//! Libraries expose their methods as [`Method`] values taking a [`Call`]. A
//! method that completes asynchronously either receives a [`Callback`] among
//! its arguments or returns an [`EventEmitter`]. Receivers are captured by the
//! method closure itself, so a wrapper forwarding the same `Call` preserves
//! the original binding.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::errors::stack::Frame;
use crate::instrumentation::emitter::EventEmitter;

/// Completion callback. Receives the completion arguments, e.g. `(err, result)`.
pub type Callback = Box<dyn FnOnce(Vec<Value>) + Send>;

pub enum Arg {
    Value(Value),
    List(Vec<Arg>),
    Callback(Callback),
}

impl Arg {
    pub fn callback(f: impl FnOnce(Vec<Value>) + Send + 'static) -> Self {
        Arg::Callback(Box::new(f))
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_callback(&self) -> bool {
        matches!(self, Arg::Callback(_))
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Arg::List(items) => f.debug_tuple("List").field(items).finish(),
            Arg::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Value(value)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Value(Value::from(value))
    }
}

impl From<Vec<Arg>> for Arg {
    fn from(items: Vec<Arg>) -> Self {
        Arg::List(items)
    }
}

#[derive(Debug, Default)]
pub struct Call {
    pub args: Vec<Arg>,
    /// Stack of the code that made the call, attached to its trace.
    pub call_site: Option<Vec<Frame>>,
}

impl Call {
    #[must_use]
    pub fn new(args: Vec<Arg>) -> Self {
        Self {
            args,
            call_site: None,
        }
    }

    #[must_use]
    pub fn with_call_site(mut self, frames: Vec<Frame>) -> Self {
        self.call_site = Some(frames);
        self
    }
}

#[derive(Debug, Clone)]
pub enum Return {
    Unit,
    Value(Value),
    Emitter(EventEmitter),
}

impl Return {
    #[must_use]
    pub fn emitter(&self) -> Option<&EventEmitter> {
        match self {
            Return::Emitter(emitter) => Some(emitter),
            _ => None,
        }
    }
}

/// Error raised synchronously by an instrumented method. Opaque to the agent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct CallError(pub String);

pub type Method = Arc<dyn Fn(Call) -> Result<Return, CallError> + Send + Sync>;

pub fn method<F>(f: F) -> Method
where
    F: Fn(Call) -> Result<Return, CallError> + Send + Sync + 'static,
{
    Arc::new(f)
}
