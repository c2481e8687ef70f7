// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Generic wrapper turning any [`Method`] into a traced one.
//!
//! The wrapper captures the ambient transaction when the call is made and
//! carries it explicitly to the completion point, whichever way the method
//! signals completion. It never changes what the caller observes: return
//! values, errors and callback arguments pass through untouched.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::instrumentation::call::{Arg, Call, Method, Return};
use crate::traces::{context, Trace, Transaction};

/// Label and metadata for one intercepted call.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub signature: String,
    pub kind: String,
    pub extra: Map<String, Value>,
}

impl Summary {
    pub fn new(signature: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            kind: kind.into(),
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// How an instrumented method signals that its work is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// The last argument is a callback.
    TrailingCallback,
    /// The last argument is a list whose last element is a callback.
    CallbackInArray,
    /// The method returns an emitter that fires one of two events.
    EventPair { success: String, failure: String },
}

pub type Summarizer = Arc<dyn Fn(&[Arg]) -> Option<Summary> + Send + Sync>;

pub struct Policy {
    pub name: String,
    pub summarizer: Summarizer,
    /// Used when the summarizer does not recognize the arguments.
    pub fallback: Summary,
    /// Argument shapes are tried before the call, in order. Return shapes
    /// apply after the call, when no argument shape matched.
    pub completion: Vec<CompletionPolicy>,
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("fallback", &self.fallback)
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

#[must_use]
pub fn trailing_callback(args: &mut [Arg]) -> Option<&mut Arg> {
    let last = args.last_mut()?;
    last.is_callback().then_some(last)
}

#[must_use]
pub fn callback_in_array(args: &mut [Arg]) -> Option<&mut Arg> {
    let Arg::List(items) = args.last_mut()? else {
        return None;
    };
    let last = items.last_mut()?;
    last.is_callback().then_some(last)
}

/// Swaps the callback in `slot` for one that ends the trace, then runs the
/// original under the transaction captured at call time.
fn rewire(slot: &mut Arg, transaction: &Transaction, trace: &Trace) -> bool {
    let original = match std::mem::replace(slot, Arg::Value(Value::Null)) {
        Arg::Callback(original) => original,
        other => {
            *slot = other;
            return false;
        }
    };
    let transaction = transaction.clone();
    let trace = trace.clone();
    *slot = Arg::callback(move |args| {
        let _guard = context::enter(Some(transaction));
        trace.end();
        original(args);
    });
    true
}

fn rewire_arguments(
    args: &mut [Arg],
    completion: &[CompletionPolicy],
    transaction: &Transaction,
    trace: &Trace,
) -> bool {
    for policy in completion {
        let slot = match policy {
            CompletionPolicy::TrailingCallback => trailing_callback(args),
            CompletionPolicy::CallbackInArray => callback_in_array(args),
            CompletionPolicy::EventPair { .. } => continue,
        };
        if let Some(slot) = slot {
            return rewire(slot, transaction, trace);
        }
    }
    false
}

fn attach_events(result: &Return, completion: &[CompletionPolicy], trace: &Trace) -> bool {
    let Some(emitter) = result.emitter() else {
        return false;
    };
    let Some((success, failure)) = completion.iter().find_map(|policy| match policy {
        CompletionPolicy::EventPair { success, failure } => Some((success, failure)),
        _ => None,
    }) else {
        return false;
    };
    for event in [success, failure] {
        let trace = trace.clone();
        emitter.once(event, move |_| {
            trace.end();
        });
    }
    true
}

#[must_use]
pub fn wrap(original: Method, policy: Arc<Policy>) -> Method {
    Arc::new(move |mut call: Call| {
        let Some(transaction) = context::current() else {
            return original(call);
        };
        let Some(trace) = transaction.build_trace() else {
            return original(call);
        };

        if let Some(frames) = call.call_site.take() {
            trace.set_custom_stack(frames);
        }
        let summary =
            (policy.summarizer)(call.args.as_slice()).unwrap_or_else(|| policy.fallback.clone());
        for (key, value) in summary.extra {
            trace.set_extra(key, value);
        }
        debug!(
            "Intercepted {} call: {} ({})",
            policy.name, summary.signature, summary.kind
        );
        trace.start(summary.signature, summary.kind);

        let rewired = rewire_arguments(&mut call.args, &policy.completion, &transaction, &trace);
        let result = original(call);
        match &result {
            Ok(value) => {
                if !rewired && !attach_events(value, &policy.completion, &trace) {
                    trace.end();
                }
            }
            Err(_) => {
                trace.end();
            }
        }
        result
    })
}
