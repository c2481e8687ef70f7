// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Timed sub-operations (spans) recorded under a [`Transaction`].
//!
//! A trace is created open by [`Transaction::build_trace`], labelled and timed
//! by [`Trace::start`], and closed by [`Trace::end`]. Closing is idempotent:
//! completion signals for the same operation may race (a callback and an event
//! can both fire) and only the first one is recorded.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::stack::Frame;
use crate::traces::transaction::{Transaction, TransactionInner};

/// Signature used until [`Trace::start`] labels the trace.
pub const UNNAMED_SIGNATURE: &str = "unnamed";
/// Kind used until [`Trace::start`] categorises the trace.
pub const CUSTOM_KIND: &str = "custom";

#[derive(Debug)]
struct TraceState {
    signature: String,
    kind: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    extra: Map<String, Value>,
    custom_stack: Option<Vec<Frame>>,
}

pub(crate) struct TraceInner {
    id: Uuid,
    transaction: Weak<TransactionInner>,
    state: Mutex<TraceState>,
}

/// Shared handle to a span. Clones refer to the same span.
#[derive(Clone)]
pub struct Trace {
    inner: Arc<TraceInner>,
}

/// Serializable view of a trace at a point in time.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TraceSnapshot {
    pub id: Uuid,
    pub transaction: Option<Uuid>,
    pub signature: String,
    pub kind: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    pub extra: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Vec<Frame>>,
}

impl Trace {
    pub(crate) fn new(transaction: Weak<TransactionInner>) -> Self {
        Self {
            inner: Arc::new(TraceInner {
                id: Uuid::new_v4(),
                transaction,
                state: Mutex::new(TraceState {
                    signature: UNNAMED_SIGNATURE.to_string(),
                    kind: CUSTOM_KIND.to_string(),
                    started_at: Utc::now(),
                    ended_at: None,
                    extra: Map::new(),
                    custom_stack: None,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TraceState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The owning transaction, if it is still alive.
    #[must_use]
    pub fn transaction(&self) -> Option<Transaction> {
        self.inner
            .transaction
            .upgrade()
            .map(Transaction::from_inner)
    }

    /// Labels the trace and (re)starts its timer. Ignored once the trace ended.
    pub fn start(&self, signature: impl Into<String>, kind: impl Into<String>) {
        let mut state = self.state();
        if state.ended_at.is_some() {
            return;
        }
        state.signature = signature.into();
        state.kind = kind.into();
        state.started_at = Utc::now();
    }

    /// Closes the trace. Returns `true` only for the call that actually closed it.
    pub fn end(&self) -> bool {
        let mut state = self.state();
        if state.ended_at.is_some() {
            return false;
        }
        let now = Utc::now();
        // wall clock may step backwards; end never precedes start
        state.ended_at = Some(now.max(state.started_at));
        true
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state().ended_at.is_some()
    }

    #[must_use]
    pub fn signature(&self) -> String {
        self.state().signature.clone()
    }

    #[must_use]
    pub fn kind(&self) -> String {
        self.state().kind.clone()
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.state().started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.state().ended_at
    }

    pub fn set_extra(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.state().extra.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn extra(&self) -> Map<String, Value> {
        self.state().extra.clone()
    }

    /// Records where the traced call was issued from, for operations whose
    /// completion runs without the originating stack.
    pub fn set_custom_stack(&self, frames: Vec<Frame>) {
        self.state().custom_stack = Some(frames);
    }

    #[must_use]
    pub fn custom_stack(&self) -> Option<Vec<Frame>> {
        self.state().custom_stack.clone()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Trace) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn snapshot(&self) -> TraceSnapshot {
        let transaction = self.inner.transaction.upgrade().map(|tx| tx.id);
        let state = self.state();
        let duration_ms = state.ended_at.map(|ended| {
            (ended - state.started_at)
                .num_microseconds()
                .map_or(0.0, |us| us as f64 / 1000.0)
        });
        TraceSnapshot {
            id: self.inner.id,
            transaction,
            signature: state.signature.clone(),
            kind: state.kind.clone(),
            started_at: state.started_at,
            ended_at: state.ended_at,
            duration_ms,
            extra: state.extra.clone(),
            stacktrace: state.custom_stack.clone(),
        }
    }
}

impl PartialEq for Trace {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Trace {}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Trace")
            .field("id", &self.inner.id)
            .field("signature", &state.signature)
            .field("kind", &state.kind)
            .field("ended", &state.ended_at.is_some())
            .finish()
    }
}
