// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Root unit of observed work.
//!
//! A [`Transaction`] owns the [`Trace`]s recorded under it, in the order they
//! were opened. Traces may only be attached while the transaction is open, and
//! the end timestamp is written once.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::traces::trace::{Trace, TraceSnapshot};

#[derive(Debug, Default)]
struct TransactionState {
    ended_at: Option<DateTime<Utc>>,
    result: Option<u16>,
    traces: Vec<Trace>,
}

pub(crate) struct TransactionInner {
    pub(crate) id: Uuid,
    name: String,
    kind: String,
    started_at: DateTime<Utc>,
    state: Mutex<TransactionState>,
}

/// Shared handle to a transaction. Equality is identity.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

/// Serializable view of a transaction and its traces.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransactionSnapshot {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<u16>,
    pub traces: Vec<TraceSnapshot>,
}

impl Transaction {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id: Uuid::new_v4(),
                name: name.into(),
                kind: kind.into(),
                started_at: Utc::now(),
                state: Mutex::new(TransactionState::default()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<TransactionInner>) -> Self {
        Self { inner }
    }

    fn state(&self) -> MutexGuard<'_, TransactionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.state().ended_at
    }

    #[must_use]
    pub fn result(&self) -> Option<u16> {
        self.state().result
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state().ended_at.is_some()
    }

    /// Creates a new open trace attached to this transaction.
    ///
    /// Returns `None` once the transaction has ended.
    #[must_use]
    pub fn build_trace(&self) -> Option<Trace> {
        let mut state = self.state();
        if state.ended_at.is_some() {
            return None;
        }
        let trace = Trace::new(Arc::downgrade(&self.inner));
        state.traces.push(trace.clone());
        Some(trace)
    }

    /// Child traces in open order.
    #[must_use]
    pub fn traces(&self) -> Vec<Trace> {
        self.state().traces.clone()
    }

    /// Closes the transaction with an optional result code.
    ///
    /// Returns `false` (and changes nothing) if it was already closed.
    pub fn end(&self, result: Option<u16>) -> bool {
        let mut state = self.state();
        if state.ended_at.is_some() {
            return false;
        }
        state.ended_at = Some(Utc::now().max(self.inner.started_at));
        state.result = result;
        true
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn snapshot(&self) -> TransactionSnapshot {
        let (ended_at, result, traces) = {
            let state = self.state();
            (state.ended_at, state.result, state.traces.clone())
        };
        let duration_ms = ended_at.map(|ended| {
            (ended - self.inner.started_at)
                .num_microseconds()
                .map_or(0.0, |us| us as f64 / 1000.0)
        });
        TransactionSnapshot {
            id: self.inner.id,
            name: self.inner.name.clone(),
            kind: self.inner.kind.clone(),
            started_at: self.inner.started_at,
            ended_at,
            duration_ms,
            result,
            traces: traces.iter().map(Trace::snapshot).collect(),
        }
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}
