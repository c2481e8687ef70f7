// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ambient "current transaction" tracking across asynchronous boundaries.
//!
//! Instrumentation code needs to know which [`Transaction`] a call belongs to
//! without the caller threading it through every function. The ambient slot
//! lives per OS thread; every suspension point the agent knows about saves the
//! slot before yielding and restores it on resumption:
//!
//! ```text
//!   enter(tx) ──> call instrumented method ──> capture current() ──┐
//!                                                                   │ (suspended)
//!   completion fires ──> enter(captured) ──> original callback ─────┘
//!                     └─ guard drop restores whatever was there before
//! ```
//!
//! For `async` code the same discipline is applied per `poll` by
//! [`WithTransaction`], so a task keeps its transaction across `.await`
//! points even when it is resumed on a different worker thread.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use pin_project::pin_project;

use crate::traces::transaction::Transaction;

thread_local! {
    static CURRENT: RefCell<Option<Transaction>> = const { RefCell::new(None) };
}

/// Marks `transaction` as the ambient context of this execution path.
/// Last writer wins.
pub fn activate(transaction: Transaction) {
    CURRENT.with(|current| *current.borrow_mut() = Some(transaction));
}

/// The transaction visible to the calling code path.
#[must_use]
pub fn current() -> Option<Transaction> {
    CURRENT.with(|current| current.borrow().clone())
}

pub fn clear() {
    CURRENT.with(|current| current.borrow_mut().take());
}

fn replace(transaction: Option<Transaction>) -> Option<Transaction> {
    CURRENT.with(|current| std::mem::replace(&mut *current.borrow_mut(), transaction))
}

/// Restores the previously active transaction when dropped, including during
/// unwinding.
#[must_use = "the previous context is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    previous: Option<Option<Transaction>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            replace(previous);
        }
    }
}

/// Makes `transaction` ambient until the returned guard is dropped.
pub fn enter(transaction: Option<Transaction>) -> ContextGuard {
    ContextGuard {
        previous: Some(replace(transaction)),
    }
}

/// Runs `f` with `transaction` as the ambient context.
pub fn scope<R>(transaction: Option<Transaction>, f: impl FnOnce() -> R) -> R {
    let _guard = enter(transaction);
    f()
}

/// Wraps a one-shot continuation so it runs under `transaction`, whatever is
/// ambient at the time it is finally invoked.
pub fn bind<A, R, F>(transaction: Option<Transaction>, f: F) -> impl FnOnce(A) -> R
where
    F: FnOnce(A) -> R,
{
    move |arg| scope(transaction, || f(arg))
}

/// Like [`bind`], capturing whatever is ambient right now.
pub fn bind_current<A, R, F>(f: F) -> impl FnOnce(A) -> R
where
    F: FnOnce(A) -> R,
{
    bind(current(), f)
}

/// Future that polls its inner future with a fixed ambient transaction.
#[pin_project]
#[derive(Debug)]
pub struct Bound<F> {
    #[pin]
    inner: F,
    transaction: Option<Transaction>,
}

impl<F: Future> Future for Bound<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = enter(this.transaction.clone());
        this.inner.poll(cx)
    }
}

/// Carries an ambient transaction across the `.await` points of a future.
pub trait WithTransaction: Future + Sized {
    fn with_transaction(self, transaction: Option<Transaction>) -> Bound<Self> {
        Bound {
            inner: self,
            transaction,
        }
    }

    /// Binds whatever is ambient at the time the future is created.
    fn with_current_transaction(self) -> Bound<Self> {
        self.with_transaction(current())
    }
}

impl<F: Future> WithTransaction for F {}
