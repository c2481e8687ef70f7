// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Transactions, their traces, and the ambient context that links
//! instrumented calls to the transaction they belong to.

pub mod context;
pub mod trace;
pub mod transaction;

pub use context::{activate, current, enter, ContextGuard, WithTransaction};
pub use trace::{Trace, TraceSnapshot};
pub use transaction::{Transaction, TransactionSnapshot};
