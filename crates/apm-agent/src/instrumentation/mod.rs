// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Instrumentation of library calls.
//!
//! [`shim::wrap`] is the generic adapter, [`probe::install`] applies it to a
//! [`library::Library`] for each target a [`probe::Probe`] names, and
//! [`modules`] holds the concrete probes.

pub mod call;
pub mod emitter;
pub mod library;
pub mod modules;
pub mod probe;
pub mod shim;
pub mod sql_summary;

pub use call::{method, Arg, Call, CallError, Callback, Method, Return};
pub use emitter::EventEmitter;
pub use library::{Class, Library};
pub use probe::{install, LazyTarget, Probe, Target};
pub use shim::{wrap, CompletionPolicy, Policy, Summary};
