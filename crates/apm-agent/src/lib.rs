// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # APM Agent
//!
//! Runtime core of an application-performance-monitoring agent, embedded in
//! the monitored process.
//!
//! ## Overview
//!
//! - [`traces`]: transactions, the traces they own, and the ambient
//!   "current transaction" that follows a logical execution path across
//!   callbacks and `.await` points
//! - [`instrumentation`]: wrapping library methods so each call records a
//!   trace, whichever way the call signals completion, plus the PostgreSQL
//!   client probe
//! - [`errors`]: turning errors, messages and panics into error records
//! - [`delivery`]: posting records to the collector
//! - [`agent`]: the facade tying it together
//!
//! ## Example
//!
//! ```rust,ignore
//! use apm_agent::{logger, Agent, Config};
//!
//! let config = Config::from_env();
//! // optional: the agent leaves the global subscriber to the binary
//! logger::init(config.log_level)?;
//! let agent = Agent::new(config);
//! let pg = agent.instrument(pg_library);
//!
//! let transaction = agent.start_transaction("GET /users", "request");
//! pg.class("Client").unwrap().call("query", call)?;
//! agent.end_transaction(&transaction, Some(200));
//! ```

#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]

pub mod agent;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod http;
pub mod instrumentation;
pub mod logger;
pub mod proc;
pub mod traces;

pub use agent::Agent;
pub use config::Config;

/// Sent with every collector request.
pub const USER_AGENT: &str = concat!("apm-agent-rust/", env!("CARGO_PKG_VERSION"));
