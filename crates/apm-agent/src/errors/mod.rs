// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error capture pipeline.

pub mod parsers;
pub mod record;
pub mod request;
pub mod stack;
pub mod uncaught;

pub use parsers::{CaptureOptions, ErrorParser, Failure};
pub use record::{ErrorLevel, ErrorRecord, Exception};
pub use request::{HttpContext, RequestContext, RequestInfo};
pub use stack::Frame;
