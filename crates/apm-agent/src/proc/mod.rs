// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Facts about the host process attached to every captured record.

pub mod hostname;

/// Version string identifying the instrumented runtime and the agent.
#[must_use]
pub fn runtime_version() -> String {
    format!(
        "rust ({}-{}) {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}
