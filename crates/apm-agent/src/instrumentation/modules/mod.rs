// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Probes for specific libraries.

pub mod pg;

use crate::instrumentation::probe::Probe;

/// Probes an agent registers by default.
#[must_use]
pub fn default_probes() -> Vec<Probe> {
    vec![pg::probe()]
}
