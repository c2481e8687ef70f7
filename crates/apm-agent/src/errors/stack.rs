// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stack capture for error records and trace call sites.
//!
//! Frames are ordered from the top of the stack (the most recent call)
//! downwards. Frames belonging to the capture machinery itself (the
//! `backtrace` crate, the panic runtime and this module's callers inside
//! `apm_agent::errors`) are stripped from the top before the depth limit is
//! applied.

use backtrace::Backtrace;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Frame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

const AGENT_PREFIX: &str = "apm_agent::";

const CAPTURE_PREFIXES: &[&str] = &[
    "backtrace::",
    "apm_agent::errors::",
    "std::backtrace",
    "std::panicking",
    "std::panic::",
    "std::sys",
    "core::panicking",
    "core::ops::function::",
    "alloc::boxed::",
    "rust_begin_unwind",
    "__rust",
];

fn function_starts_with(frame: &Frame, prefixes: &[&str]) -> bool {
    frame.function.as_deref().is_some_and(|function| {
        let function = function.trim_start_matches('<');
        prefixes.iter().any(|prefix| function.starts_with(prefix))
    })
}

fn is_capture_frame(frame: &Frame) -> bool {
    function_starts_with(frame, CAPTURE_PREFIXES)
}

/// Whether the frame belongs to the agent rather than to the application.
#[must_use]
pub fn is_agent_frame(frame: &Frame) -> bool {
    function_starts_with(frame, &[AGENT_PREFIX])
}

/// Captures the calling stack, up to `limit` frames (`None` for unlimited).
#[must_use]
pub fn capture(limit: Option<usize>) -> Vec<Frame> {
    let backtrace = Backtrace::new();
    let frames = backtrace
        .frames()
        .iter()
        .flat_map(|frame| frame.symbols())
        .map(|symbol| Frame {
            filename: symbol.filename().map(|path| path.display().to_string()),
            lineno: symbol.lineno(),
            function: symbol.name().map(|name| format!("{name:#}")),
        })
        .collect();
    let mut frames = strip_capture_frames(frames);
    if let Some(limit) = limit {
        frames.truncate(limit);
    }
    frames
}

pub(crate) fn strip_capture_frames(mut frames: Vec<Frame>) -> Vec<Frame> {
    let internal = frames.iter().take_while(|f| is_capture_frame(f)).count();
    frames.drain(..internal);
    frames
}

/// Best guess at the application frame responsible for a failure.
#[must_use]
pub fn culprit(frames: &[Frame]) -> Option<String> {
    let frame = frames
        .iter()
        .find(|frame| !is_agent_frame(frame) && !is_capture_frame(frame))?;
    match (&frame.function, &frame.filename) {
        (Some(function), _) => Some(function.clone()),
        (None, Some(filename)) => Some(match frame.lineno {
            Some(lineno) => format!("{filename}:{lineno}"),
            None => filename.clone(),
        }),
        (None, None) => None,
    }
}
