// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Capture of panics nobody caught.
//!
//! The hook is chained in front of whatever hook was installed before, which
//! always runs, so the usual panic message still reaches stderr. Only panics
//! that end the process are captured: by default those raised on the `main`
//! thread. A panic in any other thread only ends that thread, and one the
//! application recovers with `catch_unwind` ends nothing, so both are left to
//! the previous hook alone.
//!
//! For a process-ending panic the hook parses it, makes one blocking delivery
//! attempt and only then lets the process react: the caller's callback if one
//! was given, otherwise exit with status 1.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info};

use crate::config::Config;
use crate::delivery::{DeliveryError, Receipt, Reporter};
use crate::errors::parsers::{CaptureOptions, ErrorParser, Failure};
use crate::errors::record::{ErrorLevel, ErrorRecord};

pub type UncaughtCallback =
    Arc<dyn Fn(&ErrorRecord, Result<Receipt, DeliveryError>) + Send + Sync>;

/// Process exit, replaceable so the uncaught path can be observed.
pub type ExitFn = Arc<dyn Fn(i32) + Send + Sync>;

/// Whether a panic raised on the current thread ends the process.
pub type FatalPanicFn = Arc<dyn Fn() -> bool + Send + Sync>;

pub const MAIN_THREAD: &str = "main";

/// Bumped on every install; hooks from earlier installs only forward.
static GENERATION: AtomicUsize = AtomicUsize::new(0);
/// Set while a capture is in flight.
static CAPTURING: AtomicBool = AtomicBool::new(false);

#[must_use]
pub fn process_exit() -> ExitFn {
    Arc::new(|code| std::process::exit(code))
}

/// Held while a capture is in flight; a panic raised meanwhile, e.g. on the
/// delivery worker, is not captured again.
struct CaptureGuard;

impl CaptureGuard {
    fn acquire() -> Option<Self> {
        (!CAPTURING.swap(true, Ordering::SeqCst)).then_some(CaptureGuard)
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.store(false, Ordering::SeqCst);
    }
}

/// Panics on the `main` thread end the process; others end their thread only.
#[must_use]
pub fn main_thread_only() -> FatalPanicFn {
    Arc::new(|| thread::current().name() == Some(MAIN_THREAD))
}

/// Chains the agent's hook in front of the current panic hook. Installing
/// again supersedes the previous agent hook, which then only forwards.
pub fn install(
    config: Arc<Config>,
    level: ErrorLevel,
    callback: Option<UncaughtCallback>,
    exit: ExitFn,
    is_fatal: FatalPanicFn,
) {
    let parser = ErrorParser::new(&config);
    let generation = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic| {
        previous(panic);

        if GENERATION.load(Ordering::SeqCst) != generation || !is_fatal() {
            return;
        }
        let Some(guard) = CaptureGuard::acquire() else {
            debug!("Panic while capturing an uncaught panic, not capturing it");
            return;
        };

        let failure = Failure::panic(panic.payload(), panic.location());
        let record = parser.parse(failure, CaptureOptions::default().level(level));

        let outcome = deliver_blocking(Arc::clone(&config), record.clone());
        match &outcome {
            Ok(receipt) => info!("Logged error to collector: {}", receipt.url),
            Err(e) => {
                info!("Could not notify collector");
                error!("{e}");
            }
        }
        drop(guard);

        match &callback {
            Some(callback) => callback(&record, outcome),
            None => exit(1),
        }
    }));
}

/// Runs the single delivery attempt on its own thread and runtime, so it
/// works whether or not the panicking thread was inside a tokio runtime.
fn deliver_blocking(config: Arc<Config>, record: ErrorRecord) -> Result<Receipt, DeliveryError> {
    let worker = thread::Builder::new()
        .name("apm-agent-uncaught".to_string())
        .spawn(move || {
            let reporter = Reporter::from_config(&config).ok_or_else(|| {
                DeliveryError::Runtime("reporting is not configured".to_string())
            })?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| DeliveryError::Runtime(e.to_string()))?;
            runtime.block_on(reporter.send_error(&record))
        })
        .map_err(|e| DeliveryError::Runtime(e.to_string()))?;

    worker.join().unwrap_or_else(|_| {
        Err(DeliveryError::Runtime(
            "uncaught delivery thread panicked".to_string(),
        ))
    })
}
