// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The agent facade: configuration, capture, transactions and probes.
//!
//! An agent whose config is inactive, or lacks any credential, is inert. It
//! captures nothing, delivers nothing and instruments nothing.
//!
//! The agent never installs a log subscriber. Binaries that want the agent's
//! diagnostics formatted call [`logger::init`](crate::logger::init) themselves.

use std::future::Future;
use std::sync::Arc;
use std::thread;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::delivery::{
    DeliveryError, DeliveryEvent, DeliveryHandle, Deployment, Receipt, Reporter,
};
use crate::errors::uncaught::{self, ExitFn, FatalPanicFn, UncaughtCallback};
use crate::errors::{CaptureOptions, ErrorParser, Failure};
use crate::instrumentation::library::Library;
use crate::instrumentation::modules::default_probes;
use crate::instrumentation::probe::{install, Probe};
use crate::traces::{context, Transaction};

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct Agent {
    config: Arc<Config>,
    parser: ErrorParser,
    reporter: Option<Arc<Reporter>>,
    events: broadcast::Sender<DeliveryEvent>,
    probes: Vec<Probe>,
    exit: ExitFn,
    is_fatal: FatalPanicFn,
}

impl Agent {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::new_with_exit(config, uncaught::process_exit())
    }

    /// Like [`Agent::new`], with the exit function the uncaught panic path
    /// calls when no callback was given.
    #[must_use]
    pub fn new_with_exit(config: Config, exit: ExitFn) -> Self {
        let config = Arc::new(config);
        let reporter = Reporter::from_config(&config).map(Arc::new);
        if reporter.is_none() {
            info!(
                "APM agent disabled: reporting requires active=true and an app id, organization id and secret token"
            );
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let agent = Self {
            parser: ErrorParser::new(&config),
            config,
            reporter,
            events,
            probes: default_probes(),
            exit,
            is_fatal: uncaught::main_thread_only(),
        };
        if agent.is_active() && agent.config.capture_exceptions {
            agent.handle_uncaught_exceptions(None);
        }
        agent
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.reporter.is_some()
    }

    #[must_use]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Outcome of every delivery started after subscribing.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.events.subscribe()
    }

    /// Captures a failure and starts its delivery. `None` when inactive.
    pub fn capture_error(
        &self,
        failure: impl Into<Failure>,
        options: CaptureOptions,
    ) -> Option<DeliveryHandle> {
        let reporter = self.reporter.as_ref()?;
        let record = self.parser.parse(failure.into(), options);
        Some(self.dispatch(reporter, "error", move |reporter| async move {
            reporter.send_error(&record).await
        }))
    }

    pub fn capture_message(
        &self,
        message: impl Into<String>,
        options: CaptureOptions,
    ) -> Option<DeliveryHandle> {
        self.capture_error(Failure::Message(message.into()), options)
    }

    /// Creates a transaction and, when active, makes it the ambient one.
    pub fn start_transaction(&self, name: impl Into<String>, kind: impl Into<String>) -> Transaction {
        let transaction = Transaction::new(name, kind);
        if self.is_active() {
            context::activate(transaction.clone());
        }
        transaction
    }

    /// Ends `transaction` and delivers it with its traces. `None` when
    /// inactive or when the transaction had already ended.
    pub fn end_transaction(
        &self,
        transaction: &Transaction,
        result: Option<u16>,
    ) -> Option<DeliveryHandle> {
        if !transaction.end(result) {
            return None;
        }
        if context::current().is_some_and(|current| current.ptr_eq(transaction)) {
            context::clear();
        }
        let reporter = self.reporter.as_ref()?;
        let snapshot = transaction.snapshot();
        Some(self.dispatch(reporter, "transaction", move |reporter| async move {
            reporter.send_transaction(&snapshot).await
        }))
    }

    pub fn track_deployment(&self, deployment: Deployment) -> Option<DeliveryHandle> {
        let reporter = self.reporter.as_ref()?;
        Some(self.dispatch(reporter, "deployment", move |reporter| async move {
            reporter.send_deployment(&deployment).await
        }))
    }

    /// Replaces the rule deciding which panics end the process, by default
    /// those on the `main` thread. Applies to hooks installed afterwards.
    #[must_use]
    pub fn with_fatal_panics(mut self, is_fatal: FatalPanicFn) -> Self {
        self.is_fatal = is_fatal;
        self
    }

    /// Chains the panic hook in front of the existing one. Installing again
    /// supersedes the agent's previous hook.
    pub fn handle_uncaught_exceptions(&self, callback: Option<UncaughtCallback>) {
        if !self.is_active() {
            debug!("Agent inactive, not handling uncaught panics");
            return;
        }
        uncaught::install(
            Arc::clone(&self.config),
            self.config.exception_log_level,
            callback,
            Arc::clone(&self.exit),
            Arc::clone(&self.is_fatal),
        );
    }

    pub fn register_probe(&mut self, probe: Probe) {
        self.probes.push(probe);
    }

    #[must_use]
    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    /// Applies every registered probe matching the library's name.
    #[must_use]
    pub fn instrument(&self, library: Library) -> Library {
        if !self.is_active() {
            return library;
        }
        self.probes
            .iter()
            .fold(library, |library, probe| install(probe, library))
    }

    /// Runs a send without blocking the caller, on the current tokio runtime
    /// if there is one, otherwise on a helper thread.
    fn dispatch<F, Fut>(&self, reporter: &Arc<Reporter>, what: &'static str, send: F) -> DeliveryHandle
    where
        F: FnOnce(Arc<Reporter>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Receipt, DeliveryError>> + Send + 'static,
    {
        let (sender, handle) = DeliveryHandle::channel();
        let events = self.events.clone();
        let reporter = Arc::clone(reporter);
        let task = async move {
            let outcome = send(reporter).await;
            match &outcome {
                Ok(receipt) => info!("Logged {what} to collector: {}", receipt.url),
                Err(e) => {
                    info!("Could not notify collector");
                    error!("{e}");
                }
            }
            // no subscribers is fine
            let _ = events.send(DeliveryEvent::from(&outcome));
            let _ = sender.send(outcome);
        };

        if let Ok(runtime) = Handle::try_current() {
            runtime.spawn(task);
            return handle;
        }
        let spawned = thread::Builder::new()
            .name("apm-agent-delivery".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(task),
                    Err(e) => error!("Could not start delivery runtime: {e}"),
                }
            });
        if let Err(e) = spawned {
            error!("Could not start delivery thread: {e}");
        }
        handle
    }
}
