// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use std::io::Write;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use apm_agent::errors::uncaught::{ExitFn, FatalPanicFn, UncaughtCallback};
use apm_agent::errors::ErrorLevel;
use apm_agent::{Agent, Config};
use common::{active_config, errors_path};
use mockito::Matcher;
use serde_json::json;
use serial_test::serial;

const DOOMED_THREAD: &str = "doomed";

/// Treats panics on the `doomed` thread as ending the process.
fn doomed_is_fatal() -> FatalPanicFn {
    Arc::new(|| thread::current().name() == Some(DOOMED_THREAD))
}

fn panic_on(name: &str, message: &'static str) {
    let result = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || panic!("{message}"))
        .unwrap()
        .join();
    assert!(result.is_err());
}

fn recording_exit() -> (ExitFn, Arc<Mutex<Vec<i32>>>) {
    let exits = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&exits);
    (
        Arc::new(move |code| recorder.lock().unwrap().push(code)),
        exits,
    )
}

fn agent(config: Config, exit: ExitFn) -> Agent {
    Agent::new_with_exit(config, exit).with_fatal_panics(doomed_is_fatal())
}

fn restore_default_hook() {
    let _ = panic::take_hook();
}

#[test]
#[serial]
fn exit_waits_for_the_delivery_to_resolve() {
    let responded = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&responded);

    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", errors_path().as_str())
        .match_body(Matcher::PartialJson(json!({
            "level": "fatal",
            "exception": {"type": "panic", "value": "worker exploded"},
        })))
        .with_status(202)
        .with_chunked_body(move |writer| {
            thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
            writer.write_all(br#"{"url": "https://collector.example.com/errors/1"}"#)
        })
        .create();

    // records whether the collector had answered when exit ran
    let seen_at_exit = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen_at_exit);
    let exit: ExitFn = Arc::new(move |code| {
        recorder
            .lock()
            .unwrap()
            .push((code, responded.load(Ordering::SeqCst)));
    });
    let agent = agent(active_config(&server.url()), exit);
    agent.handle_uncaught_exceptions(None);

    panic_on(DOOMED_THREAD, "worker exploded");
    restore_default_hook();

    assert_eq!(*seen_at_exit.lock().unwrap(), vec![(1, true)]);
    mock.assert();
}

#[test]
#[serial]
fn callback_receives_record_and_outcome() {
    let mut server = mockito::Server::new();
    let _mock = server
        .mock("POST", errors_path().as_str())
        .with_status(202)
        .with_header("location", "https://collector.example.com/errors/77")
        .create();

    let (exit, exits) = recording_exit();
    let mut config = active_config(&server.url());
    config.exception_log_level = ErrorLevel::Error;
    let agent = agent(config, exit);

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let callback: UncaughtCallback = Arc::new(move |record, outcome| {
        *sink.lock().unwrap() = Some((record.clone(), outcome));
    });
    agent.handle_uncaught_exceptions(Some(callback));

    panic_on(DOOMED_THREAD, "handled elsewhere");
    restore_default_hook();

    assert!(exits.lock().unwrap().is_empty());
    let (record, outcome) = seen.lock().unwrap().take().unwrap();
    assert_eq!(record.level, ErrorLevel::Error);
    assert_eq!(record.exception.unwrap().value, "handled elsewhere");
    assert!(record.culprit.unwrap().contains("uncaught_panic_test.rs"));
    assert_eq!(outcome.unwrap().url, "https://collector.example.com/errors/77");
}

#[test]
#[serial]
fn unreachable_collector_still_exits() {
    let (exit, exits) = recording_exit();
    let agent = agent(active_config("http://127.0.0.1:1"), exit);
    agent.handle_uncaught_exceptions(None);

    panic_on(DOOMED_THREAD, "nobody listening");
    restore_default_hook();

    assert_eq!(*exits.lock().unwrap(), vec![1]);
}

#[test]
#[serial]
fn recovered_and_thread_panics_are_left_alone() {
    let mut server = mockito::Server::new();
    let mock = server.mock("POST", Matcher::Any).expect(0).create();

    let (exit, exits) = recording_exit();
    let agent = Agent::new_with_exit(active_config(&server.url()), exit);
    agent.handle_uncaught_exceptions(None);

    let recovered = panic::catch_unwind(|| panic!("handled by the application"));
    assert!(recovered.is_err());
    panic_on("worker", "only this thread ends");
    restore_default_hook();

    assert!(exits.lock().unwrap().is_empty());
    mock.assert();
}

#[test]
#[serial]
fn previous_hook_keeps_running() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    panic::set_hook(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", errors_path().as_str())
        .with_status(202)
        .expect(2)
        .create();

    let (exit, exits) = recording_exit();
    let agent = agent(active_config(&server.url()), exit);
    agent.handle_uncaught_exceptions(None);

    panic_on("worker", "not fatal");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(exits.lock().unwrap().is_empty());

    panic_on(DOOMED_THREAD, "fatal");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(*exits.lock().unwrap(), vec![1]);

    // installing again supersedes the agent's hook instead of stacking a second capture
    agent.handle_uncaught_exceptions(None);
    panic_on(DOOMED_THREAD, "fatal again");
    restore_default_hook();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(*exits.lock().unwrap(), vec![1, 1]);
    mock.assert();
}
