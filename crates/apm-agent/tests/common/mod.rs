// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use apm_agent::instrumentation::{method, Arg, Call, CallError, Class, EventEmitter, Library, Return};
use apm_agent::Config;
use serde_json::{json, Value};

pub const APP_ID: &str = "app-1";
pub const ORGANIZATION_ID: &str = "org-1";
pub const SECRET_TOKEN: &str = "secret-token";

pub fn errors_path() -> String {
    format!("/api/v1/organizations/{ORGANIZATION_ID}/apps/{APP_ID}/errors/")
}

pub fn releases_path() -> String {
    format!("/api/v1/organizations/{ORGANIZATION_ID}/apps/{APP_ID}/releases/")
}

/// Reportable config pointing at a mock collector. The panic hook is left
/// alone unless a test installs it explicitly.
pub fn active_config(api_host: &str) -> Config {
    Config::builder()
        .app_id(APP_ID)
        .organization_id(ORGANIZATION_ID)
        .secret_token(SECRET_TOKEN)
        .hostname("test-host")
        .api_host(api_host)
        .capture_exceptions(false)
        .build()
}

type Completion = Box<dyn FnOnce() + Send>;

/// In-process stand-in for the PostgreSQL client library.
///
/// Queries never complete on their own: completions are queued and run when
/// the test drives them, in whatever order it chooses.
#[derive(Clone, Default)]
pub struct FakePg {
    pending: Arc<Mutex<VecDeque<Completion>>>,
    native_loads: Arc<AtomicUsize>,
}

impl FakePg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn library(&self, version: &str) -> Library {
        let native = self.clone();
        Library::new("pg", version)
            .with_class(self.client())
            .with_lazy("native", move || {
                native.native_loads.fetch_add(1, Ordering::SeqCst);
                Some(Library::new("pg-native", "1.10.0").with_class(native.client()))
            })
    }

    pub fn client(&self) -> Class {
        Class::new("Client").with_method("query", self.query())
    }

    pub fn native_loads(&self) -> usize {
        self.native_loads.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Completes the oldest outstanding query.
    pub fn complete_next(&self) -> bool {
        let next = self.pending.lock().unwrap().pop_front();
        match next {
            Some(completion) => {
                completion();
                true
            }
            None => false,
        }
    }

    /// Completes the newest outstanding query.
    pub fn complete_last(&self) -> bool {
        let last = self.pending.lock().unwrap().pop_back();
        match last {
            Some(completion) => {
                completion();
                true
            }
            None => false,
        }
    }

    pub fn complete_all(&self) {
        while self.complete_next() {}
    }

    fn query(&self) -> apm_agent::instrumentation::Method {
        let pending = Arc::clone(&self.pending);
        method(move |mut call: Call| {
            let sql = call
                .args
                .first()
                .and_then(Arg::as_value)
                .and_then(|value| match value {
                    Value::String(sql) => Some(sql.clone()),
                    Value::Object(config) => config.get("text")?.as_str().map(str::to_string),
                    _ => None,
                })
                .unwrap_or_default();
            if sql.starts_with("SYNTAX") {
                return Err(CallError(format!("syntax error at or near \"{sql}\"")));
            }

            let failed = sql.contains("missing_table");
            let outcome = if failed {
                (json!("relation \"missing_table\" does not exist"), Value::Null)
            } else {
                (Value::Null, json!({"command": "SELECT", "rowCount": 1, "rows": [{"id": 1}]}))
            };

            let mut queue = pending.lock().unwrap();
            match call.args.pop() {
                Some(Arg::Callback(callback)) => {
                    queue.push_back(Box::new(move || callback(vec![outcome.0, outcome.1])));
                    Ok(Return::Unit)
                }
                Some(Arg::List(mut values)) if values.last().is_some_and(Arg::is_callback) => {
                    if let Some(Arg::Callback(callback)) = values.pop() {
                        queue.push_back(Box::new(move || callback(vec![outcome.0, outcome.1])));
                    }
                    Ok(Return::Unit)
                }
                _ => {
                    let emitter = EventEmitter::new();
                    let query = emitter.clone();
                    queue.push_back(Box::new(move || {
                        if failed {
                            query.emit("error", &[outcome.0]);
                        } else {
                            query.emit("row", &[json!({"id": 1})]);
                            query.emit("end", &[outcome.1]);
                        }
                    }));
                    Ok(Return::Emitter(emitter))
                }
            }
        })
    }
}

/// Callback recording its arguments and the ambient transaction it ran under.
pub fn recording_callback() -> (Arg, Arc<Mutex<Option<(Vec<Value>, Option<String>)>>>) {
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let callback = Arg::callback(move |args| {
        let ambient = apm_agent::traces::current().map(|tx| tx.name().to_string());
        *sink.lock().unwrap() = Some((args, ambient));
    });
    (callback, seen)
}
