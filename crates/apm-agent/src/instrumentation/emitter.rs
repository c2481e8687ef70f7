// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named-event emitter returned by methods that signal completion through
//! events rather than callbacks.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

pub type Listener = Arc<dyn Fn(&[Value]) + Send + Sync>;

struct Registration {
    listener: Listener,
    once: bool,
}

#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<Mutex<HashMap<String, Vec<Registration>>>>,
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let mut events: Vec<&String> = listeners.keys().collect();
        events.sort();
        f.debug_struct("EventEmitter").field("events", &events).finish()
    }
}

impl EventEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, event: &str, listener: impl Fn(&[Value]) + Send + Sync + 'static) {
        self.register(event, Arc::new(listener), false);
    }

    /// The listener is removed before its first invocation.
    pub fn once(&self, event: &str, listener: impl Fn(&[Value]) + Send + Sync + 'static) {
        self.register(event, Arc::new(listener), true);
    }

    fn register(&self, event: &str, listener: Listener, once: bool) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .push(Registration { listener, once });
    }

    /// Invokes the event's listeners in registration order. Returns whether
    /// any were registered. Listeners may register more listeners; those run
    /// on the next emit.
    pub fn emit(&self, event: &str, args: &[Value]) -> bool {
        let registrations = {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            match listeners.get_mut(event) {
                Some(registrations) if !registrations.is_empty() => std::mem::take(registrations),
                _ => return false,
            }
        };

        let to_call: Vec<Listener> = registrations
            .iter()
            .map(|registration| Arc::clone(&registration.listener))
            .collect();

        {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = listeners.entry(event.to_string()).or_default();
            let added = std::mem::take(slot);
            *slot = registrations
                .into_iter()
                .filter(|registration| !registration.once)
                .chain(added)
                .collect();
        }

        for listener in to_call {
            listener(args);
        }
        true
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }

    pub fn remove_all_listeners(&self, event: &str) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event);
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &EventEmitter) -> bool {
        Arc::ptr_eq(&self.listeners, &other.listeners)
    }
}
