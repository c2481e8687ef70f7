// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host-side handle for an instrumentable library.
//!
//! A [`Library`] exposes classes of named [`Method`]s plus lazily resolved
//! exports, such as an optional native binding that should only be loaded if
//! the application asks for it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, OnceLock, PoisonError};

use crate::instrumentation::call::{Call, CallError, Method, Return};

#[derive(Clone)]
pub struct Class {
    name: String,
    methods: HashMap<String, Method>,
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("Class")
            .field("name", &self.name)
            .field("methods", &methods)
            .finish()
    }
}

impl Class {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_method(mut self, name: impl Into<String>, method: Method) -> Self {
        self.methods.insert(name.into(), method);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub fn call(&self, name: &str, call: Call) -> Result<Return, CallError> {
        match self.methods.get(name) {
            Some(method) => method(call),
            None => Err(CallError(format!("{}.{name} is not a function", self.name))),
        }
    }

    /// Replaces a method with `patch(original)`. Returns whether it existed.
    pub fn replace_method(&mut self, name: &str, patch: impl FnOnce(Method) -> Method) -> bool {
        match self.methods.remove(name) {
            Some(original) => {
                self.methods.insert(name.to_string(), patch(original));
                true
            }
            None => false,
        }
    }
}

pub type Loader = Box<dyn FnOnce() -> Option<Library> + Send>;

/// Export resolved on first access, at most once.
pub struct LazyExport {
    loader: Mutex<Option<Loader>>,
    value: OnceLock<Option<Library>>,
}

impl LazyExport {
    fn new(loader: Loader) -> Self {
        Self {
            loader: Mutex::new(Some(loader)),
            value: OnceLock::new(),
        }
    }

    fn resolve(&self) -> Option<&Library> {
        self.value
            .get_or_init(|| {
                let loader = self
                    .loader
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                loader.and_then(|load| load())
            })
            .as_ref()
    }

    fn patch(&mut self, patch: impl FnOnce(Library) -> Library + Send + 'static) {
        if let Some(resolved) = self.value.take() {
            // already resolved: only an actual export is patched
            let _ = self.value.set(resolved.map(patch));
            return;
        }
        let slot = self.loader.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(load) = slot.take() {
            *slot = Some(Box::new(move || load().map(patch)));
        }
    }
}

#[derive(Debug)]
pub struct Library {
    name: String,
    version: String,
    classes: HashMap<String, Class>,
    lazy: HashMap<String, LazyExport>,
}

impl fmt::Debug for LazyExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyExport")
            .field("resolved", &self.value.get().is_some())
            .finish()
    }
}

impl Library {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            classes: HashMap::new(),
            lazy: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_class(mut self, class: Class) -> Self {
        self.classes.insert(class.name.clone(), class);
        self
    }

    /// Registers an export whose `loader` runs on first [`Library::lazy`] access.
    #[must_use]
    pub fn with_lazy(
        mut self,
        name: impl Into<String>,
        loader: impl FnOnce() -> Option<Library> + Send + 'static,
    ) -> Self {
        self.lazy
            .insert(name.into(), LazyExport::new(Box::new(loader)));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn class(&self, name: &str) -> Option<&Class> {
        self.classes.get(name)
    }

    pub fn class_mut(&mut self, name: &str) -> Option<&mut Class> {
        self.classes.get_mut(name)
    }

    /// Resolves a lazy export. `None` if it does not exist or failed to load.
    #[must_use]
    pub fn lazy(&self, name: &str) -> Option<&Library> {
        self.lazy.get(name)?.resolve()
    }

    /// Whether a lazy export has been resolved yet.
    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.lazy
            .get(name)
            .is_some_and(|export| export.value.get().is_some())
    }

    /// Arranges for `patch` to apply to a lazy export when it resolves, or
    /// right away if it already has. Nothing is loaded here.
    pub fn patch_lazy(
        &mut self,
        name: &str,
        patch: impl FnOnce(Library) -> Library + Send + 'static,
    ) -> bool {
        match self.lazy.get_mut(name) {
            Some(export) => {
                export.patch(patch);
                true
            }
            None => false,
        }
    }
}
