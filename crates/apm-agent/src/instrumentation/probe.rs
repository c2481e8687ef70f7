// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Version-gated patching of library methods.

use std::sync::Arc;

use semver::{Version, VersionReq};
use tracing::{debug, info};

use crate::instrumentation::library::Library;
use crate::instrumentation::shim::{wrap, Policy};

/// A `Class.method` pair to patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub class: String,
    pub method: String,
}

impl Target {
    pub fn new(class: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            method: method.into(),
        }
    }
}

/// Targets living inside a lazily resolved export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LazyTarget {
    pub export: String,
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone)]
pub struct Probe {
    /// Library name the probe applies to.
    pub name: String,
    pub supported: VersionReq,
    pub targets: Vec<Target>,
    pub lazy: Vec<LazyTarget>,
    pub policy: Arc<Policy>,
}

/// Applies `probe` to `library`.
///
/// A library with another name, or a version outside the supported range,
/// comes back untouched.
#[must_use]
pub fn install(probe: &Probe, mut library: Library) -> Library {
    if library.name() != probe.name {
        debug!(
            "Probe {} does not apply to {}, skipping",
            probe.name,
            library.name()
        );
        return library;
    }

    let version = match parse_version(library.version()) {
        Ok(version) => version,
        Err(err) => {
            info!(
                "Could not parse {} version '{}': {err}, not instrumenting",
                probe.name,
                library.version()
            );
            return library;
        }
    };
    if !probe.supported.matches(&version) {
        info!(
            "{} version {version} is not supported ({}), not instrumenting",
            probe.name, probe.supported
        );
        return library;
    }

    debug!("Instrumenting {} {version}", probe.name);
    patch_targets(&mut library, &probe.targets, &probe.policy);
    for lazy in &probe.lazy {
        let targets = lazy.targets.clone();
        let policy = Arc::clone(&probe.policy);
        if !library.patch_lazy(&lazy.export, move |mut export| {
            patch_targets(&mut export, &targets, &policy);
            export
        }) {
            debug!("{} has no {} export, skipping", probe.name, lazy.export);
        }
    }
    library
}

fn patch_targets(library: &mut Library, targets: &[Target], policy: &Arc<Policy>) {
    for target in targets {
        let patched = library.class_mut(&target.class).is_some_and(|class| {
            class.replace_method(&target.method, |original| wrap(original, Arc::clone(policy)))
        });
        if !patched {
            debug!(
                "{}.{} not found in {}, skipping",
                target.class,
                target.method,
                library.name()
            );
        }
    }
}

/// Parses a version, tolerating shorthand cores such as `6` or `6.1`.
pub fn parse_version(input: &str) -> Result<Version, semver::Error> {
    let input = input.trim().trim_start_matches('v');
    match Version::parse(input) {
        Ok(version) => Ok(version),
        Err(original_err) => {
            let (core, suffix) = match input.find(['-', '+']) {
                Some(index) => input.split_at(index),
                None => (input, ""),
            };
            let mut segments: Vec<&str> = core
                .split('.')
                .filter(|segment| !segment.is_empty())
                .collect();
            if segments.is_empty() || segments.len() > 3 {
                return Err(original_err);
            }
            while segments.len() < 3 {
                segments.push("0");
            }
            Version::parse(&format!("{}{suffix}", segments.join("."))).map_err(|_| original_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrumentation::call::{method, Arg, Call, Method, Return};
    use crate::instrumentation::library::Class;
    use crate::instrumentation::shim::{CompletionPolicy, Summary};

    fn probe() -> Probe {
        Probe {
            name: "cache".to_string(),
            supported: VersionReq::parse(">=2.0.0, <3.0.0").unwrap(),
            targets: vec![Target::new("Client", "get")],
            lazy: vec![LazyTarget {
                export: "native".to_string(),
                targets: vec![Target::new("Client", "get")],
            }],
            policy: Arc::new(Policy {
                name: "cache".to_string(),
                summarizer: Arc::new(|_args: &[Arg]| -> Option<Summary> { None }),
                fallback: Summary::new("GET", "cache.get"),
                completion: vec![CompletionPolicy::TrailingCallback],
            }),
        }
    }

    fn library(name: &str, version: &str) -> Library {
        Library::new(name, version).with_class(
            Class::new("Client").with_method("get", method(|_call: Call| Ok(Return::Unit))),
        )
    }

    fn method_of(library: &Library) -> Method {
        Arc::clone(library.class("Client").unwrap().method("get").unwrap())
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("6").unwrap(), Version::new(6, 0, 0));
        assert_eq!(parse_version("v6.1").unwrap(), Version::new(6, 1, 0));
        assert_eq!(parse_version("6.1.4").unwrap(), Version::new(6, 1, 4));
        assert_eq!(
            parse_version("6.1-beta.1").unwrap(),
            Version::parse("6.1.0-beta.1").unwrap()
        );
        assert!(parse_version("latest").is_err());
        assert!(parse_version("").is_err());
    }

    #[test]
    fn test_supported_version_is_patched() {
        let original = library("cache", "2.4");
        let before = method_of(&original);
        let patched = install(&probe(), original);
        assert!(!Arc::ptr_eq(&before, &method_of(&patched)));
    }

    #[test]
    fn test_out_of_range_keeps_identity() {
        for version in ["1.9.9", "3.0.0", "not-a-version"] {
            let original = library("cache", version);
            let before = method_of(&original);
            let untouched = install(&probe(), original);
            assert!(Arc::ptr_eq(&before, &method_of(&untouched)), "{version}");
        }
    }

    #[test]
    fn test_other_library_keeps_identity() {
        let original = library("queue", "2.0.0");
        let before = method_of(&original);
        let untouched = install(&probe(), original);
        assert!(Arc::ptr_eq(&before, &method_of(&untouched)));
    }

    #[test]
    fn test_lazy_export_patched_without_loading() {
        let original =
            library("cache", "2.0.0").with_lazy("native", || Some(library("cache-native", "1.0.0")));
        let patched = install(&probe(), original);
        assert!(!patched.is_loaded("native"));
        let native = patched.lazy("native").unwrap();
        assert!(patched.is_loaded("native"));
        assert!(native.class("Client").unwrap().method("get").is_some());
    }
}
