// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname detection utilities

use std::env;
use tracing::warn;

/// Get the system hostname
///
/// Tried in order:
/// 1. `HOSTNAME` environment variable
/// 2. System hostname via `nix::unistd::gethostname()`
/// 3. `"unknown"`
///
/// The agent-specific `APM_HOSTNAME` override is applied by the config layer.
#[must_use]
pub fn get_hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname_osstr) => {
            if let Some(hostname_str) = hostname_osstr.to_str() {
                if !hostname_str.is_empty() {
                    return hostname_str.to_string();
                }
            }
        }
        Err(e) => {
            warn!("Failed to get system hostname: {}", e);
        }
    }

    warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_get_hostname_not_empty() {
        assert!(!get_hostname().is_empty());
    }

    #[test]
    #[serial]
    fn test_hostname_env_override() {
        let previous = env::var("HOSTNAME").ok();
        env::set_var("HOSTNAME", "test-hostname-override");
        assert_eq!(get_hostname(), "test-hostname-override");
        match previous {
            Some(value) => env::set_var("HOSTNAME", value),
            None => env::remove_var("HOSTNAME"),
        }
    }
}
