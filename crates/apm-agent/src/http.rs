// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client used to reach the collector.
//!
//! The client uses rustls, the configured request timeout and, when set, an
//! HTTPS proxy (`APM_PROXY_HTTPS` or `HTTPS_PROXY`). A bad proxy never stops
//! the agent: construction falls back to a direct client, then to reqwest's
//! defaults.

use core::time::Duration;
use std::error::Error;

use tracing::error;

use crate::config::Config;

/// Builds a reqwest client with optional proxy configuration and timeout.
pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(crate::USER_AGENT);
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    Ok(builder.build()?)
}

#[must_use]
pub fn get_client(config: &Config) -> reqwest::Client {
    match build_client(config.https_proxy.as_deref(), config.timeout) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(None, config.timeout) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}
