// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! Built once at startup and shared read-only (`Arc<Config>`) by every
//! component. Values come from explicit [`ConfigBuilder`] options first and
//! `APM_*` environment variables second; anything left unset gets a default.
//!
//! | Option                | Environment variable                | Default              |
//! |-----------------------|-------------------------------------|----------------------|
//! | `app_id`              | `APM_APP_ID`                        | -                    |
//! | `organization_id`     | `APM_ORGANIZATION_ID`               | -                    |
//! | `secret_token`        | `APM_SECRET_TOKEN`                  | -                    |
//! | `active`              | `APM_ACTIVE`                        | `true`               |
//! | `hostname`            | `APM_HOSTNAME`                      | system hostname      |
//! | `stack_trace_limit`   | `APM_STACK_TRACE_LIMIT`             | unlimited            |
//! | `log_level`           | `APM_LOG_LEVEL`                     | `info`               |
//! | `exception_log_level` | `APM_EXCEPTION_LOG_LEVEL`           | `fatal`              |
//! | `capture_exceptions`  | `APM_CAPTURE_EXCEPTIONS`            | `true`               |
//! | `api_host`            | `APM_API_HOST`                      | `https://opbeat.com` |
//! | `timeout`             | `APM_TIMEOUT_SECS`                  | 10s                  |
//! | `https_proxy`         | `APM_PROXY_HTTPS` / `HTTPS_PROXY`   | -                    |

pub mod log_level;

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::error;

use crate::errors::ErrorLevel;
use crate::proc::hostname::get_hostname;

pub use log_level::LogLevel;

pub const DEFAULT_API_HOST: &str = "https://opbeat.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub app_id: Option<String>,
    pub organization_id: Option<String>,
    pub secret_token: Option<String>,
    pub hostname: String,
    /// Explicit opt-out. An active config without credentials is still not reportable.
    pub active: bool,
    /// Maximum number of captured stack frames, `None` for unlimited.
    pub stack_trace_limit: Option<usize>,
    pub log_level: LogLevel,
    /// Level given to records captured from uncaught panics.
    pub exception_log_level: ErrorLevel,
    pub capture_exceptions: bool,
    pub api_host: String,
    pub timeout: Duration,
    pub https_proxy: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_id: None,
            organization_id: None,
            secret_token: None,
            hostname: get_hostname(),
            active: true,
            stack_trace_limit: None,
            log_level: LogLevel::default(),
            exception_log_level: ErrorLevel::Fatal,
            capture_exceptions: true,
            api_host: DEFAULT_API_HOST.to_string(),
            timeout: DEFAULT_TIMEOUT,
            https_proxy: None,
        }
    }
}

impl Config {
    /// Configuration from `APM_*` environment variables only.
    #[must_use]
    pub fn from_env() -> Self {
        ConfigBuilder::default().build()
    }

    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Whether every credential needed to reach the collector is present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        [&self.app_id, &self.organization_id, &self.secret_token]
            .iter()
            .all(|value| value.as_deref().is_some_and(|v| !v.is_empty()))
    }

    /// Active and fully credentialed.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        self.active && self.has_credentials()
    }
}

/// Explicit options. Every unset option falls back to its environment variable.
#[derive(Debug, Default, Clone)]
#[must_use]
pub struct ConfigBuilder {
    app_id: Option<String>,
    organization_id: Option<String>,
    secret_token: Option<String>,
    hostname: Option<String>,
    active: Option<bool>,
    stack_trace_limit: Option<Option<usize>>,
    log_level: Option<LogLevel>,
    exception_log_level: Option<ErrorLevel>,
    capture_exceptions: Option<bool>,
    api_host: Option<String>,
    timeout: Option<Duration>,
    https_proxy: Option<String>,
}

impl ConfigBuilder {
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn organization_id(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn secret_token(mut self, secret_token: impl Into<String>) -> Self {
        self.secret_token = Some(secret_token.into());
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn stack_trace_limit(mut self, limit: Option<usize>) -> Self {
        self.stack_trace_limit = Some(limit);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn exception_log_level(mut self, level: ErrorLevel) -> Self {
        self.exception_log_level = Some(level);
        self
    }

    pub fn capture_exceptions(mut self, capture: bool) -> Self {
        self.capture_exceptions = Some(capture);
        self
    }

    pub fn api_host(mut self, api_host: impl Into<String>) -> Self {
        self.api_host = Some(api_host.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn https_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.https_proxy = Some(proxy.into());
        self
    }

    #[must_use]
    pub fn build(self) -> Config {
        Config {
            app_id: self.app_id.or_else(|| env_string("APM_APP_ID")),
            organization_id: self
                .organization_id
                .or_else(|| env_string("APM_ORGANIZATION_ID")),
            secret_token: self
                .secret_token
                .or_else(|| env_string("APM_SECRET_TOKEN")),
            hostname: self
                .hostname
                .or_else(|| env_string("APM_HOSTNAME"))
                .unwrap_or_else(get_hostname),
            active: self
                .active
                .or_else(|| env_string("APM_ACTIVE").map(|v| parse_bool(&v)))
                .unwrap_or(true),
            stack_trace_limit: self.stack_trace_limit.unwrap_or_else(|| {
                env_string("APM_STACK_TRACE_LIMIT").and_then(|v| parse_stack_trace_limit(&v))
            }),
            log_level: self
                .log_level
                .or_else(|| env_parsed("APM_LOG_LEVEL"))
                .unwrap_or_default(),
            exception_log_level: self
                .exception_log_level
                .or_else(|| env_parsed("APM_EXCEPTION_LOG_LEVEL"))
                .unwrap_or(ErrorLevel::Fatal),
            capture_exceptions: self
                .capture_exceptions
                .or_else(|| env_string("APM_CAPTURE_EXCEPTIONS").map(|v| parse_bool(&v)))
                .unwrap_or(true),
            api_host: self
                .api_host
                .or_else(|| env_string("APM_API_HOST"))
                .unwrap_or_else(|| DEFAULT_API_HOST.to_string()),
            timeout: self
                .timeout
                .or_else(|| {
                    env_string("APM_TIMEOUT_SECS")
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(Duration::from_secs)
                })
                .unwrap_or(DEFAULT_TIMEOUT),
            https_proxy: self.https_proxy.or_else(|| {
                env::var("APM_PROXY_HTTPS")
                    .or_else(|_| env::var("HTTPS_PROXY"))
                    .ok()
            }),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parsed<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = env_string(name)?;
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            error!("Ignoring {name}: {e}");
            None
        }
    }
}

fn parse_bool(value: &str) -> bool {
    !matches!(
        value.trim().to_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}

/// `None` means unlimited.
fn parse_stack_trace_limit(value: &str) -> Option<usize> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("infinity") || value.eq_ignore_ascii_case("unlimited") {
        return None;
    }
    match value.parse::<usize>() {
        Ok(limit) => Some(limit),
        Err(_) => {
            error!("Ignoring APM_STACK_TRACE_LIMIT: '{value}' is not a number");
            None
        }
    }
}
