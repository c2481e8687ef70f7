// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Inbound request context attached to error records.
//!
//! The pipeline only needs a narrow read-only view of the request that was
//! being served when a failure happened. Sensitive headers never leave the
//! process.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use hyper::header::HOST;
use serde::{Deserialize, Serialize};

/// Headers dropped from captured request context.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "proxy-authorization",
    "set-cookie",
];

/// Read-only view of an inbound request.
pub trait RequestContext {
    fn method(&self) -> String;
    fn url(&self) -> String;
    fn headers(&self) -> Vec<(String, String)>;
    fn remote_addr(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpContext {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
}

impl HttpContext {
    pub fn from_request<R: RequestContext + ?Sized>(request: &R) -> Self {
        let headers = request
            .headers()
            .into_iter()
            .map(|(name, value)| (name.to_lowercase(), value))
            .filter(|(name, _)| !SENSITIVE_HEADERS.contains(&name.as_str()))
            .collect();
        Self {
            method: request.method(),
            url: request.url(),
            headers,
            remote_host: request.remote_addr(),
        }
    }
}

/// Plain request description for callers without a `hyper` request at hand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub remote_addr: Option<String>,
}

impl RequestContext for RequestInfo {
    fn method(&self) -> String {
        self.method.clone()
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn headers(&self) -> Vec<(String, String)> {
        self.headers.clone()
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }
}

/// The peer address is read from a [`SocketAddr`] request extension, which is
/// where servers built on `hyper` conventionally store it.
impl<B> RequestContext for hyper::Request<B> {
    fn method(&self) -> String {
        hyper::Request::method(self).to_string()
    }

    fn url(&self) -> String {
        let uri = self.uri();
        if uri.authority().is_some() {
            return uri.to_string();
        }
        match hyper::Request::headers(self)
            .get(HOST)
            .and_then(|host| host.to_str().ok())
        {
            Some(host) => format!("http://{host}{uri}"),
            None => uri.to_string(),
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        hyper::Request::headers(self)
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect()
    }

    fn remote_addr(&self) -> Option<String> {
        self.extensions()
            .get::<SocketAddr>()
            .map(|addr| addr.ip().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitive_headers_removed() {
        let request = RequestInfo {
            method: "POST".to_string(),
            url: "http://example.com/login".to_string(),
            headers: vec![
                ("Authorization".to_string(), "Bearer abc".to_string()),
                ("Cookie".to_string(), "session=1".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            remote_addr: Some("10.0.0.1".to_string()),
        };

        let http = HttpContext::from_request(&request);
        assert_eq!(http.method, "POST");
        assert_eq!(http.url, "http://example.com/login");
        assert_eq!(http.headers.len(), 1);
        assert_eq!(
            http.headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(http.remote_host.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_hyper_request() {
        let mut request = hyper::Request::builder()
            .method("GET")
            .uri("/users?page=2")
            .header("host", "api.example.com")
            .header("authorization", "secret")
            .header("accept", "text/html")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert("192.168.1.7:55012".parse::<SocketAddr>().unwrap());

        let http = HttpContext::from_request(&request);
        assert_eq!(http.method, "GET");
        assert_eq!(http.url, "http://api.example.com/users?page=2");
        assert!(!http.headers.contains_key("authorization"));
        assert_eq!(http.headers.get("accept").map(String::as_str), Some("text/html"));
        assert_eq!(http.remote_host.as_deref(), Some("192.168.1.7"));
    }

    #[test]
    fn test_hyper_request_with_absolute_uri() {
        let request = hyper::Request::builder()
            .uri("https://example.com/health")
            .body(())
            .unwrap();
        assert_eq!(RequestContext::url(&request), "https://example.com/health");
        assert_eq!(RequestContext::remote_addr(&request), None);
    }
}
