//! HTTP side of non-browser actions
//!
//! Transport failures are captured in [`HttpOutcome::Failed`] rather than
//! returned as errors, so a `status` action that expects the request to fail
//! can still be evaluated.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::Version;
use tracing::debug;
use url::Url;

use crate::error::{E2eError, E2eResult};
use crate::spec::RequestSpec;

/// The parts of a response the assertions look at
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: u16,
    pub url: Url,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: String,
}

impl CapturedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup, lossy on non-UTF-8 values.
    /// Repeated headers are folded into one `, `-separated value.
    pub fn header(&self, name: &str) -> Option<String> {
        let values: Vec<String> = self
            .headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }
}

#[derive(Debug, Clone)]
pub enum HttpOutcome {
    Response(CapturedResponse),
    Failed(String),
}

impl HttpOutcome {
    pub fn response(&self) -> Option<&CapturedResponse> {
        match self {
            HttpOutcome::Response(r) => Some(r),
            HttpOutcome::Failed(_) => None,
        }
    }
}

/// Build a client honoring the action's TLS, redirect and HTTP version settings
pub fn build_client(request: &RequestSpec, timeout: Duration) -> E2eResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| E2eError::TestFile(format!("bad header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| E2eError::TestFile(format!("bad header value {:?}: {}", value, e)))?;
        headers.insert(name, value);
    }

    let redirect = if request.follow_redirects {
        Policy::limited(20)
    } else {
        Policy::none()
    };

    let mut builder = reqwest::Client::builder()
        .default_headers(headers)
        .danger_accept_invalid_certs(!request.verify_ssl)
        .redirect(redirect)
        .timeout(timeout);

    if !request.http2 {
        builder = builder.http1_only();
    }

    Ok(builder.build()?)
}

/// Send the request once and capture whatever comes back
pub async fn send(request: &RequestSpec, timeout: Duration) -> E2eResult<HttpOutcome> {
    let client = build_client(request, timeout)?;

    let mut builder = client.request(request.method.to_reqwest(), request.url.clone());
    if let Some((user, password)) = &request.auth {
        builder = builder.basic_auth(user, Some(password));
    }
    if let Some(body) = request.body() {
        builder = builder.body(body);
    }

    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => return Ok(HttpOutcome::Failed(describe(&e))),
    };

    let status = response.status().as_u16();
    let url = response.url().clone();
    let version = response.version();
    let headers = response.headers().clone();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return Ok(HttpOutcome::Failed(describe(&e))),
    };

    debug!("Response: {}", body);
    debug!("Response URL: {}", url);
    debug!("Response status code: {}", status);
    debug!("Response headers: {:?}", headers);

    Ok(HttpOutcome::Response(CapturedResponse {
        status,
        url,
        version,
        headers,
        body,
    }))
}

/// Flatten the error source chain into one line
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
