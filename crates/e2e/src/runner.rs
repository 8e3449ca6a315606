//! Action dispatcher
//!
//! Executes one validated [`Action`] and reduces whatever happened to a
//! [`Verdict`]. The `check_*` functions hold the assertion logic and are
//! pure, so they can be exercised without a network.

use std::collections::BTreeSet;
use std::time::Duration;

use reqwest::Version;
use tracing::{debug, error, info};

use crate::config::HarnessSettings;
use crate::error::E2eResult;
use crate::http::{self, HttpOutcome};
use crate::playwright::{BrowserCookie, BrowserOutcome, PageCheck, PlaywrightConfig, PlaywrightHandle};
use crate::spec::{Action, ActionKind, Pattern, SameSite, TlsVersion};
use crate::tls::{self, CertificateInfo, TlsHandshake};

/// Binary outcome of one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass(String),
    Fail(String),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Verdict::Pass(m) | Verdict::Fail(m) => m,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Verdict::Fail(message.into())
    }

    fn pass(message: impl Into<String>) -> Self {
        Verdict::Pass(message.into())
    }
}

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub http_timeout: Duration,
    pub browser_wait: Duration,
    pub tls_port: u16,
    pub playwright: PlaywrightConfig,
    /// Skip the action's pre-execution delay
    pub skip_delay: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from(&HarnessSettings::default())
    }
}

impl From<&HarnessSettings> for RunnerConfig {
    fn from(settings: &HarnessSettings) -> Self {
        Self {
            http_timeout: settings.http_timeout(),
            browser_wait: settings.browser_wait(),
            tls_port: settings.tls_port,
            playwright: settings.playwright(),
            skip_delay: false,
        }
    }
}

pub struct ActionRunner {
    config: RunnerConfig,
}

impl ActionRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Execute the action once; errors are reserved for harness breakage
    pub async fn run(&self, action: &Action) -> E2eResult<Verdict> {
        if !self.config.skip_delay && !action.delay().is_zero() {
            info!("⏲ Waiting {} seconds ...", action.delay().as_secs_f64());
            tokio::time::sleep(action.delay()).await;
        }

        info!("📡 Starting {} test ...", action.kind().name());

        let verdict = if action.kind().is_browser() {
            self.run_browser(action).await?
        } else {
            self.run_http(action).await?
        };

        match &verdict {
            Verdict::Pass(message) => info!("{}", message),
            Verdict::Fail(message) => error!("{}", message),
        }
        Ok(verdict)
    }

    async fn run_http(&self, action: &Action) -> E2eResult<Verdict> {
        let request = action.request();
        info!("Sending {} request to {} ...", request.method.as_str(), request.url);
        debug!("Request headers: {:?}", request.headers);
        debug!("Request auth: {:?}", request.auth.as_ref().map(|(user, _)| user));
        debug!("Allowing redirects: {}", request.follow_redirects);
        debug!("Verifying SSL: {}", request.verify_ssl);

        let outcome = http::send(request, self.config.http_timeout).await?;

        if request.http2 {
            if let HttpOutcome::Response(response) = &outcome {
                if response.version != Version::HTTP_2 {
                    return Ok(Verdict::fail(format!(
                        "HTTP/2 not used, instead found {:?}",
                        response.version
                    )));
                }
            }
        }

        match action.kind() {
            ActionKind::String { string } => Ok(check_string(&outcome, string)),
            ActionKind::Path { path } => Ok(check_path(&outcome, path)),
            ActionKind::Status { status } => Ok(check_status(&outcome, *status)),
            ActionKind::Header { name, pattern } => Ok(check_header(&outcome, name, pattern.as_ref())),
            ActionKind::Ssl {
                protocols,
                expiration_days,
                subject,
            } => self.run_ssl(&outcome, protocols, *expiration_days, subject).await,
            ActionKind::Xpath { .. } | ActionKind::Cookie { .. } => {
                unreachable!("browser actions are dispatched to run_browser")
            }
        }
    }

    async fn run_ssl(
        &self,
        outcome: &HttpOutcome,
        protocols: &BTreeSet<TlsVersion>,
        expiration_days: i64,
        subject: &str,
    ) -> E2eResult<Verdict> {
        let response = match require_success(outcome) {
            Ok(response) => response,
            Err(verdict) => return Ok(verdict),
        };
        if response.url.scheme() != "https" {
            return Ok(Verdict::fail(format!(
                "Response URL scheme is not HTTPS ({}), exiting ...",
                response.url
            )));
        }

        let handshake = match tls::handshake(&response.url, self.config.tls_port, self.config.http_timeout).await {
            Ok(handshake) => handshake,
            Err(e) => return Ok(Verdict::fail(format!("TLS handshake with {} failed: {}", response.url, e))),
        };
        if let Some(verdict) = check_protocol(&handshake, protocols) {
            return Ok(verdict);
        }

        let certificate = CertificateInfo::from_der(&handshake.certificate_der)?;
        debug!("Certificate: {:?}", certificate);
        Ok(check_certificate(&certificate, expiration_days, subject))
    }

    async fn run_browser(&self, action: &Action) -> E2eResult<Verdict> {
        let url = action.request().url.as_str();
        let page_check = match action.kind() {
            ActionKind::Xpath { xpath } => PageCheck::Xpath {
                xpath: xpath.clone(),
                wait: self.config.browser_wait,
            },
            _ => PageCheck::Cookies,
        };

        let playwright = PlaywrightHandle::new(self.config.playwright.clone())?;
        info!("Navigating to {} ...", url);
        let outcome = playwright.visit(url, &page_check).await?;

        let page = match outcome {
            BrowserOutcome::Page(page) => page,
            BrowserOutcome::Failed(reason) => {
                return Ok(Verdict::fail(format!("Navigation to {} failed: {}", url, reason)))
            }
        };

        match action.kind() {
            ActionKind::Xpath { xpath } => Ok(check_xpath(page.found.unwrap_or(false), xpath, self.config.browser_wait)),
            ActionKind::Cookie {
                name,
                pattern,
                secure,
                http_only,
                same_site,
            } => {
                let expected = CookieExpectation {
                    name,
                    pattern: pattern.as_ref(),
                    secure: *secure,
                    http_only: *http_only,
                    same_site: *same_site,
                };
                Ok(check_cookie(page.cookie(name), &page.cookies, &expected))
            }
            _ => unreachable!("HTTP actions are dispatched to run_http"),
        }
    }
}

/// Responses with a non-2xx status count as errors for most checks
fn require_success(outcome: &HttpOutcome) -> Result<&http::CapturedResponse, Verdict> {
    match outcome {
        HttpOutcome::Failed(reason) => Err(Verdict::fail(format!("Request failed:\n{}", reason))),
        HttpOutcome::Response(response) if !response.is_success() => Err(Verdict::fail(format!(
            "Request to {} returned HTTP error status {}",
            response.url, response.status
        ))),
        HttpOutcome::Response(response) => Ok(response),
    }
}

pub fn check_string(outcome: &HttpOutcome, expected: &str) -> Verdict {
    let response = match require_success(outcome) {
        Ok(response) => response,
        Err(verdict) => return verdict,
    };
    if response.body.contains(expected) {
        Verdict::pass(format!("String {} found in response", expected))
    } else {
        Verdict::fail(format!("String {} not found in response, exiting ...", expected))
    }
}

pub fn check_path(outcome: &HttpOutcome, expected: &str) -> Verdict {
    let response = match outcome {
        HttpOutcome::Failed(reason) => return Verdict::fail(format!("Request failed:\n{}", reason)),
        HttpOutcome::Response(response) => response,
    };
    if response.url.as_str().contains(expected) {
        return Verdict::pass(format!("Path {} found in response URL", expected));
    }
    if !response.is_success() {
        return Verdict::fail(format!(
            "Path {} not found in response URL {}, HTTP error status {}",
            expected, response.url, response.status
        ));
    }
    Verdict::fail(format!(
        "Path {} not found in response URL, instead found {}, exiting ...",
        expected, response.url
    ))
}

pub fn check_status(outcome: &HttpOutcome, expected: Option<u16>) -> Verdict {
    match (outcome, expected) {
        (HttpOutcome::Failed(_), Some(status)) => {
            Verdict::fail(format!("Request failed, expected status code {}, exiting ...", status))
        }
        (HttpOutcome::Failed(_), None) => Verdict::pass("Request failed, as expected"),
        (HttpOutcome::Response(response), None) => Verdict::fail(format!(
            "Request succeeded with status code {}, expected failure, exiting ...",
            response.status
        )),
        (HttpOutcome::Response(response), Some(status)) if response.status != status => Verdict::fail(format!(
            "Status code {} not found in response, instead found {}, exiting ...",
            status, response.status
        )),
        (HttpOutcome::Response(_), Some(status)) => Verdict::pass(format!("Status code {} found in response", status)),
    }
}

pub fn check_header(outcome: &HttpOutcome, name: &str, pattern: Option<&Pattern>) -> Verdict {
    let response = match require_success(outcome) {
        Ok(response) => response,
        Err(verdict) => return verdict,
    };

    match (response.header(name), pattern) {
        (Some(_), None) => Verdict::fail(format!(
            "Header {} found in response, exiting ...\nheaders: {:?}",
            name, response.headers
        )),
        (Some(value), Some(pattern)) if !pattern.matches(&value) => Verdict::fail(format!(
            "Header {} with regex {} not found in response (value {:?}), exiting ...\nheaders: {:?}",
            name, pattern, value, response.headers
        )),
        (Some(_), Some(pattern)) => Verdict::pass(format!("Header {} with regex {} matched in response", name, pattern)),
        (None, Some(pattern)) => Verdict::fail(format!(
            "Header {} with regex {} not found in response, exiting ...\nheaders: {:?}",
            name, pattern, response.headers
        )),
        (None, None) => Verdict::pass(format!("Header {} not found in response", name)),
    }
}

/// `None` when the negotiated version is allowed
pub fn check_protocol(handshake: &TlsHandshake, allowed: &BTreeSet<TlsVersion>) -> Option<Verdict> {
    match handshake.version {
        Some(version) if allowed.contains(&version) => None,
        other => {
            let allowed: Vec<&str> = allowed.iter().map(TlsVersion::as_str).collect();
            Some(Verdict::fail(format!(
                "SSL version {} not in allowed versions {:?}, exiting ...",
                other.map(|v| v.as_str()).unwrap_or("unknown"),
                allowed
            )))
        }
    }
}

pub fn check_certificate(certificate: &CertificateInfo, expiration_days: i64, subject: &str) -> Verdict {
    if !certificate.valid_for_days(expiration_days) {
        return Verdict::fail(format!(
            "Expiration date of SSL certificate is {} but should be {}, exiting ...",
            certificate.not_after,
            certificate.not_before + chrono::Duration::days(expiration_days)
        ));
    }
    if !certificate.subject_matches(subject) {
        return Verdict::fail(format!(
            "SSL subject {:?} is different from the expected {}, exiting ...",
            certificate.subject, subject
        ));
    }
    Verdict::pass("SSL protocol, expiration and subject match")
}

pub fn check_xpath(found: bool, xpath: &str, wait: Duration) -> Verdict {
    if found {
        Verdict::pass(format!("Xpath {} found in page", xpath))
    } else {
        Verdict::fail(format!("Xpath {} not found in page after {} seconds", xpath, wait.as_secs()))
    }
}

/// Declared cookie state for a `cookie` action
#[derive(Debug, Clone)]
pub struct CookieExpectation<'a> {
    pub name: &'a str,
    pub pattern: Option<&'a Pattern>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

pub fn check_cookie(cookie: Option<&BrowserCookie>, jar: &[BrowserCookie], expected: &CookieExpectation<'_>) -> Verdict {
    let name = expected.name;
    let Some(cookie) = cookie else {
        return match expected.pattern {
            Some(pattern) => Verdict::fail(format!(
                "Cookie {} with regex {} not found in page, exiting ...\ncookies: {:?}",
                name, pattern, jar
            )),
            None => Verdict::pass(format!("Cookie {} not found in page", name)),
        };
    };

    let Some(pattern) = expected.pattern else {
        return Verdict::fail(format!("Cookie {} found in page, exiting ...\ncookies: {:?}", name, jar));
    };
    if !pattern.matches(&cookie.value) {
        return Verdict::fail(format!(
            "Cookie {} with regex {} not found in page (value {:?}), exiting ...\ncookies: {:?}",
            name, pattern, cookie.value, jar
        ));
    }
    if cookie.secure != expected.secure {
        return Verdict::fail(format!(
            "Cookie {} has Secure={} but expected {}, exiting ...",
            name, cookie.secure, expected.secure
        ));
    }
    if cookie.http_only != expected.http_only {
        return Verdict::fail(format!(
            "Cookie {} has HttpOnly={} but expected {}, exiting ...",
            name, cookie.http_only, expected.http_only
        ));
    }

    let actual_same_site = cookie.same_site.as_deref().filter(|s| *s != "None");
    let expected_same_site = expected.same_site.map(|s| s.as_str());
    if actual_same_site != expected_same_site {
        return Verdict::fail(format!(
            "Cookie {} has SameSite={:?} but expected {:?}, exiting ...",
            name, actual_same_site, expected_same_site
        ));
    }

    Verdict::pass(format!("Cookie {} with regex {} matched in page, flags are correct", name, pattern))
}
