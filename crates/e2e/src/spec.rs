//! Declarative action schema
//!
//! An action record is a YAML mapping whose `type` field names the variant.
//! [`Action::from_record`] validates the whole record up front and reports
//! every offending field at once; nothing touches the network until a
//! record has become an [`Action`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use url::Url;

use crate::error::{E2eError, E2eResult, FieldError, ValidationError};

/// Every label key must live under this namespace
pub const LABEL_PREFIX: &str = "bunkerweb.";

const MAX_EXPIRATION_DAYS: i64 = 36_500;

static HEADER_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w-]+$").unwrap());
static COOKIE_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w+]+$").unwrap());

pub type ConfigMap = BTreeMap<String, String>;

/// HTTP methods an action may use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Options,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// TLS protocol versions, named the way test files spell them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "TLSv1")]
    Tls10,
    #[serde(rename = "TLSv1.1")]
    Tls11,
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

impl TlsVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
        }
    }
}

/// A regex compiled at validation time, matched at the start of the input
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    anchored: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source)?;
        let anchored = Regex::new(&format!("^(?:{})", source))?;
        Ok(Self {
            source: source.to_string(),
            anchored,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        self.anchored.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Per-integration config and label overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOverride {
    #[serde(default, deserialize_with = "de_config_map")]
    pub config: ConfigMap,
    #[serde(default, deserialize_with = "de_config_map")]
    pub labels: ConfigMap,
}

/// How the request behind an action is sent
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub url: Url,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub auth: Option<(String, String)>,
    /// Length of the synthetic `a...a` body; 0 sends no body
    pub body_length: usize,
    pub follow_redirects: bool,
    pub verify_ssl: bool,
    pub http2: bool,
}

impl RequestSpec {
    pub fn body(&self) -> Option<String> {
        (self.body_length > 0).then(|| "a".repeat(self.body_length))
    }

    pub fn is_plain_http(&self) -> bool {
        self.url.scheme() == "http"
    }
}

/// Variant-specific part of an action
#[derive(Debug, Clone)]
pub enum ActionKind {
    String {
        string: String,
    },
    Path {
        path: String,
    },
    /// `None` means the request itself must fail
    Status {
        status: Option<u16>,
    },
    /// `pattern: None` means the header must be absent
    Header {
        name: String,
        pattern: Option<Pattern>,
    },
    Ssl {
        protocols: BTreeSet<TlsVersion>,
        expiration_days: i64,
        subject: String,
    },
    Xpath {
        xpath: String,
    },
    /// `pattern: None` means the cookie must be absent
    Cookie {
        name: String,
        pattern: Option<Pattern>,
        secure: bool,
        http_only: bool,
        same_site: Option<SameSite>,
    },
}

impl ActionKind {
    pub const NAMES: [&'static str; 7] = ["string", "path", "status", "header", "ssl", "xpath", "cookie"];

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::String { .. } => "string",
            ActionKind::Path { .. } => "path",
            ActionKind::Status { .. } => "status",
            ActionKind::Header { .. } => "header",
            ActionKind::Ssl { .. } => "ssl",
            ActionKind::Xpath { .. } => "xpath",
            ActionKind::Cookie { .. } => "cookie",
        }
    }

    pub fn is_browser(&self) -> bool {
        matches!(self, ActionKind::Xpath { .. } | ActionKind::Cookie { .. })
    }
}

/// A fully validated test action
#[derive(Debug, Clone)]
pub struct Action {
    kind: ActionKind,
    request: RequestSpec,
    config: ConfigMap,
    labels: ConfigMap,
    delay: Duration,
    timeout_secs: u64,
    overrides: BTreeMap<String, ActionOverride>,
}

impl Action {
    /// Validate a raw action record
    pub fn from_record(record: &Mapping) -> Result<Self, ValidationError> {
        let type_name = match record.get("type") {
            None | Some(Value::Null) => {
                return Err(ValidationError {
                    action_type: None,
                    errors: vec![FieldError::new("type", "field required")],
                })
            }
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(ValidationError {
                    action_type: None,
                    errors: vec![FieldError::new("type", format!("expected a string, got {:?}", other))],
                })
            }
        };

        if !ActionKind::NAMES.contains(&type_name.as_str()) {
            return Err(ValidationError {
                action_type: Some(type_name.clone()),
                errors: vec![FieldError::new(
                    "type",
                    format!("unknown action type {:?}, expected one of {}", type_name, ActionKind::NAMES.join(", ")),
                )],
            });
        }

        let browser = matches!(type_name.as_str(), "xpath" | "cookie");
        let mut reader = RecordReader::new(record, "");
        reader.mark("type");

        let request = read_request(&mut reader, browser);
        let config = reader.config_map("config").unwrap_or_default();
        let labels = reader.config_map("labels").unwrap_or_default();
        check_labels(&mut reader, "labels", &labels);

        let delay_secs: f64 = reader.optional("delay").unwrap_or(30.0);
        let delay = match Duration::try_from_secs_f64(delay_secs) {
            Ok(delay) => Some(delay),
            Err(_) => {
                reader.error("delay", format!("must be a non-negative number of seconds, got {}", delay_secs));
                None
            }
        };
        let timeout_secs: u64 = reader.optional("timeout").unwrap_or(120);

        let kind = read_kind(&mut reader, &type_name, request.as_ref());
        let overrides = read_overrides(&mut reader);

        match (reader.finish(), request, kind, delay) {
            (Ok(()), Some(request), Some(kind), Some(delay)) => Ok(Self {
                kind,
                request,
                config,
                labels,
                delay,
                timeout_secs,
                overrides,
            }),
            (Err(errors), _, _, _) => Err(ValidationError {
                action_type: Some(type_name),
                errors,
            }),
            // Every path that yields None also records an error
            _ => Err(ValidationError {
                action_type: Some(type_name),
                errors: vec![FieldError::new("type", "incomplete action record")],
            }),
        }
    }

    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let record: Mapping = serde_yaml::from_str(yaml)?;
        Ok(Self::from_record(&record)?)
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn request(&self) -> &RequestSpec {
        &self.request
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn labels(&self) -> &ConfigMap {
        &self.labels
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Execution timeout handed to the orchestrator, in seconds
    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn override_for(&self, integration: &str) -> Option<&ActionOverride> {
        self.overrides.get(integration)
    }

    pub fn overrides(&self) -> &BTreeMap<String, ActionOverride> {
        &self.overrides
    }
}

fn read_request(reader: &mut RecordReader<'_>, browser: bool) -> Option<RequestSpec> {
    let url = reader.required::<String>("url").and_then(|raw| match Url::parse(&raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => Some(url),
        Ok(url) => {
            reader.error("url", format!("unsupported URL {:?}, expected http:// or https://", url.as_str()));
            None
        }
        Err(e) => {
            reader.error("url", format!("invalid URL {:?}: {}", raw, e));
            None
        }
    });

    let method: HttpMethod = reader.optional("method").unwrap_or_default();
    let headers: BTreeMap<String, String> = reader.optional("headers").unwrap_or_default();
    let auth: Option<(String, String)> = reader.optional("auth");
    let body_length: usize = reader.optional("body_length").unwrap_or(0);
    let follow_redirects: bool = reader.optional("follow_redirects").unwrap_or(browser);
    let verify_ssl: bool = reader.optional("verify_ssl").unwrap_or(true);
    let http2: bool = reader.optional("http2").unwrap_or(false);

    for name in headers.keys() {
        if !HEADER_NAME.is_match(name) {
            reader.error("headers", format!("{:?} must be a valid HTTP header name", name));
        }
    }

    if let Some(url) = &url {
        if http2 && url.scheme() == "http" {
            reader.error("http2", "must be false when the URL is not HTTPS, HTTP/2 is only negotiated over TLS");
        }
    }

    if browser {
        if method != HttpMethod::Get {
            reader.error("method", "browser actions only support GET");
        }
        if auth.is_some() {
            reader.error("auth", "not allowed for browser actions");
        }
        if body_length != 0 {
            reader.error("body_length", "must be 0 for browser actions");
        }
        if !headers.is_empty() {
            reader.error("headers", "not allowed for browser actions");
        }
        if !follow_redirects {
            reader.error("follow_redirects", "must be true for browser actions");
        }
        if !verify_ssl {
            reader.error("verify_ssl", "must be true for browser actions");
        }
        if http2 {
            reader.error("http2", "must be false for browser actions");
        }
    }

    Some(RequestSpec {
        url: url?,
        method,
        headers,
        auth,
        body_length,
        follow_redirects,
        verify_ssl,
        http2,
    })
}

fn read_kind(reader: &mut RecordReader<'_>, type_name: &str, request: Option<&RequestSpec>) -> Option<ActionKind> {
    match type_name {
        "string" => Some(ActionKind::String {
            string: reader.required("string")?,
        }),
        "path" => Some(ActionKind::Path {
            path: reader.required("path")?,
        }),
        "status" => {
            let status: Option<u16> = reader.optional("status");
            if let Some(code) = status {
                if !(100..=599).contains(&code) {
                    reader.error("status", format!("status code must be between 100 and 599, got {}", code));
                }
            }
            Some(ActionKind::Status { status })
        }
        "header" => {
            let name: Option<String> = reader.required("header_name");
            if let Some(name) = &name {
                if !HEADER_NAME.is_match(name) {
                    reader.error("header_name", format!("{:?} must be a valid HTTP header name", name));
                }
            }
            let pattern = reader.pattern("header_rx");
            Some(ActionKind::Header { name: name?, pattern })
        }
        "ssl" => {
            if let Some(request) = request {
                if request.url.scheme() != "https" {
                    reader.error("url", "the URL must be HTTPS when using the ssl type");
                }
            }
            let protocols: BTreeSet<TlsVersion> = reader
                .optional("ssl_protocols")
                .unwrap_or_else(|| [TlsVersion::Tls12, TlsVersion::Tls13].into_iter().collect());
            let expiration_days: i64 = reader.optional("ssl_expiration").unwrap_or(365);
            if !(1..=MAX_EXPIRATION_DAYS).contains(&expiration_days) {
                reader.error(
                    "ssl_expiration",
                    format!("must be between 1 and {} days, got {}", MAX_EXPIRATION_DAYS, expiration_days),
                );
            }
            let subject: String = reader
                .optional("ssl_subject")
                .unwrap_or_else(|| "/CN=www.example.com/".to_string());
            Some(ActionKind::Ssl {
                protocols,
                expiration_days,
                subject,
            })
        }
        "xpath" => {
            let xpath: String = reader.required("xpath")?;
            if let Err(reason) = check_xpath(&xpath) {
                reader.error("xpath", format!("invalid XPath expression {:?}: {}", xpath, reason));
            }
            Some(ActionKind::Xpath { xpath })
        }
        "cookie" => {
            let name: Option<String> = reader.required("cookie_name");
            if let Some(name) = &name {
                if !COOKIE_NAME.is_match(name) {
                    reader.error("cookie_name", format!("{:?} must be a valid HTTP cookie name", name));
                }
            }
            let pattern = reader.pattern("cookie_rx");
            let secure: bool = reader.optional("cookie_secure_flag").unwrap_or(false);
            let http_only: bool = reader.optional("cookie_http_only_flag").unwrap_or(false);
            let same_site: Option<SameSite> = reader.optional("cookie_same_site_flag");
            if secure && request.map(RequestSpec::is_plain_http).unwrap_or(false) {
                reader.error("cookie_secure_flag", "must be false when the URL is not HTTPS");
            }
            Some(ActionKind::Cookie {
                name: name?,
                pattern,
                secure,
                http_only,
                same_site,
            })
        }
        _ => None,
    }
}

/// Uppercase top-level keys are per-integration override records
fn read_overrides(reader: &mut RecordReader<'_>) -> BTreeMap<String, ActionOverride> {
    let mut overrides = BTreeMap::new();

    for (key, value) in reader.unread() {
        let Some(name) = key.as_str() else {
            reader.error(format!("{:?}", key), "field names must be strings");
            continue;
        };

        if !name.starts_with(|c: char| c.is_ascii_uppercase()) {
            reader.error(name, "unknown field");
            continue;
        }

        let Value::Mapping(block) = value else {
            reader.error(name, "integration overrides must be a mapping");
            continue;
        };

        let mut sub = RecordReader::new(block, name);
        let config = sub.config_map("config").unwrap_or_default();
        let labels = sub.config_map("labels").unwrap_or_default();
        check_labels(&mut sub, "labels", &labels);
        for (extra, _) in sub.unread() {
            let extra = extra.as_str().map(str::to_string).unwrap_or_else(|| format!("{:?}", extra));
            sub.error(extra, "unknown field");
        }
        if let Err(errors) = sub.finish() {
            reader.errors.extend(errors);
            continue;
        }

        overrides.insert(name.to_string(), ActionOverride { config, labels });
    }

    overrides
}

fn check_labels(reader: &mut RecordReader<'_>, field: &str, labels: &ConfigMap) {
    for key in labels.keys() {
        if !key.starts_with(LABEL_PREFIX) {
            reader.error(field, format!("label {:?} must start with {}", key, LABEL_PREFIX));
        }
    }
}

/// Compile the expression as XPath 1.0; the browser evaluates it later
pub fn check_xpath(expr: &str) -> Result<(), String> {
    match sxd_xpath::Factory::new().build(expr.trim()) {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err("empty expression".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Reads typed fields out of a record, collecting one error per bad field
struct RecordReader<'a> {
    record: &'a Mapping,
    prefix: String,
    seen: BTreeSet<String>,
    errors: Vec<FieldError>,
}

impl<'a> RecordReader<'a> {
    fn new(record: &'a Mapping, prefix: &str) -> Self {
        Self {
            record,
            prefix: prefix.to_string(),
            seen: BTreeSet::new(),
            errors: Vec::new(),
        }
    }

    fn mark(&mut self, field: &str) {
        self.seen.insert(field.to_string());
    }

    fn error(&mut self, field: impl AsRef<str>, message: impl Into<String>) {
        let field = if self.prefix.is_empty() {
            field.as_ref().to_string()
        } else {
            format!("{}.{}", self.prefix, field.as_ref())
        };
        self.errors.push(FieldError::new(field, message));
    }

    fn optional<T: DeserializeOwned>(&mut self, field: &str) -> Option<T> {
        self.mark(field);
        match self.record.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => match serde_yaml::from_value(value.clone()) {
                Ok(v) => Some(v),
                Err(e) => {
                    self.error(field, e.to_string());
                    None
                }
            },
        }
    }

    fn required<T: DeserializeOwned>(&mut self, field: &str) -> Option<T> {
        let present = !matches!(self.record.get(field), None | Some(Value::Null));
        let value = self.optional(field);
        if !present {
            self.error(field, "field required");
        }
        value
    }

    fn pattern(&mut self, field: &str) -> Option<Pattern> {
        let source: String = self.optional(field)?;
        match Pattern::new(&source) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                self.error(field, format!("invalid regular expression {:?}: {}", source, e));
                None
            }
        }
    }

    fn config_map(&mut self, field: &str) -> Option<ConfigMap> {
        let raw: BTreeMap<String, Value> = self.optional(field)?;
        match stringify_map(raw) {
            Ok(map) => Some(map),
            Err(e) => {
                self.error(field, e);
                None
            }
        }
    }

    /// Entries not consumed by any read so far
    fn unread(&self) -> Vec<(&'a Value, &'a Value)> {
        self.record
            .iter()
            .filter(|(k, _)| k.as_str().map(|k| !self.seen.contains(k)).unwrap_or(true))
            .collect()
    }

    fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

fn stringify_map(raw: BTreeMap<String, Value>) -> Result<ConfigMap, String> {
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Bool(b) => if b { "yes" } else { "no" }.to_string(),
                Value::Number(n) => n.to_string(),
                Value::Null => String::new(),
                other => return Err(format!("value of {:?} must be a scalar, got {:?}", key, other)),
            };
            Ok((key, value))
        })
        .collect()
}

fn de_config_map<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ConfigMap, D::Error> {
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    stringify_map(raw).map_err(serde::de::Error::custom)
}

/// Which integrations a test file applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applicability {
    All,
    Selectors(Vec<String>),
}

/// A test file under `tests/<kind>/<name>.yml`
#[derive(Debug, Clone, Deserialize)]
pub struct TestFile {
    /// File stem, filled in by the loader
    #[serde(skip)]
    pub name: String,

    #[serde(default)]
    integrations: Option<Value>,

    #[serde(default, deserialize_with = "de_config_map")]
    pub config: ConfigMap,

    #[serde(default, deserialize_with = "de_config_map")]
    pub labels: ConfigMap,

    /// Raw action records, validated on demand
    #[serde(default)]
    pub actions: Mapping,

    /// Test-level integration blocks and anything else
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl TestFile {
    pub fn from_yaml(name: &str, yaml: &str) -> E2eResult<Self> {
        let value: Value = serde_yaml::from_str(yaml)?;
        if value.is_null() {
            return Err(E2eError::TestFile(format!("{}.yml is empty", name)));
        }
        let mut file: Self = serde_yaml::from_value(value)?;
        file.name = name.to_string();
        Ok(file)
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.split('.').next())
            .ok_or_else(|| E2eError::TestFile(format!("bad test file name: {}", path.display())))?;
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(name, &content)
    }

    /// A missing `integrations` key applies to nothing
    pub fn applicability(&self) -> Result<Applicability, String> {
        match &self.integrations {
            None | Some(Value::Null) => Ok(Applicability::Selectors(Vec::new())),
            Some(Value::String(s)) if s == "all" => Ok(Applicability::All),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| format!("selector {:?} is not a string", item))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Applicability::Selectors),
            Some(other) => Err(format!("{:?}", other)),
        }
    }

    /// Test-level block for one integration
    pub fn integration_block(&self, integration: &str) -> E2eResult<ActionOverride> {
        match self.extra.get(integration) {
            None | Some(Value::Null) => Ok(ActionOverride::default()),
            Some(value) => Ok(serde_yaml::from_value(value.clone())?),
        }
    }

    pub fn action_names(&self) -> Vec<String> {
        self.actions
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect()
    }

    pub fn raw_action(&self, name: &str) -> Option<&Mapping> {
        self.actions.get(name).and_then(Value::as_mapping)
    }

    /// Look up and validate one action
    pub fn action(&self, name: &str) -> E2eResult<Action> {
        let record = self.raw_action(name).ok_or_else(|| E2eError::ActionNotFound {
            name: name.to_string(),
            file: format!("{}.yml", self.name),
        })?;
        Ok(Action::from_record(record)?)
    }
}

/// `<file>;<action>` pair naming one action of one test file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    pub file: String,
    pub action: String,
}

impl FromStr for ActionRef {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';');
        match (parts.next(), parts.next()) {
            (Some(file), Some(action)) if !file.is_empty() && !action.is_empty() => Ok(Self {
                file: file.to_string(),
                action: action.to_string(),
            }),
            _ => Err(E2eError::InvalidSelector(s.to_string())),
        }
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.file, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn parse(yaml: &str) -> Result<Action, ValidationError> {
        let record: Mapping = serde_yaml::from_str(yaml).unwrap();
        Action::from_record(&record)
    }

    #[test]
    fn test_parse_string_action_with_defaults() {
        let action = parse(
            r#"
type: string
url: http://www.example.com
string: ok
"#,
        )
        .unwrap();

        assert!(matches!(action.kind(), ActionKind::String { string } if string == "ok"));
        let request = action.request();
        assert_eq!(request.method, HttpMethod::Get);
        assert!(!request.follow_redirects);
        assert!(request.verify_ssl);
        assert!(!request.http2);
        assert_eq!(request.body(), None);
        assert_eq!(action.delay(), Duration::from_secs(30));
        assert_eq!(action.timeout_secs(), 120);
    }

    #[test]
    fn test_missing_type_is_rejected_first() {
        let err = parse("url: not a url\n").unwrap_err();
        assert_eq!(err.errors, vec![FieldError::new("type", "field required")]);
    }

    #[test]
    fn test_unknown_type_skips_variant_validation() {
        let err = parse("type: teapot\nheader_rx: '('\n").unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert!(err.has_field("type"));
        assert_eq!(err.action_type.as_deref(), Some("teapot"));
    }

    #[test]
    fn test_every_offending_field_is_reported() {
        let err = parse(
            r#"
type: header
url: http://www.example.com
header_name: "bad header"
header_rx: "(unclosed"
labels:
  USE_ANTIBOT: "yes"
http2: true
"#,
        )
        .unwrap_err();

        assert!(err.has_field("header_name"));
        assert!(err.has_field("header_rx"));
        assert!(err.has_field("labels"));
        assert!(err.has_field("http2"));
        assert_eq!(err.errors.len(), 4);
    }

    #[test]
    fn test_browser_restrictions() {
        let err = parse(
            r#"
type: xpath
url: https://www.example.com
xpath: //div
method: POST
headers:
  X-Test: "1"
body_length: 3
follow_redirects: false
"#,
        )
        .unwrap_err();

        for field in ["method", "headers", "body_length", "follow_redirects"] {
            assert!(err.has_field(field), "missing {}", field);
        }
    }

    #[test]
    fn test_browser_defaults_follow_redirects() {
        let action = parse("type: xpath\nurl: https://www.example.com\nxpath: //h1\n").unwrap();
        assert!(action.request().follow_redirects);
        assert!(action.kind().is_browser());
    }

    #[test]
    fn test_ssl_requires_https() {
        let err = parse("type: ssl\nurl: http://www.example.com\n").unwrap_err();
        assert!(err.has_field("url"));

        let action = parse("type: ssl\nurl: https://www.example.com\n").unwrap();
        match action.kind() {
            ActionKind::Ssl {
                protocols,
                expiration_days,
                subject,
            } => {
                assert_eq!(protocols.len(), 2);
                assert!(protocols.contains(&TlsVersion::Tls13));
                assert_eq!(*expiration_days, 365);
                assert_eq!(subject, "/CN=www.example.com/");
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_cookie_secure_flag_requires_https() {
        let err = parse(
            r#"
type: cookie
url: http://www.example.com
cookie_name: session
cookie_rx: ".+"
cookie_secure_flag: true
"#,
        )
        .unwrap_err();
        assert!(err.has_field("cookie_secure_flag"));
    }

    #[test_case(99, false ; "below range")]
    #[test_case(100, true ; "lower bound")]
    #[test_case(599, true ; "upper bound")]
    #[test_case(600, false ; "above range")]
    fn test_status_range(code: u16, ok: bool) {
        let yaml = format!("type: status\nurl: http://www.example.com\nstatus: {}\n", code);
        assert_eq!(parse(&yaml).is_ok(), ok);
    }

    #[test]
    fn test_status_may_be_absent() {
        let action = parse("type: status\nurl: http://www.example.com\n").unwrap();
        assert!(matches!(action.kind(), ActionKind::Status { status: None }));
    }

    #[test]
    fn test_integration_overrides_are_dynamic() {
        let action = parse(
            r#"
type: string
url: http://www.example.com
string: ok
config:
  USE_GZIP: "yes"
Docker:
  config:
    USE_BROTLI: "yes"
Nomad:
  labels:
    bunkerweb.USE_GZIP: "no"
"#,
        )
        .unwrap();

        assert_eq!(action.config().get("USE_GZIP").map(String::as_str), Some("yes"));
        assert_eq!(
            action.override_for("Docker").unwrap().config.get("USE_BROTLI").map(String::as_str),
            Some("yes")
        );
        assert!(action.override_for("Nomad").unwrap().labels.contains_key("bunkerweb.USE_GZIP"));
        assert!(action.override_for("Linux").is_none());
    }

    #[test]
    fn test_override_labels_are_checked() {
        let err = parse(
            r#"
type: string
url: http://www.example.com
string: ok
Autoconf:
  labels:
    USE_GZIP: "no"
"#,
        )
        .unwrap_err();
        assert!(err.has_field("Autoconf.labels"));
    }

    #[test]
    fn test_unknown_lowercase_field_is_rejected() {
        let err = parse("type: string\nurl: http://www.example.com\nstring: ok\nheader_name: Server\n").unwrap_err();
        assert!(err.has_field("header_name"));
    }

    #[test_case("1.0e20" ; "overflowing")]
    #[test_case("-1" ; "negative")]
    #[test_case(".nan" ; "not a number")]
    fn test_unrepresentable_delay_is_a_field_error(delay: &str) {
        let err = parse(&format!("type: string\nurl: http://a/\nstring: ok\ndelay: {}\n", delay)).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert!(err.has_field("delay"));
    }

    #[test]
    fn test_pattern_matches_from_start() {
        let pattern = Pattern::new("nginx").unwrap();
        assert!(pattern.matches("nginx/1.25"));
        assert!(!pattern.matches("openresty nginx"));
    }

    #[test_case("//div[@id='main']", true ; "predicate")]
    #[test_case("/", true ; "root")]
    #[test_case("//div[", false ; "unclosed predicate")]
    #[test_case("//a[@href='x]", false ; "unterminated literal")]
    #[test_case("//div/", false ; "dangling step")]
    #[test_case("//div[]", false ; "empty predicate")]
    #[test_case("//div[@id=='x']", false ; "doubled operator")]
    #[test_case("foo bar", false ; "juxtaposed names")]
    #[test_case("//a[contains(@class, 'nav')]/text()", true ; "function call")]
    #[test_case("", false ; "empty")]
    fn test_check_xpath(expr: &str, ok: bool) {
        assert_eq!(check_xpath(expr).is_ok(), ok);
    }

    #[test]
    fn test_test_file_applicability_and_blocks() {
        let yaml = r#"
integrations:
  - Docker;amd64
  - Linux;amd64;ubuntu
config:
  USE_GZIP: "yes"
Autoconf:
  labels:
    bunkerweb.USE_GZIP: "no"
actions:
  gzip:
    type: header
    url: http://www.example.com
    header_name: Content-Encoding
    header_rx: gzip
"#;
        let file = TestFile::from_yaml("gzip", yaml).unwrap();
        assert_eq!(
            file.applicability().unwrap(),
            Applicability::Selectors(vec!["Docker;amd64".to_string(), "Linux;amd64;ubuntu".to_string()])
        );
        assert_eq!(file.integration_block("Autoconf").unwrap().labels.len(), 1);
        assert_eq!(file.integration_block("Docker").unwrap(), ActionOverride::default());
        assert_eq!(file.action_names(), vec!["gzip".to_string()]);
        assert!(file.action("gzip").is_ok());
        assert!(matches!(file.action("brotli"), Err(E2eError::ActionNotFound { .. })));
    }

    #[test]
    fn test_action_ref_parsing() {
        let r: ActionRef = "gzip;enabled".parse().unwrap();
        assert_eq!(r.file, "gzip");
        assert_eq!(r.action, "enabled");
        assert_eq!(r.to_string(), "gzip;enabled");
        assert!("gzip".parse::<ActionRef>().is_err());
    }
}
