//! Playwright browser automation for browser-driven actions
//!
//! Each check runs as one generated Node script: a fresh headless browser
//! context with an empty cookie jar, one navigation, one check. The script
//! prints a single JSON report on stdout which is parsed back here.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Chromium,
    #[default]
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(format!("unknown browser {:?}", other)),
        }
    }
}

/// What to look for once the page has loaded
#[derive(Debug, Clone)]
pub enum PageCheck {
    /// Wait for an element matching the XPath to be attached
    Xpath { xpath: String, wait: Duration },
    /// Collect the cookie jar
    Cookies,
}

/// A cookie as reported by the browser context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// `Strict`, `Lax` or `None`
    #[serde(default)]
    pub same_site: Option<String>,
}

/// Result of a successful navigation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageReport {
    pub url: String,
    #[serde(default)]
    pub source: String,
    /// Set for XPath checks
    #[serde(default)]
    pub found: Option<bool>,
    #[serde(default)]
    pub cookies: Vec<BrowserCookie>,
}

impl PageReport {
    pub fn cookie(&self, name: &str) -> Option<&BrowserCookie> {
        self.cookies.iter().find(|c| c.name == name)
    }
}

/// Navigation failures are data, like transport failures on the HTTP side
#[derive(Debug, Clone)]
pub enum BrowserOutcome {
    Page(PageReport),
    Failed(String),
}

#[derive(Debug, Deserialize)]
struct ScriptOutput {
    success: bool,
    #[serde(default)]
    report: Option<PageReport>,
    #[serde(default)]
    error: Option<String>,
}

/// Playwright browser handle
pub struct PlaywrightHandle {
    browser: Browser,
    headless: bool,
    viewport_width: u32,
    viewport_height: u32,
    node_path: Option<PathBuf>,
}

impl PlaywrightHandle {
    /// Create a new Playwright handle
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed()?;

        Ok(Self::without_check(config))
    }

    fn without_check(config: PlaywrightConfig) -> Self {
        Self {
            browser: config.browser,
            headless: config.headless,
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
            node_path: config.node_path,
        }
    }

    /// Check if Playwright is installed
    fn check_playwright_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Navigate once to `url` and run the check
    pub async fn visit(&self, url: &str, check: &PageCheck) -> E2eResult<BrowserOutcome> {
        info!("Starting {} ...", self.browser.as_str());
        let script = self.build_script(url, check)?;
        let stdout = self.run_script(&script).await?;
        parse_output(&stdout)
    }

    /// Build the Playwright script for one navigation and check
    pub fn build_script(&self, url: &str, check: &PageCheck) -> E2eResult<String> {
        let url = serde_json::to_string(url)?;
        let check_js = match check {
            PageCheck::Xpath { xpath, wait } => format!(
                r#"
    try {{
      await page.waitForSelector('xpath=' + {xpath}, {{ state: 'attached', timeout: {timeout} }});
      report.found = true;
    }} catch (error) {{
      if (error.name !== 'TimeoutError') throw error;
      report.found = false;
    }}"#,
                xpath = serde_json::to_string(xpath)?,
                timeout = wait.as_millis(),
            ),
            PageCheck::Cookies => r#"
    report.cookies = await context.cookies();"#
                .to_string(),
        };

        Ok(format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}
  }});
  await context.clearCookies();
  const page = await context.newPage();
  const report = {{ url: '', source: '', found: null, cookies: [] }};

  try {{
    await page.goto({url});
    report.url = page.url();
    report.source = await page.content();
{check}
    console.log(JSON.stringify({{ success: true, report }}));
  }} catch (error) {{
    console.log(JSON.stringify({{ success: false, error: error.message }}));
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            browser = self.browser.as_str(),
            headless = self.headless,
            width = self.viewport_width,
            height = self.viewport_height,
            url = url,
            check = check_js,
        ))
    }

    /// Execute the script via node and return its stdout
    async fn run_script(&self, script: &str) -> E2eResult<String> {
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("action.js");
        std::fs::write(&script_path, script)?;

        debug!("Running Playwright script: {}", script_path.display());

        let mut cmd = TokioCommand::new("node");
        cmd.arg(&script_path).current_dir(temp_dir.path());
        if let Some(node_path) = &self.node_path {
            cmd.env("NODE_PATH", node_path);
        }
        let output = cmd.output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(E2eError::Playwright(format!(
                "Script failed:\nstdout: {}\nstderr: {}",
                stdout, stderr
            )));
        }

        Ok(stdout)
    }
}

/// The report is the last JSON line the script printed
fn parse_output(stdout: &str) -> E2eResult<BrowserOutcome> {
    let line = stdout
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with('{'))
        .ok_or_else(|| E2eError::Playwright(format!("no report in script output: {}", stdout)))?;
    let output: ScriptOutput = serde_json::from_str(line)?;

    match (output.success, output.report) {
        (true, Some(report)) => {
            debug!("Page source: {}", report.source);
            debug!("Page URL: {}", report.url);
            Ok(BrowserOutcome::Page(report))
        }
        (true, None) => Err(E2eError::Playwright("script reported success without a report".to_string())),
        (false, _) => Ok(BrowserOutcome::Failed(
            output.error.unwrap_or_else(|| "unknown browser error".to_string()),
        )),
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Exported as `NODE_PATH` so the script can resolve `playwright`
    pub node_path: Option<PathBuf>,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Firefox,
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            node_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> PlaywrightHandle {
        PlaywrightHandle::without_check(PlaywrightConfig::default())
    }

    #[test]
    fn test_xpath_script_quotes_inputs() {
        let check = PageCheck::Xpath {
            xpath: "//a[@title='it\"s']".to_string(),
            wait: Duration::from_secs(10),
        };
        let script = handle().build_script("https://www.example.com/'", &check).unwrap();

        assert!(script.contains("firefox.launch({ headless: true })"));
        assert!(script.contains("await context.clearCookies();"));
        assert!(script.contains(r#"await page.goto("https://www.example.com/'");"#));
        assert!(script.contains(r#"'xpath=' + "//a[@title='it\"s']""#));
        assert!(script.contains("timeout: 10000"));
    }

    #[test]
    fn test_cookie_script_reads_context_jar() {
        let script = handle().build_script("https://www.example.com", &PageCheck::Cookies).unwrap();
        assert!(script.contains("report.cookies = await context.cookies();"));
        assert!(!script.contains("waitForSelector"));
    }

    #[test]
    fn test_parse_successful_report() {
        let stdout = r#"some noise
{"success":true,"report":{"url":"https://www.example.com/","source":"<html></html>","found":null,"cookies":[{"name":"session","value":"abc","domain":"www.example.com","secure":true,"httpOnly":true,"sameSite":"Lax"}]}}
"#;
        match parse_output(stdout).unwrap() {
            BrowserOutcome::Page(report) => {
                let cookie = report.cookie("session").unwrap();
                assert_eq!(cookie.value, "abc");
                assert!(cookie.secure);
                assert!(cookie.http_only);
                assert_eq!(cookie.same_site.as_deref(), Some("Lax"));
                assert!(report.cookie("other").is_none());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_parse_navigation_failure() {
        let stdout = r#"{"success":false,"error":"NS_ERROR_CONNECTION_REFUSED"}"#;
        assert!(matches!(
            parse_output(stdout).unwrap(),
            BrowserOutcome::Failed(e) if e == "NS_ERROR_CONNECTION_REFUSED"
        ));
    }

    #[test]
    fn test_parse_rejects_missing_report() {
        assert!(parse_output("").is_err());
    }

    #[test]
    fn test_browser_from_str() {
        assert_eq!("Firefox".parse::<Browser>().unwrap(), Browser::Firefox);
        assert_eq!("chrome".parse::<Browser>().unwrap(), Browser::Chromium);
        assert!("lynx".parse::<Browser>().is_err());
    }
}
