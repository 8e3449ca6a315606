//! Harness settings
//!
//! Defaults match the paths the integration environments expect. An
//! optional TOML file overrides any subset of them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::E2eResult;
use crate::playwright::{Browser, PlaywrightConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    /// Root of the test tree (`integrations.yml`, `config.yml`, `<kind>/*.yml`)
    pub tests_dir: PathBuf,

    /// Outputs of `generate`
    pub outputs: OutputPaths,

    /// Client timeout for HTTP actions, in seconds
    pub http_timeout_secs: u64,

    /// Bound on the XPath element wait, in seconds
    pub browser_wait_secs: u64,

    /// TLS port `ssl` actions connect to
    pub tls_port: u16,

    pub browser: Browser,

    pub node_path: Option<PathBuf>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            tests_dir: PathBuf::from("tests"),
            outputs: OutputPaths::default(),
            http_timeout_secs: 10,
            browser_wait_secs: 10,
            tls_port: 443,
            browser: Browser::Firefox,
            node_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputPaths {
    /// Instance configuration consumed by the WAF at startup
    pub instance_config: PathBuf,
    pub autoconf_services: PathBuf,
    pub timeout_file: PathBuf,
    /// Directory receiving `<Integration>_tests.json` and `actions.txt`
    pub catalog_dir: PathBuf,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            instance_config: PathBuf::from("/etc/bunkerweb/config.yml"),
            autoconf_services: PathBuf::from("/tmp/autoconf-services.yml"),
            timeout_file: PathBuf::from("/tmp/timeout.txt"),
            catalog_dir: PathBuf::from("/tmp/tests"),
        }
    }
}

impl HarnessSettings {
    /// Load settings from file, falling back to defaults when it is absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let settings: Self = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Self::default())
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn browser_wait(&self) -> Duration {
        Duration::from_secs(self.browser_wait_secs)
    }

    pub fn integrations_file(&self) -> PathBuf {
        self.tests_dir.join("integrations.yml")
    }

    pub fn base_config_file(&self) -> PathBuf {
        self.tests_dir.join("config.yml")
    }

    pub fn autoconf_template(&self) -> PathBuf {
        self.tests_dir.join("misc").join("autoconf-services.yml")
    }

    pub fn kind_dir(&self, kind: &str) -> PathBuf {
        self.tests_dir.join(kind)
    }

    pub fn test_file(&self, kind: &str, name: &str) -> PathBuf {
        self.kind_dir(kind).join(format!("{}.yml", name))
    }

    pub fn playwright(&self) -> PlaywrightConfig {
        PlaywrightConfig {
            browser: self.browser,
            node_path: self.node_path.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = HarnessSettings::load(&dir.path().join("wafcheck.toml")).unwrap();
        assert_eq!(settings.http_timeout(), Duration::from_secs(10));
        assert_eq!(settings.tls_port, 443);
        assert_eq!(settings.outputs.instance_config, PathBuf::from("/etc/bunkerweb/config.yml"));
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wafcheck.toml");
        std::fs::write(
            &path,
            r#"
tests_dir = "/srv/tests"
browser = "chromium"

[outputs]
timeout_file = "/run/timeout.txt"
"#,
        )
        .unwrap();

        let settings = HarnessSettings::load(&path).unwrap();
        assert_eq!(settings.browser, Browser::Chromium);
        assert_eq!(settings.test_file("core", "gzip"), PathBuf::from("/srv/tests/core/gzip.yml"));
        assert_eq!(settings.outputs.timeout_file, PathBuf::from("/run/timeout.txt"));
        assert_eq!(settings.outputs.catalog_dir, PathBuf::from("/tmp/tests"));
        assert_eq!(settings.browser_wait(), Duration::from_secs(10));
    }
}
