//! Config materialization
//!
//! Turns one test action plus a target integration into the files the
//! environment provisioning consumes: the instance configuration, the
//! autoconf compose descriptor and the action timeout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::catalog::IntegrationMatrix;
use crate::config::OutputPaths;
use crate::error::{E2eError, E2eResult};
use crate::spec::{ConfigMap, TestFile, LABEL_PREFIX};

const AUTOCONF_SERVICE: &str = "app1";

/// Compose descriptor used when the tree carries no autoconf template
const DEFAULT_AUTOCONF_SERVICES: &str = r#"
version: "3.5"
services:
  app1:
    image: nginxdemos/nginx-hello:0.2
    networks:
      bw-services:
        ipv4_address: 192.168.0.254
        aliases:
          - app1
networks:
  bw-services:
    external: true
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Integration {
    Docker,
    Linux,
    Autoconf,
}

impl Integration {
    pub fn as_str(&self) -> &'static str {
        match self {
            Integration::Docker => "Docker",
            Integration::Linux => "Linux",
            Integration::Autoconf => "Autoconf",
        }
    }
}

impl fmt::Display for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Integration {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Docker" => Ok(Integration::Docker),
            "Linux" => Ok(Integration::Linux),
            "Autoconf" => Ok(Integration::Autoconf),
            other => Err(E2eError::UnknownIntegration(other.to_string())),
        }
    }
}

/// Everything `generate` writes for one action
#[derive(Debug, Clone)]
pub struct Materialized {
    pub instance_config: Value,
    /// Only produced for [`Integration::Autoconf`]
    pub autoconf_services: Option<Value>,
    pub timeout_secs: u64,
}

impl Materialized {
    /// Write the outputs, returning the paths that were written
    pub fn write(&self, outputs: &OutputPaths) -> E2eResult<Vec<PathBuf>> {
        let mut written = Vec::new();

        if let Some(services) = &self.autoconf_services {
            info!("📝 Writing {}", outputs.autoconf_services.display());
            write_file(&outputs.autoconf_services, &serde_yaml::to_string(services)?)?;
            written.push(outputs.autoconf_services.clone());
        }

        info!("📝 Writing {}", outputs.instance_config.display());
        write_file(&outputs.instance_config, &serde_yaml::to_string(&self.instance_config)?)?;
        written.push(outputs.instance_config.clone());

        write_file(&outputs.timeout_file, &self.timeout_secs.to_string())?;
        written.push(outputs.timeout_file.clone());

        Ok(written)
    }
}

fn write_file(path: &Path, content: &str) -> E2eResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Inputs shared by every action materialized from one test tree
pub struct Materializer {
    base_config: Value,
    autoconf_template: Option<Value>,
}

impl Materializer {
    pub fn new(base_config: Value, autoconf_template: Option<Value>) -> Self {
        Self {
            base_config,
            autoconf_template,
        }
    }

    /// Read `config.yml` and the optional autoconf template from disk
    pub fn load(base_config: &Path, autoconf_template: &Path) -> E2eResult<Self> {
        debug!("Trying to open {}", base_config.display());
        let base: Value = serde_yaml::from_str(&std::fs::read_to_string(base_config)?)?;
        let template = if autoconf_template.is_file() {
            Some(serde_yaml::from_str(&std::fs::read_to_string(autoconf_template)?)?)
        } else {
            None
        };
        Ok(Self::new(base, template))
    }

    pub fn materialize(
        &self,
        matrix: &IntegrationMatrix,
        integration: Integration,
        test: &TestFile,
        action_name: &str,
    ) -> E2eResult<Materialized> {
        info!(
            "🛠 Running {} / {} generation for integration {}",
            test.name, action_name, integration
        );

        if !matrix.contains(integration.as_str()) {
            return Err(E2eError::UnknownIntegration(integration.to_string()));
        }

        let action = test.action(action_name)?;
        let block = test.integration_block(integration.as_str())?;
        let overrides = action.override_for(integration.as_str()).cloned().unwrap_or_default();

        let mut config = self.base_config.clone();
        let core = core_section(&mut config)?;
        debug!("Default config: {:?}", core);

        if integration != Integration::Linux {
            core.insert("listen_addr".into(), "0.0.0.0".into());
            core.insert("whitelist".into(), "10.20.30.0/24".into());
            core.insert(
                "bunkerweb_instances".into(),
                Value::Sequence(vec!["10.20.30.254".into()]),
            );
        }

        let autoconf_services = if integration == Integration::Autoconf {
            core.insert("autoconf_mode".into(), Value::Bool(true));
            core.insert("server_name".into(), "".into());
            core.insert("multisite".into(), Value::Bool(true));

            let labels = merged(
                &[&test.labels, &block.labels, action.labels(), &overrides.labels],
                label_key,
            );
            Some(self.autoconf_services(&labels)?)
        } else {
            None
        };

        let settings = merged(
            &[&test.config, &block.config, action.config(), &overrides.config],
            str::to_lowercase,
        );
        debug!("Test config: {:?}", settings);
        for (key, value) in settings {
            core.insert(Value::String(key), Value::String(value));
        }
        debug!("Final config: {:?}", config);

        Ok(Materialized {
            instance_config: config,
            autoconf_services,
            timeout_secs: action.timeout_secs(),
        })
    }

    fn autoconf_services(&self, labels: &ConfigMap) -> E2eResult<Value> {
        let mut services = match &self.autoconf_template {
            Some(template) => template.clone(),
            None => serde_yaml::from_str(DEFAULT_AUTOCONF_SERVICES)?,
        };

        let service = services
            .get_mut("services")
            .and_then(|s| s.get_mut(AUTOCONF_SERVICE))
            .and_then(Value::as_mapping_mut)
            .ok_or_else(|| E2eError::TestFile(format!("autoconf template has no services.{}", AUTOCONF_SERVICE)))?;

        let existing = service
            .entry("labels".into())
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if existing.is_null() {
            *existing = Value::Mapping(Mapping::new());
        }
        let target = existing
            .as_mapping_mut()
            .ok_or_else(|| E2eError::TestFile(format!("services.{}.labels must be a mapping", AUTOCONF_SERVICE)))?;

        for (key, value) in labels {
            target.insert(Value::String(key.clone()), Value::String(value.clone()));
        }
        debug!("Final labels: {:?}", services);

        Ok(services)
    }
}

/// `bunkerweb.use_gzip` and `USE_GZIP` both become `bunkerweb.USE_GZIP`
pub fn label_key(key: &str) -> String {
    format!("{}{}", LABEL_PREFIX, key.replacen(LABEL_PREFIX, "", 1).to_uppercase())
}

/// Later layers win; keys are normalized first so case variants collide
fn merged(layers: &[&ConfigMap], normalize: fn(&str) -> String) -> ConfigMap {
    let mut out = ConfigMap::new();
    for layer in layers {
        out.extend(layer.iter().map(|(k, v)| (normalize(k), v.clone())));
    }
    out
}

fn core_section(config: &mut Value) -> E2eResult<&mut Mapping> {
    let root = config
        .as_mapping_mut()
        .ok_or_else(|| E2eError::TestFile("config.yml must be a mapping".to_string()))?;
    root.get_mut("core")
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| E2eError::TestFile("config.yml has no core section".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Mode;

    const MATRIX: &str = r#"
staging:
  Docker:
    amd64: "22.04"
  Linux:
    amd64: "22.04"
  Autoconf:
    amd64: "22.04"
"#;

    const BASE: &str = r#"
core:
  server_name: www.example.com
  use_gzip: "no"
"#;

    const TEST: &str = r#"
integrations: all
config:
  USE_GZIP: yes
  GZIP_COMP_LEVEL: 5
labels:
  bunkerweb.use_gzip: "yes"
Autoconf:
  config:
    GZIP_COMP_LEVEL: 6
  labels:
    bunkerweb.gzip_types: text/html
actions:
  compressed:
    type: header
    url: http://www.example.com
    header_name: Content-Encoding
    header_rx: gzip
    timeout: 60
    config:
      GZIP_MIN_LENGTH: 1
    labels:
      bunkerweb.GZIP_MIN_LENGTH: "1"
    Autoconf:
      config:
        GZIP_MIN_LENGTH: 10
      labels:
        bunkerweb.gzip_min_length: "10"
"#;

    fn setup() -> (Materializer, IntegrationMatrix, TestFile) {
        (
            Materializer::new(serde_yaml::from_str(BASE).unwrap(), None),
            IntegrationMatrix::from_yaml(MATRIX, Mode::Staging).unwrap(),
            TestFile::from_yaml("gzip", TEST).unwrap(),
        )
    }

    fn core(materialized: &Materialized) -> &Mapping {
        materialized.instance_config["core"].as_mapping().unwrap()
    }

    #[test]
    fn test_linux_keeps_listen_defaults() {
        let (materializer, matrix, test) = setup();
        let out = materializer.materialize(&matrix, Integration::Linux, &test, "compressed").unwrap();
        let core = core(&out);

        assert!(core.get("listen_addr").is_none());
        assert_eq!(core["use_gzip"], Value::from("yes"));
        assert_eq!(core["gzip_comp_level"], Value::from("5"));
        assert_eq!(core["gzip_min_length"], Value::from("1"));
        assert_eq!(core["server_name"], Value::from("www.example.com"));
        assert!(out.autoconf_services.is_none());
        assert_eq!(out.timeout_secs, 60);
    }

    #[test]
    fn test_docker_injects_network_settings() {
        let (materializer, matrix, test) = setup();
        let out = materializer.materialize(&matrix, Integration::Docker, &test, "compressed").unwrap();
        let core = core(&out);

        assert_eq!(core["listen_addr"], Value::from("0.0.0.0"));
        assert_eq!(core["whitelist"], Value::from("10.20.30.0/24"));
        assert_eq!(core["bunkerweb_instances"], Value::Sequence(vec!["10.20.30.254".into()]));
        assert!(core.get("autoconf_mode").is_none());
    }

    #[test]
    fn test_autoconf_merge_order_and_labels() {
        let (materializer, matrix, test) = setup();
        let out = materializer.materialize(&matrix, Integration::Autoconf, &test, "compressed").unwrap();
        let core = core(&out);

        assert_eq!(core["autoconf_mode"], Value::Bool(true));
        assert_eq!(core["multisite"], Value::Bool(true));
        assert_eq!(core["server_name"], Value::from(""));
        assert_eq!(core["gzip_comp_level"], Value::from("6"));
        assert_eq!(core["gzip_min_length"], Value::from("10"));

        let services = out.autoconf_services.unwrap();
        let labels = services["services"]["app1"]["labels"].as_mapping().unwrap();
        assert_eq!(labels["bunkerweb.USE_GZIP"], Value::from("yes"));
        assert_eq!(labels["bunkerweb.GZIP_TYPES"], Value::from("text/html"));
        assert_eq!(labels["bunkerweb.GZIP_MIN_LENGTH"], Value::from("10"));
        assert_eq!(services["services"]["app1"]["image"], Value::from("nginxdemos/nginx-hello:0.2"));
    }

    #[test]
    fn test_later_layer_wins_across_key_case() {
        let test = TestFile::from_yaml(
            "case",
            r#"
integrations: all
config:
  use_gzip: "no"
labels:
  bunkerweb.use_gzip: "no"
actions:
  shout:
    type: status
    url: http://www.example.com
    status: 200
    config:
      USE_GZIP: "yes"
    labels:
      USE_GZIP: "yes"
"#,
        )
        .unwrap();
        let (materializer, matrix, _) = setup();

        let out = materializer.materialize(&matrix, Integration::Linux, &test, "shout").unwrap();
        assert_eq!(core(&out)["use_gzip"], Value::from("yes"));

        let out = materializer.materialize(&matrix, Integration::Autoconf, &test, "shout").unwrap();
        assert_eq!(core(&out)["use_gzip"], Value::from("yes"));
        let services = out.autoconf_services.unwrap();
        let labels = services["services"]["app1"]["labels"].as_mapping().unwrap();
        assert_eq!(labels["bunkerweb.USE_GZIP"], Value::from("yes"));
        assert_eq!(labels.iter().filter(|(k, _)| k.as_str().unwrap().eq_ignore_ascii_case("bunkerweb.use_gzip")).count(), 1);
    }

    #[test]
    fn test_integration_must_be_in_matrix() {
        let (materializer, _, test) = setup();
        let matrix = IntegrationMatrix::from_yaml("staging:\n  Linux:\n    amd64: latest\n", Mode::Staging).unwrap();
        let err = materializer
            .materialize(&matrix, Integration::Docker, &test, "compressed")
            .unwrap_err();
        assert!(matches!(err, E2eError::UnknownIntegration(_)));
    }

    #[test]
    fn test_missing_action_is_reported() {
        let (materializer, matrix, test) = setup();
        let err = materializer.materialize(&matrix, Integration::Linux, &test, "absent").unwrap_err();
        assert!(matches!(err, E2eError::ActionNotFound { .. }));
    }

    #[test]
    fn test_label_key_strips_prefix_once() {
        assert_eq!(label_key("bunkerweb.use_gzip"), "bunkerweb.USE_GZIP");
        assert_eq!(label_key("use_gzip"), "bunkerweb.USE_GZIP");
        assert_eq!(label_key("bunkerweb.bunkerweb.x"), "bunkerweb.BUNKERWEB.X");
    }

    #[test]
    fn test_write_outputs() {
        let (materializer, matrix, test) = setup();
        let out = materializer.materialize(&matrix, Integration::Autoconf, &test, "compressed").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let outputs = OutputPaths {
            instance_config: dir.path().join("etc/bunkerweb/config.yml"),
            autoconf_services: dir.path().join("autoconf-services.yml"),
            timeout_file: dir.path().join("timeout.txt"),
            catalog_dir: dir.path().join("tests"),
        };
        let written = out.write(&outputs).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(std::fs::read_to_string(&outputs.timeout_file).unwrap(), "60");

        let config: Value = serde_yaml::from_str(&std::fs::read_to_string(&outputs.instance_config).unwrap()).unwrap();
        assert_eq!(config["core"]["autoconf_mode"], Value::Bool(true));
    }
}
