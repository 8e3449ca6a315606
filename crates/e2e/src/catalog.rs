//! Test catalog resolution
//!
//! Expands each test file's `integrations` declaration against the
//! integration readiness matrix into the concrete runs the CI matrix will
//! schedule.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_yaml::Value;
use tracing::{debug, error, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::spec::{Applicability, TestFile};

/// Readiness marker for combinations that are not implemented yet
pub const NOT_READY: &str = "TODO";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    #[default]
    Staging,
    Dev,
}

impl Mode {
    pub fn key(&self) -> &'static str {
        match self {
            Mode::Staging => "staging",
            Mode::Dev => "dev",
        }
    }
}

/// One arch entry: either a marker or scenarios keyed to markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchEntry {
    Marker(String),
    Scenarios(Vec<(String, String)>),
}

type Archs = Vec<(String, ArchEntry)>;

/// Integrations, arches and scenarios keep the order of the integrations file
#[derive(Debug, Clone, Default)]
pub struct IntegrationMatrix {
    integrations: Vec<(String, Archs)>,
}

fn lookup<'a, T>(pairs: &'a [(String, T)], key: &str) -> Option<&'a T> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

impl IntegrationMatrix {
    /// Load the `mode` section of `integrations.yml`
    pub fn load(path: &Path, mode: Mode) -> E2eResult<Self> {
        info!("📖 Reading {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, mode)
    }

    pub fn from_yaml(yaml: &str, mode: Mode) -> E2eResult<Self> {
        let root: Value = serde_yaml::from_str(yaml)?;
        let section = root
            .get(mode.key())
            .ok_or_else(|| E2eError::TestFile(format!("integrations file has no {} section", mode.key())))?;
        let matrix = Self::from_value(section)?;
        debug!("Integrations: {:?}", matrix.integrations);
        Ok(matrix)
    }

    fn from_value(section: &Value) -> E2eResult<Self> {
        let bad = |what: String| E2eError::TestFile(format!("invalid integrations file: {}", what));
        let Value::Mapping(section) = section else {
            return Err(bad("expected a mapping of integrations".to_string()));
        };

        let mut integrations = Vec::new();
        for (name, archs) in section {
            let name = scalar(name).ok_or_else(|| bad(format!("integration name {:?}", name)))?;
            let Value::Mapping(archs) = archs else {
                return Err(bad(format!("{} must map architectures", name)));
            };

            let mut entries = Vec::new();
            for (arch, entry) in archs {
                let arch = scalar(arch).ok_or_else(|| bad(format!("arch {:?} of {}", arch, name)))?;
                let entry = match entry {
                    Value::Mapping(scenarios) => {
                        let mut map = Vec::new();
                        for (scenario, marker) in scenarios {
                            let scenario = scalar(scenario)
                                .ok_or_else(|| bad(format!("scenario {:?} of {};{}", scenario, name, arch)))?;
                            let marker = scalar(marker)
                                .ok_or_else(|| bad(format!("marker of {};{};{}", name, arch, scenario)))?;
                            map.push((scenario, marker));
                        }
                        ArchEntry::Scenarios(map)
                    }
                    other => ArchEntry::Marker(
                        scalar(other).ok_or_else(|| bad(format!("marker of {};{}", name, arch)))?,
                    ),
                };
                entries.push((arch, entry));
            }
            integrations.push((name, entries));
        }

        Ok(Self { integrations })
    }

    pub fn contains(&self, integration: &str) -> bool {
        self.archs(integration).is_some()
    }

    pub fn integration_names(&self) -> impl Iterator<Item = &str> {
        self.integrations.iter().map(|(name, _)| name.as_str())
    }

    fn archs(&self, integration: &str) -> Option<&Archs> {
        lookup(&self.integrations, integration)
    }

    /// Concrete runs for one test
    pub fn resolve(&self, test: &str, applicability: &Applicability) -> Vec<CatalogEntry> {
        match applicability {
            Applicability::All => self
                .integration_names()
                .flat_map(|integration| self.leaves(integration, None, test))
                .collect(),
            Applicability::Selectors(selectors) => selectors
                .iter()
                .flat_map(|selector| self.resolve_selector(selector, test))
                .collect(),
        }
    }

    fn resolve_selector(&self, selector: &str, test: &str) -> Vec<CatalogEntry> {
        let parts: Vec<&str> = selector.split(';').collect();
        let resolved = match parts.as_slice() {
            [integration] if self.contains(integration) => Some(self.leaves(integration, None, test)),
            [integration, arch] => self
                .archs(integration)
                .filter(|archs| lookup(archs.as_slice(), arch).is_some())
                .map(|_| self.leaves(integration, Some(*arch), test)),
            [integration, arch, scenario] => match self.archs(integration).and_then(|a| lookup(a, arch)) {
                Some(ArchEntry::Scenarios(scenarios)) => lookup(scenarios, scenario).map(|marker| {
                    entry(integration, arch, Some(*scenario), marker, test)
                        .into_iter()
                        .collect()
                }),
                _ => None,
            },
            _ => None,
        };

        match resolved {
            Some(entries) => entries,
            None => {
                warn!("Skipping integration {} for {}", selector, test);
                Vec::new()
            }
        }
    }

    /// Every ready leaf under an integration, optionally narrowed to one arch
    fn leaves(&self, integration: &str, only_arch: Option<&str>, test: &str) -> Vec<CatalogEntry> {
        let Some(archs) = self.archs(integration) else {
            return Vec::new();
        };

        archs
            .iter()
            .filter(|(arch, _)| only_arch.map(|only| only == arch.as_str()).unwrap_or(true))
            .flat_map(|(arch, arch_entry)| match arch_entry {
                ArchEntry::Marker(marker) => entry(integration, arch, None, marker, test).into_iter().collect::<Vec<_>>(),
                ArchEntry::Scenarios(scenarios) => scenarios
                    .iter()
                    .filter_map(|(scenario, marker)| entry(integration, arch, Some(scenario.as_str()), marker, test))
                    .collect(),
            })
            .collect()
    }
}

fn entry(integration: &str, arch: &str, scenario: Option<&str>, marker: &str, test: &str) -> Option<CatalogEntry> {
    let entry = CatalogEntry {
        integration: integration.to_string(),
        arch: arch.to_string(),
        scenario: scenario.map(str::to_string),
        marker: marker.to_string(),
        test: test.to_string(),
    };
    if marker == NOT_READY {
        debug!("Skipping {} because it's {}", entry, NOT_READY);
        return None;
    }
    Some(entry)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// One scheduled run: `integration;arch[;scenario];marker;test`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub integration: String,
    pub arch: String,
    pub scenario: Option<String>,
    pub marker: String,
    pub test: String,
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{};", self.integration, self.arch)?;
        if let Some(scenario) = &self.scenario {
            write!(f, "{};", scenario)?;
        }
        write!(f, "{};{}", self.marker, self.test)
    }
}

/// Every run derived from one kind directory
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Resolve every `*.yml` test file directly under `dir`
    pub fn scan(dir: &Path, matrix: &IntegrationMatrix) -> E2eResult<Self> {
        info!("📖 Reading tests from {}", dir.display());
        let mut entries = Vec::new();

        for path in test_files(dir)? {
            debug!("Reading {}", path.display());
            let file = match TestFile::from_file(&path) {
                Ok(file) => file,
                Err(e) => {
                    error!("Invalid YAML in {}: {}", path.display(), e);
                    continue;
                }
            };

            match file.applicability() {
                Ok(applicability) => {
                    debug!("Integrations of {}: {:?}", file.name, applicability);
                    entries.extend(matrix.resolve(&file.name, &applicability));
                }
                Err(value) => error!("Invalid integrations for {}: {}", file.name, value),
            }
        }

        debug!("Tests: {:?}", entries.iter().map(ToString::to_string).collect::<Vec<_>>());
        Ok(Self { entries })
    }

    pub fn for_integration(&self, integration: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.integration == integration)
            .map(ToString::to_string)
            .collect()
    }

    /// Write `<Integration>_tests.json` for every integration of the matrix
    pub fn write_per_integration(&self, matrix: &IntegrationMatrix, out_dir: &Path) -> E2eResult<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)?;
        let mut written = Vec::new();

        for integration in matrix.integration_names() {
            let path = out_dir.join(format!("{}_tests.json", integration));
            let json = serde_json::to_string(&self.for_integration(integration))?;
            std::fs::write(&path, json)?;
            written.push(path);
        }

        Ok(written)
    }
}

/// `category;action` for every action of one test file
pub fn list_actions(file: &TestFile) -> Vec<String> {
    file.action_names()
        .into_iter()
        .map(|action| format!("{};{}", file.name, action))
        .collect()
}

/// Write the newline-terminated action list consumed by the runner matrix
pub fn write_actions(lines: &[String], out_dir: &Path) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join("actions.txt");
    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(&path, content)?;
    Ok(path)
}

fn test_files(dir: &Path) -> E2eResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| E2eError::TestFile(format!("cannot read {}: {}", dir.display(), e)))?;
        if entry.file_type().is_file() && entry.path().extension().map(|ext| ext == "yml").unwrap_or(false) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}
