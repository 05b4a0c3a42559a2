//! Configuration file management
//!
//! Handles finding, loading, and validating configuration files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{ClusterConfig, GlobalArgs};
use crate::engine::RunMode;
use crate::models::{PhaseSpec, TestSpec};
use crate::publish::{PublishMode, PublisherSpec};

/// Configuration file locations (in order of precedence)
const CONFIG_LOCATIONS: &[&str] = &[
    "./loadswarm.yaml",
    "./loadswarm.yml",
    "./.loadswarm.yaml",
    "./.loadswarm/config.yaml",
    "~/.config/loadswarm/config.yaml",
    "~/.loadswarm.yaml",
];

const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

fn default_version() -> String {
    "1.0".to_string()
}

/// Full configuration: what to run and how to report it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Version of config file format
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub globals: GlobalArgs,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub publishers: Vec<PublisherSpec>,

    /// Tests run once before the first phase
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup: Vec<TestSpec>,

    #[serde(default)]
    pub phases: Vec<PhaseSpec>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            version: default_version(),
            globals: GlobalArgs::default(),
            cluster: ClusterConfig::default(),
            publishers: Vec::new(),
            setup: Vec::new(),
            phases: Vec::new(),
        }
    }
}

impl Configuration {
    /// Find configuration file in standard locations
    pub fn find() -> Option<PathBuf> {
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Load from `path`, or from the first standard location when `None`
    pub fn load_or_find(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => match Self::find() {
                Some(path) => Self::load(&path),
                None => bail!(
                    "No configuration file given and none found in: {}",
                    CONFIG_LOCATIONS.join(", ")
                ),
            },
        }
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            bail!("Unsupported config version: {}", self.version);
        }

        if self.cluster.nr_drivers == 0 {
            bail!("cluster.nr_drivers must be at least 1");
        }

        let mut phase_names = HashSet::new();
        for phase in &self.phases {
            if !phase_names.insert(phase.name.as_str()) {
                bail!("Duplicate phase name '{}'", phase.name);
            }
            if phase.tests.is_empty() {
                bail!("Phase '{}' has no tests", phase.name);
            }
            validate_tests(&phase.name, &phase.tests)?;
            validate_run_mode(&phase.name, &phase.run_mode)?;
            if let PublishMode::Interval { interval_secs: 0 } = phase.publish_mode {
                bail!("Phase '{}': publish interval must be positive", phase.name);
            }
        }

        validate_tests("setup", &self.setup)?;
        Ok(())
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseSpec> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Generate example configuration
    pub fn example() -> Self {
        let browse = TestSpec::new("Browse", "http")
            .weight(5)
            .property("path", "/")
            .property("expect_status", 200);
        let search = TestSpec::new("Search", "http")
            .weight(3)
            .property("path", "/search?q=load")
            .timeout_ms(2000);
        let checkout = TestSpec::new("Checkout", "composite")
            .weight(1)
            .child(
                TestSpec::new("AddToCart", "http")
                    .property("method", "POST")
                    .property("path", "/cart"),
            )
            .child(
                TestSpec::new("Pay", "http")
                    .property("method", "POST")
                    .property("path", "/pay"),
            );

        let warmup = PhaseSpec {
            measurable: false,
            ..PhaseSpec::new("warmup")
                .duration_secs(30)
                .run_mode(RunMode::normal(2))
                .test(browse.clone())
        };

        let load = PhaseSpec {
            publish_mode: PublishMode::Interval { interval_secs: 5 },
            ..PhaseSpec::new("load")
                .duration_secs(300)
                .run_mode(RunMode::ramp(1, 50, 5, std::time::Duration::from_secs(10)))
                .test(browse)
                .test(search)
                .test(checkout)
        };

        Self {
            globals: GlobalArgs {
                duration_secs: Some(60),
                timeout_ms: 30_000,
                ..GlobalArgs::default()
            },
            publishers: vec![
                PublisherSpec::default(),
                PublisherSpec::Csv {
                    path: PathBuf::from("results/loadswarm.csv"),
                },
            ],
            phases: vec![warmup, load],
            ..Self::default()
        }
    }
}

fn validate_tests(scope: &str, tests: &[TestSpec]) -> Result<()> {
    let mut names = HashSet::new();
    for test in tests {
        if !names.insert(test.name.as_str()) {
            bail!("Duplicate test name '{}' in '{}'", test.name, scope);
        }
        if test.weight == 0 {
            bail!("Test '{}' in '{}' must have a positive weight", test.name, scope);
        }
        if test.count == Some(0) {
            bail!("Test '{}' in '{}' has a count of 0", test.name, scope);
        }
        if test.timeout_ms == Some(0) {
            bail!("Test '{}' in '{}' has a timeout of 0", test.name, scope);
        }
        validate_tests(&test.name, &test.children)?;
    }
    Ok(())
}

fn validate_run_mode(phase: &str, run_mode: &RunMode) -> Result<()> {
    match run_mode {
        RunMode::Normal { concurrency: 0, .. } => {
            bail!("Phase '{}': concurrency must be positive", phase)
        }
        RunMode::Ramp { start: 0, end: 0, .. } => {
            bail!("Phase '{}': ramp needs a positive start or end", phase)
        }
        RunMode::Ramp { rate: 0, .. } => bail!("Phase '{}': ramp rate must be positive", phase),
        _ => Ok(()),
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
