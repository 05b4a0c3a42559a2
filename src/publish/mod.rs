//! Result publishing
//!
//! Publishers consume aggregated metrics (and optionally raw results) and
//! emit them somewhere. The publish mode decides how often intermediate
//! results go out.

mod console;
mod csv_file;
mod mode;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::models::TestResult;
use crate::output::OutputFormat;
use crate::stats::MetricResult;

pub use console::ConsolePublisher;
pub use csv_file::CsvPublisher;
pub use mode::{PublishGate, PublishMode};

/// Sink for aggregated results
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// Results of one aggregation cycle while the phase is running
    fn publish_intermediate(&self, phase: &str, results: &[MetricResult]) -> Result<()>;

    /// Results once the phase has ended
    fn publish_final(&self, phase: &str, results: &[MetricResult]) -> Result<()>;

    /// Individual executions drained in one aggregation cycle
    fn publish_raw(&self, _phase: &str, _results: &[TestResult]) -> Result<()> {
        Ok(())
    }

    fn finish(&self) {}
}

/// Publisher declaration in configuration files
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PublisherSpec {
    Console {
        #[serde(default)]
        format: Option<String>,
        #[serde(default)]
        raw: bool,
    },
    Csv {
        path: PathBuf,
    },
}

impl Default for PublisherSpec {
    fn default() -> Self {
        PublisherSpec::Console {
            format: None,
            raw: false,
        }
    }
}

/// Instantiate the configured publishers; console output when none are given
pub fn build_publishers(specs: &[PublisherSpec]) -> Result<Vec<Arc<dyn Publisher>>> {
    let default = [PublisherSpec::default()];
    let specs = if specs.is_empty() { &default[..] } else { specs };

    specs
        .iter()
        .map(|spec| -> Result<Arc<dyn Publisher>> {
            match spec {
                PublisherSpec::Console { format, raw } => {
                    let format = match format {
                        Some(f) => OutputFormat::from_str(f)
                            .with_context(|| format!("Unknown console format: {f}"))?,
                        None => OutputFormat::Table,
                    };
                    Ok(Arc::new(ConsolePublisher::stdout(format).with_raw(*raw)))
                }
                PublisherSpec::Csv { path } => Ok(Arc::new(
                    CsvPublisher::create(path)
                        .with_context(|| format!("Failed to open CSV output {}", path.display()))?,
                )),
            }
        })
        .collect()
}
