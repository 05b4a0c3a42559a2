//! Output formatters for aggregated results
//!
//! Provides table, JSON and summary renderings of per-test metrics.

use serde::Serialize;
use std::io::Write;

use crate::engine::RunSummary;
use crate::stats::MetricResult;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format the metrics of one phase
    pub fn format_metrics(&self, phase: &str, title: &str, results: &[MetricResult]) -> String {
        match self.format {
            OutputFormat::Table => self.format_metrics_table(phase, title, results),
            OutputFormat::Json => to_json(phase, title, results, false),
            OutputFormat::JsonPretty => to_json(phase, title, results, true),
            OutputFormat::Summary => self.format_metrics_brief(phase, title, results),
        }
    }

    fn format_metrics_table(&self, phase: &str, title: &str, results: &[MetricResult]) -> String {
        let mut output = String::new();

        output.push_str(
            "\n┌──────────────────────────┬──────────┬────────┬────────┬─────────┬─────────┬─────────┬─────────┬──────────┐\n",
        );
        output.push_str(&format!("│ {title} - phase {phase}\n"));
        output.push_str(
            "├──────────────────────────┼──────────┼────────┼────────┼─────────┼─────────┼─────────┼─────────┼──────────┤\n",
        );
        output.push_str(
            "│ Test                     │     Runs │   Fail │   Skip │ min(ms) │ p50(ms) │ p99(ms) │ max(ms) │      RPS │\n",
        );
        output.push_str(
            "├──────────────────────────┼──────────┼────────┼────────┼─────────┼─────────┼─────────┼─────────┼──────────┤\n",
        );

        for result in results {
            let fail = if self.colorize && result.failed > 0 {
                format!("\x1b[31m{:>6}\x1b[0m", result.failed)
            } else {
                format!("{:>6}", result.failed)
            };

            output.push_str(&format!(
                "│ {:24} │ {:>8} │ {} │ {:>6} │ {:>7} │ {:>7} │ {:>7} │ {:>7} │ {:>8.1} │\n",
                truncate(&result.name, 24),
                result.total_runs,
                fail,
                result.skipped,
                result.min_ms,
                result.percentiles.p50,
                result.percentiles.p99,
                result.max_ms,
                result.throughput
            ));

            for (kind, count) in &result.failures {
                output.push_str(&format!("│     {kind}: {count}\n"));
            }
        }

        output.push_str(
            "└──────────────────────────┴──────────┴────────┴────────┴─────────┴─────────┴─────────┴─────────┴──────────┘\n",
        );
        output
    }

    fn format_metrics_brief(&self, phase: &str, title: &str, results: &[MetricResult]) -> String {
        let mut output = format!("{title} [{phase}]\n");
        for result in results {
            output.push_str("  ");
            output.push_str(&result.format_summary());
            output.push('\n');
        }
        output
    }

    /// Format a whole run
    pub fn format_run(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Table | OutputFormat::Summary => {
                let mut output = String::new();
                output.push_str("\n═══════════════════════════════════════════════════════════════\n");
                output.push_str(&format!(
                    " Run finished: {} phase(s) in {:.1}s\n",
                    summary.phases.len(),
                    summary.elapsed_secs
                ));
                output.push_str("═══════════════════════════════════════════════════════════════\n");
                for phase in &summary.phases {
                    let executions: u64 = phase.metrics.iter().map(|m| m.executions()).sum();
                    let failed: u64 = phase.metrics.iter().map(|m| m.failed).sum();
                    output.push_str(&format!(
                        " {:24} {:>8} executions {:>6} failed {:>8.1}s\n",
                        truncate(&phase.name, 24),
                        executions,
                        failed,
                        phase.elapsed_secs
                    ));
                }
                output
            }
        }
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn to_json(phase: &str, title: &str, results: &[MetricResult], pretty: bool) -> String {
    #[derive(Serialize)]
    struct MetricsJson<'a> {
        phase: &'a str,
        kind: &'a str,
        results: &'a [MetricResult],
    }

    let json = MetricsJson {
        phase,
        kind: title,
        results,
    };

    if pretty {
        serde_json::to_string_pretty(&json).unwrap_or_default()
    } else {
        serde_json::to_string(&json).unwrap_or_default()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

/// Write a run summary to a file
pub fn write_run_to_file(path: &str, summary: &RunSummary, format: OutputFormat) -> anyhow::Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_run(summary);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetricResult {
        MetricResult {
            name: "Home".to_string(),
            total_runs: 10,
            passed: 10,
            failed: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("unknown"), None);
    }

    #[test]
    fn test_formatter_creation() {
        let formatter = ResultFormatter::new(OutputFormat::Json).no_color();
        assert_eq!(formatter.format, OutputFormat::Json);
        assert!(!formatter.colorize);
    }

    #[test]
    fn test_format_table_lists_tests() {
        let output = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_metrics("warmup", "Final", &[sample()]);
        assert!(output.contains("Home"));
        assert!(output.contains("warmup"));
    }

    #[test]
    fn test_format_json() {
        let output =
            ResultFormatter::new(OutputFormat::Json).format_metrics("load", "Intermediate", &[sample()]);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["phase"], "load");
        assert_eq!(value["results"][0]["name"], "Home");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-test-name", 6), "a-ver…");
    }
}
