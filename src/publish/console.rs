//! Console publisher

use anyhow::Result;
use parking_lot::Mutex;
use std::io::Write;

use super::Publisher;
use crate::models::TestResult;
use crate::output::{OutputFormat, ResultFormatter};
use crate::stats::MetricResult;

/// Prints metrics through the result formatter
pub struct ConsolePublisher {
    formatter: ResultFormatter,
    raw: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsolePublisher {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::to_writer(format, Box::new(std::io::stdout()))
    }

    pub fn to_writer(format: OutputFormat, out: Box<dyn Write + Send>) -> Self {
        Self {
            formatter: ResultFormatter::new(format),
            raw: false,
            out: Mutex::new(out),
        }
    }

    /// Also print every raw execution
    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn no_color(mut self) -> Self {
        self.formatter = self.formatter.no_color();
        self
    }

    fn write(&self, text: &str) -> Result<()> {
        let mut out = self.out.lock();
        writeln!(out, "{text}")?;
        out.flush()?;
        Ok(())
    }
}

impl Publisher for ConsolePublisher {
    fn name(&self) -> &str {
        "console"
    }

    fn publish_intermediate(&self, phase: &str, results: &[MetricResult]) -> Result<()> {
        self.write(&self.formatter.format_metrics(phase, "Intermediate", results))
    }

    fn publish_final(&self, phase: &str, results: &[MetricResult]) -> Result<()> {
        self.write(&self.formatter.format_metrics(phase, "Final", results))
    }

    fn publish_raw(&self, phase: &str, results: &[TestResult]) -> Result<()> {
        if !self.raw {
            return Ok(());
        }
        for result in results {
            self.write(&format!("[{phase}] worker-{} {result}", result.worker))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_final_results_written() {
        let buffer = Buffer::default();
        let publisher =
            ConsolePublisher::to_writer(OutputFormat::Summary, Box::new(buffer.clone())).no_color();

        let result = MetricResult {
            name: "Browse".to_string(),
            total_runs: 3,
            ..Default::default()
        };
        publisher.publish_final("steady", &[result]).unwrap();

        let text = String::from_utf8(buffer.0.lock().clone()).unwrap();
        assert!(text.contains("Final [steady]"));
        assert!(text.contains("Browse: runs=3"));
    }

    #[test]
    fn test_raw_disabled_by_default() {
        let buffer = Buffer::default();
        let publisher = ConsolePublisher::to_writer(OutputFormat::Table, Box::new(buffer.clone()));
        publisher.publish_raw("p", &[]).unwrap();
        assert!(buffer.0.lock().is_empty());
    }
}
