//! Console logging backend.

use super::MetricLogger;
use std::collections::HashMap;

/// Logger that prints metrics via tracing, tagged with the task mode.
pub struct ConsoleLogger {
    prefix: String,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self {
            prefix: String::new(),
        }
    }

    /// Prefix every line, e.g. with the task mode being trained.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// One line with metrics sorted by name: `Update 10: a=1.0000, b=2.0000`
    pub fn format_metrics(&self, metrics: &HashMap<String, f64>, step: u64) -> String {
        let mut sorted: Vec<_> = metrics.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let body = sorted
            .iter()
            .map(|(key, value)| format!("{}={:.4}", key, value))
            .collect::<Vec<_>>()
            .join(", ");

        if self.prefix.is_empty() {
            format!("Update {}: {}", step, body)
        } else {
            format!("[{}] Update {}: {}", self.prefix, step, body)
        }
    }
}

impl MetricLogger for ConsoleLogger {
    fn log_scalar(&self, name: &str, value: f64, step: u64) {
        tracing::info!("Update {}: {} = {:.4}", step, name, value);
    }

    fn log_metrics(&self, metrics: &HashMap<String, f64>, step: u64) {
        tracing::info!("{}", self.format_metrics(metrics, step));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_metrics_sorted() {
        let metrics = HashMap::from([("loss".to_string(), 0.5), ("entropy".to_string(), 1.25)]);
        assert_eq!(
            ConsoleLogger::new().format_metrics(&metrics, 10),
            "Update 10: entropy=1.2500, loss=0.5000"
        );
        assert_eq!(
            ConsoleLogger::with_prefix("hunt").format_metrics(&metrics, 3),
            "[hunt] Update 3: entropy=1.2500, loss=0.5000"
        );
    }
}
