//! Result Reporter
//!
//! Turns the statistics record of one scenario into a report file inside the
//! scene directory. The file name is derived from the scenario's base
//! filename and the configured [`ReportFormat`]:
//!
//! | Format     | File               | Contents                                   |
//! |------------|--------------------|--------------------------------------------|
//! | `Info`     | `<base>_info.md`   | option set, then mean/std_dev/min/max      |
//! | `MeanOnly` | `<base>.log`       | the metric mean as a single number         |
//! | `Json`     | `<base>.json`      | options and statistics, pretty-printed     |
//!
//! Only finite statistics are written. A record without the configured
//! metric, or with a NaN/infinite statistic, is an error and no file is
//! created.

use std::fs;
use std::path::{Path, PathBuf};

use bench_core::{EvalError, MetricStats, OptionSet, Result, StatisticsRecord};
use serde::Serialize;

use crate::settings::{EvalSettings, ReportFormat};

#[derive(Serialize)]
struct JsonReport<'a> {
    options: &'a OptionSet,
    metric: &'a str,
    stats: &'a MetricStats,
}

/// Writes one report file per scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultReporter {
    format: ReportFormat,
    metric: String,
}

impl ResultReporter {
    #[must_use]
    pub fn new(format: ReportFormat, metric: impl Into<String>) -> Self {
        Self {
            format,
            metric: metric.into(),
        }
    }

    #[must_use]
    pub fn from_settings(settings: &EvalSettings) -> Self {
        Self::new(settings.report_format, settings.metric.clone())
    }

    #[inline]
    #[must_use]
    pub fn format(&self) -> ReportFormat {
        self.format
    }

    /// Looks up the configured metric and checks that it is fully finite.
    pub fn metric_stats<'r>(&self, record: &'r StatisticsRecord) -> Result<&'r MetricStats> {
        let stats = record
            .get(&self.metric)
            .ok_or_else(|| EvalError::MissingMetric(self.metric.clone()))?;
        if let Some(field) = stats.first_non_finite() {
            return Err(EvalError::NonFiniteStatistic {
                metric: self.metric.clone(),
                field,
            });
        }
        Ok(stats)
    }

    /// Formats the report body without touching the filesystem.
    pub fn render(&self, record: &StatisticsRecord, options: &OptionSet) -> Result<String> {
        let stats = self.metric_stats(record)?;

        let body = match self.format {
            ReportFormat::Info => {
                let listed: String = options.iter().map(|(key, value)| format!("{key}: {value}\n")).collect();
                format!(
                    "# Options\n{listed}# Metrics:\n## {}\nmean: {}\nstd_dev: {}\nmin: {}\nmax: {}\n",
                    self.metric, stats.mean, stats.std_dev, stats.min, stats.max
                )
            }
            ReportFormat::MeanOnly => format!("{}\n", stats.mean),
            ReportFormat::Json => {
                let mut json = serde_json::to_string_pretty(&JsonReport {
                    options,
                    metric: &self.metric,
                    stats,
                })?;
                json.push('\n');
                json
            }
        };
        Ok(body)
    }

    /// Writes the report for one scenario and returns its path.
    pub fn report(
        &self,
        record: &StatisticsRecord,
        options: &OptionSet,
        output_dir: &Path,
        base_filename: &str,
    ) -> Result<PathBuf> {
        let body = self.render(record, options)?;
        let path = output_dir.join(self.format.file_name(base_filename));
        fs::write(&path, body).map_err(|e| EvalError::io(&path, e))?;
        log::debug!("Report written to {}", path.display());
        Ok(path)
    }
}
