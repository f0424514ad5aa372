//! Evaluation Settings
//!
//! [`EvalSettings`] controls how each scenario is driven: how many warmup
//! steps run, at which of them an intermediate frame is captured, how many
//! steps are measured, which metric ends up in the report and where reports
//! are written.
//!
//! [`EvalMatrix`] lists what is evaluated: the scenes and the option sets
//! applied to the stage under test.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // Defaults: warmup checkpoints 1,2,3,4,256, 512 measured steps
//! let settings = EvalSettings::default();
//!
//! // Short smoke run writing mean-only logs
//! let settings = EvalSettings {
//!     warmup_checkpoints: vec![1, 2],
//!     measured_steps: 8,
//!     report_format: ReportFormat::MeanOnly,
//!     ..Default::default()
//! };
//! settings.validate()?;
//! ```

use std::path::PathBuf;

use bench_core::{EvalError, OptionSet, Result};
use bench_host::FRAME_TIME_METRIC;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ReportFormat
// ---------------------------------------------------------------------------

/// Shape of the per-scenario report file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReportFormat {
    /// `<ordinal>_info.md`: options followed by every statistic of the metric.
    #[default]
    Info,
    /// `<ordinal>.log`: the metric mean only.
    MeanOnly,
    /// `<ordinal>.json`: options and statistics as pretty-printed JSON.
    Json,
}

impl ReportFormat {
    /// Report file name for a scenario with the given base filename.
    #[must_use]
    pub fn file_name(self, base_filename: &str) -> String {
        match self {
            Self::Info => format!("{base_filename}_info.md"),
            Self::MeanOnly => format!("{base_filename}.log"),
            Self::Json => format!("{base_filename}.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// EvalSettings
// ---------------------------------------------------------------------------

/// Per-run driving parameters shared by every scenario of a matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvalSettings {
    /// Root of the evaluation tree; reports land in
    /// `<output_root>/<pipeline>/<scene>/`.
    pub output_root: PathBuf,
    /// Warmup step indices (1-based) at which a frame capture is requested.
    /// Warmup runs until the largest one.
    pub warmup_checkpoints: Vec<u64>,
    /// Steps executed inside the capture window.
    pub measured_steps: u64,
    /// Metric read from the statistics record.
    pub metric: String,
    pub report_format: ReportFormat,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("evaluation"),
            warmup_checkpoints: vec![1, 2, 3, 4, 256],
            measured_steps: 512,
            metric: FRAME_TIME_METRIC.to_owned(),
            report_format: ReportFormat::Info,
        }
    }
}

impl EvalSettings {
    /// Parses settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.metric.trim().is_empty() {
            return Err(EvalError::InvalidSettings("metric name must not be empty".into()));
        }
        if self.measured_steps == 0 {
            return Err(EvalError::InvalidSettings("measured_steps must be > 0".into()));
        }
        if self.warmup_checkpoints.contains(&0) {
            return Err(EvalError::InvalidSettings(
                "warmup checkpoints are 1-based; 0 is not a valid step".into(),
            ));
        }
        Ok(())
    }

    /// Number of warmup steps: the largest checkpoint, or 0 without checkpoints.
    #[inline]
    #[must_use]
    pub fn warmup_steps(&self) -> u64 {
        self.warmup_checkpoints.iter().copied().max().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// EvalMatrix
// ---------------------------------------------------------------------------

/// Scenes × option sets evaluated by one matrix run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvalMatrix {
    pub scenes: Vec<String>,
    pub option_sets: Vec<OptionSet>,
}

impl EvalMatrix {
    #[must_use]
    pub fn new(scenes: impl IntoIterator<Item = impl Into<String>>, option_sets: Vec<OptionSet>) -> Self {
        Self {
            scenes: scenes.into_iter().map(Into::into).collect(),
            option_sets,
        }
    }

    /// Next-event estimation on and off, on the two reference scenes.
    #[must_use]
    pub fn path_tracer_default() -> Self {
        Self::new(
            ["convergence_test", "cornell_box"],
            vec![
                OptionSet::new().with("useNEE", true),
                OptionSet::new().with("useNEE", false),
            ],
        )
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Number of scenarios the matrix expands to.
    #[must_use]
    pub fn scenario_count(&self) -> usize {
        self.scenes.len() * self.option_sets.len()
    }
}
