//! Error Types
//!
//! This module defines the error types used throughout the harness.
//!
//! # Overview
//!
//! The main error type [`EvalError`] covers every failure mode of an
//! evaluation run, grouped the same way the harness reacts to them:
//! - Configuration errors (unknown option keys, malformed graphs, bad settings)
//!   are fatal and surface before any host interaction
//! - Execution errors (a host step or capture call failed) abort the whole matrix
//! - I/O errors (report or directory writes) are fatal as well
//!
//! Host implementations report their own failures through [`HostError`]; the
//! run controller wraps those into [`EvalError`] together with the phase and
//! step at which they happened.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bench_core::errors::{EvalError, Result};
//!
//! fn validate() -> Result<()> {
//!     Err(EvalError::InvalidSettings("measured_steps must be > 0".into()))
//! }
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a host engine implementation.
#[derive(Error, Debug)]
pub enum HostError {
    /// The operation is not available in the current host context.
    ///
    /// For graph registration this is recovered locally by the run controller.
    #[error("Operation not supported by host: {0}")]
    Unsupported(&'static str),

    /// A stage or pipeline handle does not belong to this host session.
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),

    /// A channel referenced by an edge or terminal output does not exist.
    #[error("Unknown channel '{0}'")]
    UnknownChannel(String),

    /// An operation that needs a scene was issued with none loaded.
    #[error("No scene loaded")]
    NoSceneLoaded,

    /// A second pipeline was registered while another one is still active.
    #[error("Pipeline slot already occupied by '{0}'")]
    PipelineSlotOccupied(String),

    /// Stepping was requested without an active pipeline.
    #[error("No active pipeline")]
    NoActivePipeline,

    /// The capture window was opened twice or closed while not open.
    #[error("Capture window {0}")]
    CaptureWindowState(&'static str),

    /// Generic failure inside the host engine.
    #[error("Host failure: {0}")]
    Failed(String),

    /// Host-side file I/O failed (e.g. writing a frame capture).
    #[error("Host I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The main error type for Graph Bench.
#[derive(Error, Debug)]
pub enum EvalError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// An option key is not recognized by the target stage type.
    #[error("Unknown option '{key}' for stage '{stage}'")]
    UnknownOption {
        /// Stage type that rejected the key
        stage: String,
        /// The offending key
        key: String,
    },

    /// An option value has the wrong type or is out of range.
    #[error("Invalid options for stage '{stage}': {reason}")]
    InvalidOptionValue {
        /// Stage type that rejected the value
        stage: String,
        /// Deserializer message
        reason: String,
    },

    /// A stage type tag is not known.
    #[error("Unknown stage type: {0}")]
    UnknownStageKind(String),

    /// A stage name is referenced but not present in the descriptor.
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// Two stages share the same name.
    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),

    /// A channel name is not declared by the stage type.
    #[error("Stage '{stage}' has no {direction} channel '{channel}'")]
    UnknownChannel {
        /// Stage name
        stage: String,
        /// Channel name
        channel: String,
        /// `"input"` or `"output"`
        direction: &'static str,
    },

    /// A consumer input is already fed by another edge.
    #[error("Input '{0}' is already connected")]
    InputAlreadyConnected(String),

    /// An edge connects a stage to itself.
    #[error("Edge '{0}' connects a stage to itself")]
    SelfEdge(String),

    /// The edge set contains a cycle.
    #[error("Cycle detected between stages: {}", stages.join(", "))]
    CycleDetected {
        /// Stages that could not be ordered
        stages: Vec<String>,
    },

    /// The descriptor has no terminal output marked.
    #[error("Pipeline '{0}' has no terminal output")]
    MissingTerminalOutput(String),

    /// A `"Stage.channel"` reference could not be parsed.
    #[error("Invalid channel reference '{0}' (expected 'Stage.channel')")]
    InvalidChannelRef(String),

    /// Evaluation settings failed validation.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// A scene identifier cannot name its own results directory.
    #[error("Invalid scene '{scene}': {reason}")]
    InvalidScene {
        /// Scene identifier as given
        scene: String,
        /// Why it was rejected
        reason: &'static str,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// A host call outside the stepping loop failed.
    #[error("Host failure during {phase}: {source}")]
    Execution {
        /// Run phase in which the call was issued
        phase: &'static str,
        /// Underlying host error
        #[source]
        source: HostError,
    },

    /// A host step failed.
    #[error("Host failure during {phase} at step {step}: {source}")]
    StepFailed {
        /// Run phase in which the step was issued
        phase: &'static str,
        /// 1-based step index within the phase
        step: u64,
        /// Underlying host error
        #[source]
        source: HostError,
    },

    /// The closed capture window has no record for the expected metric.
    #[error("Statistics record has no metric '{0}'")]
    MissingMetric(String),

    /// A statistic is NaN or infinite.
    #[error("Metric '{metric}' has a non-finite {field}")]
    NonFiniteStatistic {
        /// Metric name
        metric: String,
        /// Offending field (`mean`, `std_dev`, ...)
        field: &'static str,
    },

    /// The run controller was driven out of order.
    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state
        from: &'static str,
        /// Requested state
        to: &'static str,
    },

    // ========================================================================
    // I/O Errors
    // ========================================================================
    /// File or directory I/O failed.
    #[error("IO error at '{}': {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    /// Wraps an I/O error with the path that caused it.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for errors detected before touching the host engine.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownOption { .. }
                | Self::InvalidOptionValue { .. }
                | Self::UnknownStageKind(_)
                | Self::UnknownStage(_)
                | Self::DuplicateStage(_)
                | Self::UnknownChannel { .. }
                | Self::InputAlreadyConnected(_)
                | Self::SelfEdge(_)
                | Self::CycleDetected { .. }
                | Self::MissingTerminalOutput(_)
                | Self::InvalidChannelRef(_)
                | Self::InvalidSettings(_)
                | Self::InvalidScene { .. }
        )
    }
}

/// Alias for `Result<T, EvalError>`.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Alias for `Result<T, HostError>`, returned by host engine calls.
pub type HostResult<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_classified() {
        let err = EvalError::UnknownOption {
            stage: "ComputePathTracer".into(),
            key: "useNNE".into(),
        };
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "Unknown option 'useNNE' for stage 'ComputePathTracer'"
        );

        let err = EvalError::StepFailed {
            phase: "warmup",
            step: 3,
            source: HostError::Failed("device lost".into()),
        };
        assert!(!err.is_configuration());
        assert_eq!(
            err.to_string(),
            "Host failure during warmup at step 3: Host failure: device lost"
        );
    }

    #[test]
    fn cycle_message_lists_stages() {
        let err = EvalError::CycleDetected {
            stages: vec!["A".into(), "B".into()],
        };
        assert_eq!(err.to_string(), "Cycle detected between stages: A, B");
    }
}
