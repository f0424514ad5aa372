//! Graph Bench
//!
//! Scenario-matrix benchmark harness for pass-graph rendering runtimes.
//!
//! For every (scene × option set) combination the harness builds a pipeline
//! descriptor, instantiates it on a [`HostEngine`], warms it up with
//! intermediate frame captures, resets accumulated state, profiles a fixed
//! number of steps and writes one report per scenario.
//!
//! # Crates
//!
//! - [`bench_core`]: option values, statistics, errors
//! - [`bench_graph`]: stage types, pipeline descriptors, pipeline factories
//! - [`bench_host`]: the host interface plus simulated and recording hosts
//!
//! # Example
//!
//! ```rust,ignore
//! use graph_bench::prelude::*;
//!
//! let mut host = SimulatedHost::default();
//! let factory = ComputePathTracerGraph::evaluation();
//! let summary = ScenarioMatrix::new(&mut host, &factory, EvalSettings::default())?
//!     .run(&EvalMatrix::path_tracer_default())?;
//! ```

pub mod matrix;
pub mod report;
pub mod run;
pub mod scenario;
pub mod settings;

pub use bench_core;
pub use bench_graph;
pub use bench_host;

pub use bench_core::{EvalError, HostError, MetricStats, OptionSet, OptionValue, Result, StatisticsRecord};
pub use bench_graph::{ComputePathTracerGraph, PipelineDescriptor, PipelineFactory};
pub use bench_host::{HostEngine, RecordingHost, SimulatedHost, SimulatedHostSettings};
pub use matrix::{MatrixSummary, ScenarioMatrix, ScenarioOutcome};
pub use report::ResultReporter;
pub use run::{RunController, RunState};
pub use scenario::Scenario;
pub use settings::{EvalMatrix, EvalSettings, ReportFormat};

pub mod prelude {
    pub use crate::{
        ComputePathTracerGraph, EvalMatrix, EvalSettings, HostEngine, OptionSet, PipelineFactory,
        ReportFormat, ScenarioMatrix, SimulatedHost, SimulatedHostSettings,
    };
}
