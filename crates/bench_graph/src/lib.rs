//! Pipeline Description
//!
//! Provides:
//! - [`StageKind`] / [`StageConfig`]: stage types, their channels and typed options
//! - [`PipelineDescriptor`]: declarative stages + edges + terminal output
//! - [`PipelineFactory`]: turns an [`OptionSet`](bench_core::OptionSet) into a
//!   concrete descriptor, with [`ComputePathTracerGraph`] as the shipped topology
//!
//! Nothing in this crate talks to a host engine. A descriptor only describes
//! the intended wiring; instantiating it is the run controller's job.

pub mod builder;
pub mod descriptor;
pub mod stage;

pub use builder::{BuiltPipeline, ComputePathTracerGraph, PipelineFactory, StageRegistry};
pub use descriptor::{ChannelRef, Edge, PipelineDescriptor, Stage, StageId};
pub use stage::{
    AccumulateOptions, ImageLoaderOptions, PathTracerOptions, PrecisionMode, SamplePattern,
    StageConfig, StageKind, ToneMapOperator, ToneMapperOptions, VBufferOptions,
};
