//! Host Engine Interface
//!
//! The harness never renders anything itself. Everything it needs from the
//! rendering runtime goes through the [`HostEngine`] trait:
//!
//! - **Graph construction**: create stages, assemble a pipeline, add edges,
//!   mark the terminal output
//! - **Registration**: optionally make the pipeline the session's active one
//! - **Stepping**: advance one frame of pipeline work
//! - **Frame capture**: request intermediate captures at given step indices
//! - **State resets**: logical clock and per-stage accumulation
//! - **Profiling**: open/close a capture window and read back statistics
//! - **Scenes**: load/unload the scene the pipeline renders
//!
//! Two implementations ship with this crate:
//!
//! - [`SimulatedHost`]: a headless in-process stand-in that really executes
//!   the registered pipeline on a small CPU workload and profiles it
//! - [`RecordingHost`]: a scripted fake that records every call and can inject
//!   failures, for tests
//!
//! All calls are blocking. A host session is single-threaded and holds at
//! most one active pipeline.

use std::collections::BTreeSet;
use std::path::Path;

use bench_core::{HostResult, OptionSet, StatisticsRecord};
use bench_graph::{ChannelRef, StageKind};

pub mod clock;
pub mod recording;
pub mod simulated;

pub use clock::LogicalClock;
pub use recording::{HostCall, HostCallKind, RecordingHost};
pub use simulated::{SimulatedHost, SimulatedHostSettings};

slotmap::new_key_type! {
    /// Host-side handle of an instantiated stage.
    pub struct StageHandle;
    /// Host-side handle of an assembled pipeline.
    pub struct PipelineHandle;
}

/// Metric name under which hosts report whole-frame time, in milliseconds.
pub const FRAME_TIME_METRIC: &str = "/onFrameRender/gpu_time";

/// Metric name under which hosts report the time of one stage.
#[must_use]
pub fn stage_time_metric(stage: &str) -> String {
    format!("/onFrameRender/RenderGraphExe::execute()/{stage}/gpu_time")
}

/// The narrow interface the harness consumes from a rendering runtime.
pub trait HostEngine {
    // ========================================================================
    // Graph construction
    // ========================================================================

    /// Instantiates a stage of type `kind` with the full option map.
    fn create_stage(&mut self, kind: StageKind, options: &OptionSet) -> HostResult<StageHandle>;

    /// Creates an empty pipeline.
    fn create_pipeline(&mut self, name: &str) -> HostResult<PipelineHandle>;

    /// Adds a created stage to a pipeline under `name`.
    fn add_stage(&mut self, pipeline: PipelineHandle, stage: StageHandle, name: &str)
    -> HostResult<()>;

    /// Connects a producer output to a consumer input.
    fn add_edge(&mut self, pipeline: PipelineHandle, from: &ChannelRef, to: &ChannelRef)
    -> HostResult<()>;

    /// Marks the output read back after each step.
    fn mark_terminal_output(&mut self, pipeline: PipelineHandle, output: &ChannelRef)
    -> HostResult<()>;

    // ========================================================================
    // Registration
    // ========================================================================

    /// Whether this host context can register pipelines at all.
    ///
    /// The run controller checks this before calling
    /// [`register_pipeline`](Self::register_pipeline).
    fn supports_registration(&self) -> bool {
        true
    }

    /// Makes `pipeline` the session's active pipeline.
    fn register_pipeline(&mut self, pipeline: PipelineHandle) -> HostResult<()>;

    /// Removes `pipeline` from the session and releases its engine resources.
    fn deregister_pipeline(&mut self, pipeline: PipelineHandle) -> HostResult<()>;

    // ========================================================================
    // Frame capture
    // ========================================================================

    /// Sets where frame captures are written and their base filename.
    fn configure_frame_capture(&mut self, output_dir: &Path, base_filename: &str) -> HostResult<()>;

    /// Requests a capture of the terminal output after each listed step.
    fn request_capture_at_steps(&mut self, pipeline: PipelineHandle, steps: &BTreeSet<u64>)
    -> HostResult<()>;

    /// Drops all pending capture requests.
    fn clear_capture_requests(&mut self);

    // ========================================================================
    // Execution
    // ========================================================================

    /// Executes one frame of the active pipeline. Blocks until done.
    fn advance_step(&mut self) -> HostResult<()>;

    /// Stops and restarts the logical clock; the frame counter returns to 0.
    fn reset_clock(&mut self);

    /// Clears the accumulation state of a stage.
    fn reset_stage_accumulation(&mut self, stage: StageHandle) -> HostResult<()>;

    // ========================================================================
    // Profiling
    // ========================================================================

    fn set_profiling_enabled(&mut self, enabled: bool);

    /// Opens the capture window.
    fn start_capture_window(&mut self) -> HostResult<()>;

    /// Closes the capture window and returns the aggregated statistics.
    fn end_capture_window(&mut self) -> HostResult<StatisticsRecord>;

    // ========================================================================
    // Scenes
    // ========================================================================

    fn load_scene(&mut self, scene: &str) -> HostResult<()>;

    fn unload_scene(&mut self) -> HostResult<()>;
}
