//! Simulated Host
//!
//! [`SimulatedHost`] is a headless, in-process [`HostEngine`]. It is not a
//! renderer: each stage runs a small deterministic CPU workload (see
//! [`workload`]) so that option changes have a measurable cost, and the rest
//! of the host contract is implemented faithfully:
//!
//! - pipelines are assembled from stages/edges and executed in topological order
//! - at most one pipeline is active; registering a second one fails
//! - a logical clock drives time-dependent stage behaviour
//! - accumulation stages keep state across steps until reset
//! - capture requests write one text artifact per requested step
//! - an open capture window profiles the wall-clock time of every step
//!
//! # Example
//!
//! ```rust,ignore
//! let mut host = SimulatedHost::new(SimulatedHostSettings::default());
//! host.load_scene("cornell_box")?;
//! ```

pub mod workload;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bench_core::{HostError, HostResult, OptionSet, SampleAccumulator, StatisticsRecord};
use bench_graph::{ChannelRef, PipelineDescriptor, StageConfig, StageKind};
use rustc_hash::{FxHashMap, FxHasher};
use slotmap::SlotMap;

use crate::clock::LogicalClock;
use crate::{FRAME_TIME_METRIC, HostEngine, PipelineHandle, StageHandle, stage_time_metric};
use workload::{SceneParams, StageState, StepContext};

/// Configuration of a [`SimulatedHost`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedHostSettings {
    /// Default image size when a stage does not set `outputSize`.
    pub resolution: [u32; 2],
    /// Logical frames per second of the clock.
    pub framerate: u32,
    /// Whether pipelines can be registered. When `false` the most recently
    /// created pipeline is executed implicitly.
    pub registration: bool,
}

impl Default for SimulatedHostSettings {
    fn default() -> Self {
        Self {
            resolution: [32, 32],
            framerate: 60,
            registration: true,
        }
    }
}

struct HostStage {
    config: StageConfig,
    state: StageState,
}

struct HostPipeline {
    descriptor: PipelineDescriptor,
    handles: FxHashMap<String, StageHandle>,
    capture_steps: BTreeSet<u64>,
}

#[derive(Default)]
struct CaptureWindow {
    frame: SampleAccumulator,
    per_stage: BTreeMap<String, SampleAccumulator>,
}

/// Headless host executing pipelines on the CPU.
pub struct SimulatedHost {
    settings: SimulatedHostSettings,
    stages: SlotMap<StageHandle, HostStage>,
    pipelines: SlotMap<PipelineHandle, HostPipeline>,
    active: Option<PipelineHandle>,
    scene: Option<(String, SceneParams)>,
    clock: LogicalClock,
    capture_dir: Option<PathBuf>,
    base_filename: String,
    profiling: bool,
    window: Option<CaptureWindow>,
    written_captures: Vec<PathBuf>,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new(SimulatedHostSettings::default())
    }
}

impl SimulatedHost {
    #[must_use]
    pub fn new(settings: SimulatedHostSettings) -> Self {
        Self {
            clock: LogicalClock::new(settings.framerate),
            settings,
            stages: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            active: None,
            scene: None,
            capture_dir: None,
            base_filename: String::new(),
            profiling: false,
            window: None,
            written_captures: Vec::new(),
        }
    }

    /// Frames executed since the clock was last reset.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.clock.frame
    }

    #[must_use]
    pub fn scene(&self) -> Option<&str> {
        self.scene.as_ref().map(|(name, _)| name.as_str())
    }

    /// Name of the active pipeline, if any.
    #[must_use]
    pub fn active_pipeline(&self) -> Option<&str> {
        self.active
            .and_then(|h| self.pipelines.get(h))
            .map(|p| p.descriptor.name())
    }

    /// Number of live stage and pipeline objects.
    #[must_use]
    pub fn live_objects(&self) -> (usize, usize) {
        (self.stages.len(), self.pipelines.len())
    }

    /// Accumulated frame count of the stage named `name` in the active pipeline.
    #[must_use]
    pub fn accumulated_frames(&self, name: &str) -> Option<u32> {
        let pipeline = self.pipelines.get(self.active?)?;
        let handle = pipeline.handles.get(name)?;
        self.stages.get(*handle).map(|s| s.state.accumulated_frames)
    }

    #[must_use]
    pub fn profiling_enabled(&self) -> bool {
        self.profiling
    }

    /// Frame capture files written so far, in order.
    #[must_use]
    pub fn written_captures(&self) -> &[PathBuf] {
        &self.written_captures
    }

    fn pipeline_mut(&mut self, handle: PipelineHandle) -> HostResult<&mut HostPipeline> {
        self.pipelines
            .get_mut(handle)
            .ok_or(HostError::InvalidHandle("pipeline"))
    }

    fn resolution_of(&self, config: &StageConfig) -> [u32; 2] {
        match config {
            StageConfig::VBufferRT(o) => o.output_size,
            StageConfig::ImageLoader(o) => o.output_size,
            _ => None,
        }
        .unwrap_or(self.settings.resolution)
    }

    /// Releases a pipeline and the stages it owns.
    fn release(&mut self, handle: PipelineHandle) {
        if let Some(pipeline) = self.pipelines.remove(handle) {
            for stage in pipeline.handles.values() {
                self.stages.remove(*stage);
            }
        }
        if self.active == Some(handle) {
            self.active = None;
        }
    }

    fn write_capture(
        &mut self,
        pipeline: &str,
        output: &ChannelRef,
        frame: u64,
        pixels: &[f32],
    ) -> HostResult<()> {
        let Some(dir) = &self.capture_dir else {
            log::warn!("Frame {frame} capture requested but no capture directory is configured");
            return Ok(());
        };
        let path = dir.join(format!(
            "{}.{}.{}.{}.{}.txt",
            self.base_filename, pipeline, output.stage, output.channel, frame
        ));

        let (min, max, sum) = pixels.iter().fold(
            (f32::INFINITY, f32::NEG_INFINITY, 0.0f64),
            |(lo, hi, sum), &v| (lo.min(v), hi.max(v), sum + f64::from(v)),
        );
        let mean = if pixels.is_empty() {
            0.0
        } else {
            sum / pixels.len() as f64
        };
        let contents = format!(
            "pipeline: {pipeline}\noutput: {output}\nframe: {frame}\npixels: {}\nmean: {mean}\nmin: {min}\nmax: {max}\n",
            pixels.len()
        );
        fs::write(&path, contents)?;
        log::debug!("Wrote frame capture {}", path.display());
        self.written_captures.push(path);
        Ok(())
    }
}

impl HostEngine for SimulatedHost {
    fn create_stage(&mut self, kind: StageKind, options: &OptionSet) -> HostResult<StageHandle> {
        let config = StageConfig::from_options(kind, options)
            .map_err(|e| HostError::Failed(e.to_string()))?;
        Ok(self.stages.insert(HostStage {
            config,
            state: StageState::default(),
        }))
    }

    fn create_pipeline(&mut self, name: &str) -> HostResult<PipelineHandle> {
        let handle = self.pipelines.insert(HostPipeline {
            descriptor: PipelineDescriptor::new(name),
            handles: FxHashMap::default(),
            capture_steps: BTreeSet::new(),
        });
        if !self.settings.registration {
            // Without registration the newest pipeline is the active one.
            if let Some(previous) = self.active.replace(handle) {
                self.release(previous);
            }
        }
        Ok(handle)
    }

    fn add_stage(
        &mut self,
        pipeline: PipelineHandle,
        stage: StageHandle,
        name: &str,
    ) -> HostResult<()> {
        let config = self
            .stages
            .get(stage)
            .ok_or(HostError::InvalidHandle("stage"))?
            .config
            .clone();
        let p = self.pipeline_mut(pipeline)?;
        p.descriptor
            .add_stage(name, config)
            .map_err(|e| HostError::Failed(e.to_string()))?;
        p.handles.insert(name.to_owned(), stage);
        Ok(())
    }

    fn add_edge(
        &mut self,
        pipeline: PipelineHandle,
        from: &ChannelRef,
        to: &ChannelRef,
    ) -> HostResult<()> {
        self.pipeline_mut(pipeline)?
            .descriptor
            .connect(from.clone(), to.clone())
            .map_err(|e| HostError::Failed(e.to_string()))
    }

    fn mark_terminal_output(
        &mut self,
        pipeline: PipelineHandle,
        output: &ChannelRef,
    ) -> HostResult<()> {
        self.pipeline_mut(pipeline)?
            .descriptor
            .mark_output(&output.to_string())
            .map_err(|_| HostError::UnknownChannel(output.to_string()))
    }

    fn supports_registration(&self) -> bool {
        self.settings.registration
    }

    fn register_pipeline(&mut self, pipeline: PipelineHandle) -> HostResult<()> {
        if !self.settings.registration {
            return Err(HostError::Unsupported("register_pipeline"));
        }
        if !self.pipelines.contains_key(pipeline) {
            return Err(HostError::InvalidHandle("pipeline"));
        }
        match self.active {
            Some(current) if current == pipeline => Ok(()),
            Some(current) => Err(HostError::PipelineSlotOccupied(
                self.pipelines[current].descriptor.name().to_owned(),
            )),
            None => {
                self.active = Some(pipeline);
                Ok(())
            }
        }
    }

    fn deregister_pipeline(&mut self, pipeline: PipelineHandle) -> HostResult<()> {
        if !self.pipelines.contains_key(pipeline) {
            return Err(HostError::InvalidHandle("pipeline"));
        }
        self.release(pipeline);
        Ok(())
    }

    fn configure_frame_capture(&mut self, output_dir: &Path, base_filename: &str) -> HostResult<()> {
        self.capture_dir = Some(output_dir.to_path_buf());
        base_filename.clone_into(&mut self.base_filename);
        Ok(())
    }

    fn request_capture_at_steps(
        &mut self,
        pipeline: PipelineHandle,
        steps: &BTreeSet<u64>,
    ) -> HostResult<()> {
        self.pipeline_mut(pipeline)?
            .capture_steps
            .extend(steps.iter().copied());
        Ok(())
    }

    fn clear_capture_requests(&mut self) {
        for pipeline in self.pipelines.values_mut() {
            pipeline.capture_steps.clear();
        }
    }

    fn advance_step(&mut self) -> HostResult<()> {
        let scene = self.scene.as_ref().ok_or(HostError::NoSceneLoaded)?.1;
        let handle = self.active.ok_or(HostError::NoActivePipeline)?;
        let frame = self.clock.tick();
        let time = self.clock.time;
        let profiling = self.profiling && self.window.is_some();
        let step_start = Instant::now();

        let pipeline = self
            .pipelines
            .get(handle)
            .ok_or(HostError::InvalidHandle("pipeline"))?;
        let descriptor = &pipeline.descriptor;
        let order = descriptor
            .execution_order()
            .map_err(|e| HostError::Failed(e.to_string()))?;

        let mut outputs: FxHashMap<ChannelRef, Vec<f32>> = FxHashMap::default();
        let mut stage_times: Vec<(String, f64)> = Vec::new();

        for id in order {
            let Some(stage) = descriptor.stage(id) else {
                return Err(HostError::InvalidHandle("stage"));
            };
            let stage_handle = *pipeline
                .handles
                .get(stage.name())
                .ok_or(HostError::InvalidHandle("stage"))?;
            let [width, height] = self.resolution_of(stage.config());

            let stage_start = Instant::now();
            let produced = {
                let inputs = descriptor
                    .inputs_of(id)
                    .filter_map(|edge| {
                        outputs
                            .get(&edge.from)
                            .map(|data| (edge.to.channel.as_str(), data.as_slice()))
                    })
                    .collect();
                let ctx = StepContext {
                    width,
                    height,
                    frame,
                    time,
                    scene,
                    inputs,
                };
                let host_stage = self
                    .stages
                    .get_mut(stage_handle)
                    .ok_or(HostError::InvalidHandle("stage"))?;
                workload::run_stage(&host_stage.config, &mut host_stage.state, &ctx)
            };
            if profiling {
                stage_times.push((
                    stage.name().to_owned(),
                    stage_start.elapsed().as_secs_f64() * 1000.0,
                ));
            }
            for (channel, data) in produced {
                outputs.insert(ChannelRef::new(stage.name(), channel), data);
            }
        }

        let capture = if pipeline.capture_steps.contains(&frame) {
            descriptor.terminal_output().cloned().map(|output| {
                let pixels = outputs.remove(&output).unwrap_or_default();
                (descriptor.name().to_owned(), output, pixels)
            })
        } else {
            None
        };

        if let Some(window) = self.window.as_mut().filter(|_| profiling) {
            window.frame.push(step_start.elapsed().as_secs_f64() * 1000.0);
            for (name, ms) in stage_times {
                window.per_stage.entry(name).or_default().push(ms);
            }
        }

        if let Some((pipeline_name, output, pixels)) = capture {
            self.write_capture(&pipeline_name, &output, frame, &pixels)?;
        }
        Ok(())
    }

    fn reset_clock(&mut self) {
        self.clock.stop();
        self.clock.play();
    }

    fn reset_stage_accumulation(&mut self, stage: StageHandle) -> HostResult<()> {
        self.stages
            .get_mut(stage)
            .ok_or(HostError::InvalidHandle("stage"))?
            .state
            .reset();
        Ok(())
    }

    fn set_profiling_enabled(&mut self, enabled: bool) {
        self.profiling = enabled;
    }

    fn start_capture_window(&mut self) -> HostResult<()> {
        if self.window.is_some() {
            return Err(HostError::CaptureWindowState("already open"));
        }
        self.window = Some(CaptureWindow::default());
        Ok(())
    }

    fn end_capture_window(&mut self) -> HostResult<StatisticsRecord> {
        let window = self
            .window
            .take()
            .ok_or(HostError::CaptureWindowState("not open"))?;

        let mut record = StatisticsRecord::new();
        if let Some(stats) = window.frame.finish() {
            record.insert(FRAME_TIME_METRIC, stats);
        }
        for (stage, acc) in &window.per_stage {
            if let Some(stats) = acc.finish() {
                record.insert(stage_time_metric(stage), stats);
            }
        }
        Ok(record)
    }

    fn load_scene(&mut self, scene: &str) -> HostResult<()> {
        let mut hasher = FxHasher::default();
        hasher.write(scene.as_bytes());
        let params = SceneParams::from_seed(hasher.finish());
        if let Some((previous, _)) = self.scene.replace((scene.to_owned(), params)) {
            log::debug!("Scene '{previous}' replaced by '{scene}'");
        }
        Ok(())
    }

    fn unload_scene(&mut self) -> HostResult<()> {
        self.scene.take().map(|_| ()).ok_or(HostError::NoSceneLoaded)
    }
}
