//! Run Controller
//!
//! [`RunController`] drives a single scenario through its lifecycle on the
//! host:
//!
//! ```text
//! Idle ──build──► Built ──warm_up──► Warmed ──measure──► Measuring ──complete──► Completed
//!   └──────────────┴───────────────────┴──────────────────────┴──► Failed
//! ```
//!
//! - **build**: the factory produces a descriptor (pure, so option errors
//!   surface before any host call), the clock and pending captures are reset,
//!   the descriptor is instantiated on the host and registered when the host
//!   supports it.
//! - **warm_up**: frame capture is pointed at the scenario directory, a
//!   capture is requested at every checkpoint and the pipeline runs until the
//!   last one.
//! - **measure**: the reset protocol (clock, capture requests, accumulation)
//!   runs to completion before profiling starts and the capture window opens,
//!   then the measured steps execute.
//! - **complete**: the window closes into a statistics record, profiling is
//!   disabled and the pipeline is released, whether or not it was
//!   registered.
//!
//! Calling a phase out of order fails with [`EvalError::InvalidTransition`]
//! and changes nothing. Any host failure moves the controller to
//! [`RunState::Failed`] after a best-effort teardown, and the original error
//! is returned.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut controller = RunController::new(&mut host, &factory, &settings);
//! let record = controller.run(&options, &scene_dir, "0")?;
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use bench_core::{EvalError, HostError, OptionSet, Result, StatisticsRecord};
use bench_graph::{BuiltPipeline, PipelineFactory};
use bench_host::{HostEngine, PipelineHandle, StageHandle};

use crate::settings::EvalSettings;

/// Lifecycle state of a [`RunController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Built,
    Warmed,
    Measuring,
    Completed,
    Failed,
}

impl RunState {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Built => "Built",
            Self::Warmed => "Warmed",
            Self::Measuring => "Measuring",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Host-side objects created for one descriptor.
#[derive(Debug)]
struct HostInstance {
    pipeline: PipelineHandle,
    stages: BTreeMap<String, StageHandle>,
    registered: bool,
}

/// An open profiling capture window. Closing consumes it.
#[derive(Debug)]
struct CaptureWindow(());

impl CaptureWindow {
    fn open<H: HostEngine + ?Sized>(host: &mut H) -> std::result::Result<Self, HostError> {
        host.start_capture_window()?;
        Ok(Self(()))
    }

    fn close<H: HostEngine + ?Sized>(self, host: &mut H) -> std::result::Result<StatisticsRecord, HostError> {
        host.end_capture_window()
    }
}

fn host_error(phase: &'static str) -> impl FnOnce(HostError) -> EvalError {
    move |source| EvalError::Execution { phase, source }
}

/// Drives one scenario through build, warmup, measurement and completion.
pub struct RunController<'a, H: HostEngine + ?Sized, F: PipelineFactory + ?Sized> {
    host: &'a mut H,
    factory: &'a F,
    settings: &'a EvalSettings,

    state: RunState,
    built: Option<BuiltPipeline>,
    instance: Option<HostInstance>,
    window: Option<CaptureWindow>,
    profiling: bool,
}

impl<'a, H: HostEngine + ?Sized, F: PipelineFactory + ?Sized> RunController<'a, H, F> {
    pub fn new(host: &'a mut H, factory: &'a F, settings: &'a EvalSettings) -> Self {
        Self {
            host,
            factory,
            settings,
            state: RunState::Idle,
            built: None,
            instance: None,
            window: None,
            profiling: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Whether the pipeline was registered with the host.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.instance.as_ref().is_some_and(|i| i.registered)
    }

    /// Runs every phase in order and returns the statistics record.
    pub fn run(
        &mut self,
        options: &OptionSet,
        output_dir: &Path,
        base_filename: &str,
    ) -> Result<StatisticsRecord> {
        self.build(options)?;
        self.warm_up(output_dir, base_filename)?;
        self.measure()?;
        self.complete()
    }

    // ========================================================================
    // Phases
    // ========================================================================

    /// `Idle → Built`
    pub fn build(&mut self, options: &OptionSet) -> Result<()> {
        self.expect(RunState::Idle, RunState::Built)?;
        let result = self.do_build(options);
        self.settle(result, RunState::Built)
    }

    /// `Built → Warmed`
    pub fn warm_up(&mut self, output_dir: &Path, base_filename: &str) -> Result<()> {
        self.expect(RunState::Built, RunState::Warmed)?;
        let result = self.do_warm_up(output_dir, base_filename);
        self.settle(result, RunState::Warmed)
    }

    /// `Warmed → Measuring`, ending after the last measured step.
    pub fn measure(&mut self) -> Result<()> {
        self.expect(RunState::Warmed, RunState::Measuring)?;
        let result = self.do_measure();
        self.settle(result, RunState::Measuring)
    }

    /// `Measuring → Completed`
    pub fn complete(&mut self) -> Result<StatisticsRecord> {
        self.expect(RunState::Measuring, RunState::Completed)?;
        match self.do_complete() {
            Ok(record) => {
                self.state = RunState::Completed;
                Ok(record)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    // ========================================================================
    // Phase bodies
    // ========================================================================

    fn do_build(&mut self, options: &OptionSet) -> Result<()> {
        let built = self.factory.build(options)?;
        let descriptor = &built.descriptor;

        // Every scenario starts at frame zero with no leftover capture requests.
        self.host.reset_clock();
        self.host.clear_capture_requests();

        let pipeline = self.host.create_pipeline(descriptor.name()).map_err(host_error("build"))?;
        // Recorded before the stages so a partial build is still released.
        let instance = self.instance.insert(HostInstance {
            pipeline,
            stages: BTreeMap::new(),
            registered: false,
        });

        for stage in descriptor.stages() {
            let handle = self
                .host
                .create_stage(stage.kind(), &stage.config().properties())
                .map_err(host_error("build"))?;
            self.host
                .add_stage(pipeline, handle, stage.name())
                .map_err(host_error("build"))?;
            instance.stages.insert(stage.name().to_owned(), handle);
        }
        for edge in descriptor.edges() {
            self.host
                .add_edge(pipeline, &edge.from, &edge.to)
                .map_err(host_error("build"))?;
        }
        let output = descriptor
            .terminal_output()
            .ok_or_else(|| EvalError::MissingTerminalOutput(descriptor.name().to_owned()))?;
        self.host
            .mark_terminal_output(pipeline, output)
            .map_err(host_error("build"))?;

        if self.host.supports_registration() {
            match self.host.register_pipeline(pipeline) {
                Ok(()) => instance.registered = true,
                Err(HostError::Unsupported(what)) => {
                    log::warn!("Pipeline registration unsupported by host ({what}); continuing unregistered");
                }
                Err(e) => return Err(EvalError::Execution { phase: "build", source: e }),
            }
        } else {
            log::info!("Host cannot register pipelines; skipping registration");
        }

        log::debug!(
            "Built pipeline '{}' ({} stages, {} edges)",
            descriptor.name(),
            descriptor.stages().len(),
            descriptor.edges().len()
        );
        self.built = Some(built);
        Ok(())
    }

    fn do_warm_up(&mut self, output_dir: &Path, base_filename: &str) -> Result<()> {
        let pipeline = self.pipeline()?;
        self.host
            .configure_frame_capture(output_dir, base_filename)
            .map_err(host_error("warmup"))?;

        let checkpoints: BTreeSet<u64> = self.settings.warmup_checkpoints.iter().copied().collect();
        if !checkpoints.is_empty() {
            self.host
                .request_capture_at_steps(pipeline, &checkpoints)
                .map_err(host_error("warmup"))?;
        }

        let steps = self.settings.warmup_steps();
        log::debug!("Warmup: {steps} steps, captures at {checkpoints:?}");
        self.advance("warmup", steps)
    }

    fn do_measure(&mut self) -> Result<()> {
        // Reset protocol; must finish before the window opens.
        self.host.reset_clock();
        self.host.clear_capture_requests();
        for handle in self.accumulating_handles() {
            self.host
                .reset_stage_accumulation(handle)
                .map_err(host_error("reset"))?;
        }

        self.host.set_profiling_enabled(true);
        self.profiling = true;
        self.window = Some(CaptureWindow::open(&mut *self.host).map_err(host_error("measure"))?);

        let steps = self.settings.measured_steps;
        log::debug!("Measuring {steps} steps");
        self.advance("measure", steps)
    }

    fn do_complete(&mut self) -> Result<StatisticsRecord> {
        let window = self
            .window
            .take()
            .ok_or(EvalError::InvalidTransition {
                from: RunState::Measuring.name(),
                to: RunState::Completed.name(),
            })?;
        let record = window.close(&mut *self.host).map_err(host_error("complete"))?;
        if record.get(&self.settings.metric).is_none() {
            return Err(EvalError::MissingMetric(self.settings.metric.clone()));
        }

        self.host.set_profiling_enabled(false);
        self.profiling = false;
        self.deregister().map_err(host_error("complete"))?;
        Ok(record)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn expect(&self, from: RunState, to: RunState) -> Result<()> {
        if self.state == from {
            Ok(())
        } else {
            Err(EvalError::InvalidTransition {
                from: self.state.name(),
                to: to.name(),
            })
        }
    }

    fn settle(&mut self, result: Result<()>, next: RunState) -> Result<()> {
        match result {
            Ok(()) => {
                self.state = next;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn pipeline(&self) -> Result<PipelineHandle> {
        self.instance
            .as_ref()
            .map(|i| i.pipeline)
            .ok_or(EvalError::Execution {
                phase: "warmup",
                source: HostError::NoActivePipeline,
            })
    }

    fn accumulating_handles(&self) -> Vec<StageHandle> {
        let (Some(built), Some(instance)) = (&self.built, &self.instance) else {
            return Vec::new();
        };
        built
            .descriptor
            .accumulating_stages()
            .filter_map(|id| built.descriptor.stage(id))
            .filter_map(|stage| instance.stages.get(stage.name()).copied())
            .collect()
    }

    fn advance(&mut self, phase: &'static str, steps: u64) -> Result<()> {
        for step in 1..=steps {
            self.host
                .advance_step()
                .map_err(|source| EvalError::StepFailed { phase, step, source })?;
        }
        Ok(())
    }

    /// Releases the host pipeline and its stages, registered or not. A host
    /// without deregistration support is tolerated.
    fn deregister(&mut self) -> std::result::Result<(), HostError> {
        let Some(instance) = self.instance.take() else {
            return Ok(());
        };
        match self.host.deregister_pipeline(instance.pipeline) {
            Ok(()) => Ok(()),
            Err(HostError::Unsupported(what)) => {
                log::warn!("Pipeline release unsupported by host ({what}); leaving it to the host");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Moves to `Failed` and releases what can be released. Teardown problems
    /// are logged; the original error is returned unchanged.
    fn fail(&mut self, error: EvalError) -> EvalError {
        log::debug!("Run failed in state {}: {error}", self.state.name());
        self.state = RunState::Failed;

        if let Some(window) = self.window.take() {
            if let Err(e) = window.close(&mut *self.host) {
                log::warn!("Teardown: closing capture window failed: {e}");
            }
        }
        if self.profiling {
            self.host.set_profiling_enabled(false);
            self.profiling = false;
        }
        if let Err(e) = self.deregister() {
            log::warn!("Teardown: deregistering pipeline failed: {e}");
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bench_graph::ComputePathTracerGraph;
    use bench_host::{HostCallKind, RecordingHost};

    fn short_settings() -> EvalSettings {
        EvalSettings {
            warmup_checkpoints: vec![1, 3],
            measured_steps: 4,
            ..EvalSettings::default()
        }
    }

    #[test]
    fn phases_advance_state() {
        let mut host = RecordingHost::new();
        let factory = ComputePathTracerGraph::evaluation();
        let settings = short_settings();
        let mut controller = RunController::new(&mut host, &factory, &settings);

        assert_eq!(controller.state(), RunState::Idle);
        controller.build(&OptionSet::new()).unwrap();
        assert_eq!(controller.state(), RunState::Built);
        assert!(controller.is_registered());
        controller.warm_up(Path::new("out"), "0").unwrap();
        assert_eq!(controller.state(), RunState::Warmed);
        controller.measure().unwrap();
        assert_eq!(controller.state(), RunState::Measuring);
        let record = controller.complete().unwrap();
        assert_eq!(controller.state(), RunState::Completed);
        assert!(controller.state().is_terminal());
        assert_eq!(record.get(&settings.metric).unwrap().sample_count, 4);

        assert_eq!(host.count(HostCallKind::AdvanceStep), 3 + 4);
    }

    #[test]
    fn out_of_order_phase_is_rejected_without_side_effects() {
        let mut host = RecordingHost::new();
        let factory = ComputePathTracerGraph::evaluation();
        let settings = short_settings();
        let mut controller = RunController::new(&mut host, &factory, &settings);

        let err = controller.measure().unwrap_err();
        assert!(matches!(
            err,
            EvalError::InvalidTransition { from: "Idle", to: "Measuring" }
        ));
        assert_eq!(controller.state(), RunState::Idle);
        assert!(matches!(controller.complete(), Err(EvalError::InvalidTransition { .. })));
        drop(controller);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn configuration_error_makes_no_host_calls() {
        let mut host = RecordingHost::new();
        let factory = ComputePathTracerGraph::evaluation();
        let settings = short_settings();
        let mut controller = RunController::new(&mut host, &factory, &settings);

        let err = controller
            .build(&OptionSet::new().with("notAnOption", 1))
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(controller.state(), RunState::Failed);
        drop(controller);
        assert!(host.calls().is_empty());
    }
}
