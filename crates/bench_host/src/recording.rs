//! Recording Host
//!
//! [`RecordingHost`] performs no work. It logs every [`HostEngine`] call as a
//! [`HostCall`] so tests can assert the exact call sequence, and it can be
//! scripted to fail the n-th occurrence of a call kind.
//!
//! Statistics are synthetic: every profiled step costs
//! [`step_cost_ms`](RecordingHost::with_step_cost) milliseconds, so the
//! returned record is exact and reproducible.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use bench_core::{HostError, HostResult, MetricStats, OptionSet, StatisticsRecord};
use bench_graph::{ChannelRef, StageKind};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::{FRAME_TIME_METRIC, HostEngine, PipelineHandle, StageHandle};

/// One recorded host call, with handles resolved to names.
#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    CreateStage { kind: StageKind, options: OptionSet },
    CreatePipeline(String),
    AddStage(String),
    AddEdge { from: ChannelRef, to: ChannelRef },
    MarkTerminalOutput(ChannelRef),
    RegisterPipeline(String),
    DeregisterPipeline(String),
    ConfigureFrameCapture { output_dir: PathBuf, base_filename: String },
    RequestCaptureAtSteps(BTreeSet<u64>),
    ClearCaptureRequests,
    AdvanceStep,
    ResetClock,
    ResetStageAccumulation(String),
    SetProfilingEnabled(bool),
    StartCaptureWindow,
    EndCaptureWindow,
    LoadScene(String),
    UnloadScene,
}

/// Discriminant of a [`HostCall`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostCallKind {
    CreateStage,
    CreatePipeline,
    AddStage,
    AddEdge,
    MarkTerminalOutput,
    RegisterPipeline,
    DeregisterPipeline,
    ConfigureFrameCapture,
    RequestCaptureAtSteps,
    ClearCaptureRequests,
    AdvanceStep,
    ResetClock,
    ResetStageAccumulation,
    SetProfilingEnabled,
    StartCaptureWindow,
    EndCaptureWindow,
    LoadScene,
    UnloadScene,
}

impl HostCall {
    #[must_use]
    pub fn kind(&self) -> HostCallKind {
        match self {
            Self::CreateStage { .. } => HostCallKind::CreateStage,
            Self::CreatePipeline(_) => HostCallKind::CreatePipeline,
            Self::AddStage(_) => HostCallKind::AddStage,
            Self::AddEdge { .. } => HostCallKind::AddEdge,
            Self::MarkTerminalOutput(_) => HostCallKind::MarkTerminalOutput,
            Self::RegisterPipeline(_) => HostCallKind::RegisterPipeline,
            Self::DeregisterPipeline(_) => HostCallKind::DeregisterPipeline,
            Self::ConfigureFrameCapture { .. } => HostCallKind::ConfigureFrameCapture,
            Self::RequestCaptureAtSteps(_) => HostCallKind::RequestCaptureAtSteps,
            Self::ClearCaptureRequests => HostCallKind::ClearCaptureRequests,
            Self::AdvanceStep => HostCallKind::AdvanceStep,
            Self::ResetClock => HostCallKind::ResetClock,
            Self::ResetStageAccumulation(_) => HostCallKind::ResetStageAccumulation,
            Self::SetProfilingEnabled(_) => HostCallKind::SetProfilingEnabled,
            Self::StartCaptureWindow => HostCallKind::StartCaptureWindow,
            Self::EndCaptureWindow => HostCallKind::EndCaptureWindow,
            Self::LoadScene(_) => HostCallKind::LoadScene,
            Self::UnloadScene => HostCallKind::UnloadScene,
        }
    }
}

impl HostCallKind {
    /// Whether the host call can report an error at all.
    #[must_use]
    pub fn is_fallible(self) -> bool {
        !matches!(
            self,
            Self::ClearCaptureRequests | Self::ResetClock | Self::SetProfilingEnabled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Injected {
    Failed,
    Unsupported,
}

#[derive(Debug, Clone, Copy)]
struct FailureRule {
    kind: HostCallKind,
    /// 1-based occurrence that fails.
    nth: usize,
    error: Injected,
}

/// Scripted host that records calls.
#[derive(Debug)]
pub struct RecordingHost {
    calls: Vec<HostCall>,
    counts: FxHashMap<HostCallKind, usize>,
    rules: Vec<FailureRule>,

    registration: bool,
    report_metrics: bool,
    step_cost_ms: f64,

    stages: SlotMap<StageHandle, Option<String>>,
    pipelines: SlotMap<PipelineHandle, String>,
    registered: Option<PipelineHandle>,
    profiling: bool,
    window_steps: Option<u64>,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHost {
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: Vec::new(),
            counts: FxHashMap::default(),
            rules: Vec::new(),
            registration: true,
            report_metrics: true,
            step_cost_ms: 1.0,
            stages: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            registered: None,
            profiling: false,
            window_steps: None,
        }
    }

    /// Host context that cannot register pipelines.
    #[must_use]
    pub fn without_registration(mut self) -> Self {
        self.registration = false;
        self
    }

    /// Closed capture windows return an empty record.
    #[must_use]
    pub fn without_metrics(mut self) -> Self {
        self.report_metrics = false;
        self
    }

    #[must_use]
    pub fn with_step_cost(mut self, ms: f64) -> Self {
        self.step_cost_ms = ms;
        self
    }

    /// Fails the `nth` (1-based) call of `kind` with [`HostError::Failed`].
    ///
    /// # Panics
    ///
    /// If `kind` cannot fail (see [`HostCallKind::is_fallible`]).
    #[must_use]
    pub fn fail_at(mut self, kind: HostCallKind, nth: usize) -> Self {
        assert!(kind.is_fallible(), "{kind:?} cannot fail");
        self.rules.push(FailureRule {
            kind,
            nth,
            error: Injected::Failed,
        });
        self
    }

    /// Answers the `nth` call of `kind` with [`HostError::Unsupported`].
    ///
    /// # Panics
    ///
    /// If `kind` cannot fail.
    #[must_use]
    pub fn unsupported_at(mut self, kind: HostCallKind, nth: usize) -> Self {
        assert!(kind.is_fallible(), "{kind:?} cannot fail");
        self.rules.push(FailureRule {
            kind,
            nth,
            error: Injected::Unsupported,
        });
        self
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[must_use]
    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<HostCall> {
        std::mem::take(&mut self.calls)
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<HostCallKind> {
        self.calls.iter().map(HostCall::kind).collect()
    }

    /// Number of recorded calls of `kind`.
    #[must_use]
    pub fn count(&self, kind: HostCallKind) -> usize {
        self.calls.iter().filter(|c| c.kind() == kind).count()
    }

    /// Index of the first recorded call of `kind`.
    #[must_use]
    pub fn position(&self, kind: HostCallKind) -> Option<usize> {
        self.calls.iter().position(|c| c.kind() == kind)
    }

    /// Index of the last recorded call of `kind`.
    #[must_use]
    pub fn last_position(&self, kind: HostCallKind) -> Option<usize> {
        self.calls.iter().rposition(|c| c.kind() == kind)
    }

    /// Name of the currently registered pipeline.
    #[must_use]
    pub fn registered_pipeline(&self) -> Option<&str> {
        self.registered
            .and_then(|h| self.pipelines.get(h))
            .map(String::as_str)
    }

    #[must_use]
    pub fn profiling_enabled(&self) -> bool {
        self.profiling
    }

    /// Appends `call` and returns its 1-based occurrence.
    fn push(&mut self, call: HostCall) -> usize {
        let kind = call.kind();
        log::trace!("host call: {call:?}");
        self.calls.push(call);

        let count = self.counts.entry(kind).or_insert(0);
        *count += 1;
        *count
    }

    fn record(&mut self, call: HostCall) -> HostResult<()> {
        let kind = call.kind();
        let nth = self.push(call);

        match self.rules.iter().find(|r| r.kind == kind && r.nth == nth) {
            Some(rule) if rule.error == Injected::Unsupported => {
                Err(HostError::Unsupported("scripted"))
            }
            Some(_) => Err(HostError::Failed(format!("injected failure at {kind:?} #{nth}"))),
            None => Ok(()),
        }
    }

    fn pipeline_name(&self, pipeline: PipelineHandle) -> HostResult<String> {
        self.pipelines
            .get(pipeline)
            .cloned()
            .ok_or(HostError::InvalidHandle("pipeline"))
    }
}

impl HostEngine for RecordingHost {
    fn create_stage(&mut self, kind: StageKind, options: &OptionSet) -> HostResult<StageHandle> {
        self.record(HostCall::CreateStage {
            kind,
            options: options.clone(),
        })?;
        Ok(self.stages.insert(None))
    }

    fn create_pipeline(&mut self, name: &str) -> HostResult<PipelineHandle> {
        self.record(HostCall::CreatePipeline(name.to_owned()))?;
        Ok(self.pipelines.insert(name.to_owned()))
    }

    fn add_stage(&mut self, pipeline: PipelineHandle, stage: StageHandle, name: &str) -> HostResult<()> {
        self.record(HostCall::AddStage(name.to_owned()))?;
        if !self.pipelines.contains_key(pipeline) {
            return Err(HostError::InvalidHandle("pipeline"));
        }
        let slot = self
            .stages
            .get_mut(stage)
            .ok_or(HostError::InvalidHandle("stage"))?;
        *slot = Some(name.to_owned());
        Ok(())
    }

    fn add_edge(&mut self, _pipeline: PipelineHandle, from: &ChannelRef, to: &ChannelRef) -> HostResult<()> {
        self.record(HostCall::AddEdge {
            from: from.clone(),
            to: to.clone(),
        })
    }

    fn mark_terminal_output(&mut self, _pipeline: PipelineHandle, output: &ChannelRef) -> HostResult<()> {
        self.record(HostCall::MarkTerminalOutput(output.clone()))
    }

    fn supports_registration(&self) -> bool {
        self.registration
    }

    fn register_pipeline(&mut self, pipeline: PipelineHandle) -> HostResult<()> {
        let name = self.pipeline_name(pipeline)?;
        self.record(HostCall::RegisterPipeline(name.clone()))?;
        if !self.registration {
            return Err(HostError::Unsupported("register_pipeline"));
        }
        match self.registered {
            Some(current) if current != pipeline => Err(HostError::PipelineSlotOccupied(
                self.pipelines[current].clone(),
            )),
            _ => {
                self.registered = Some(pipeline);
                Ok(())
            }
        }
    }

    fn deregister_pipeline(&mut self, pipeline: PipelineHandle) -> HostResult<()> {
        let name = self.pipeline_name(pipeline)?;
        self.record(HostCall::DeregisterPipeline(name))?;
        if self.registered == Some(pipeline) {
            self.registered = None;
        }
        Ok(())
    }

    fn configure_frame_capture(&mut self, output_dir: &Path, base_filename: &str) -> HostResult<()> {
        self.record(HostCall::ConfigureFrameCapture {
            output_dir: output_dir.to_path_buf(),
            base_filename: base_filename.to_owned(),
        })
    }

    fn request_capture_at_steps(&mut self, _pipeline: PipelineHandle, steps: &BTreeSet<u64>) -> HostResult<()> {
        self.record(HostCall::RequestCaptureAtSteps(steps.clone()))
    }

    fn clear_capture_requests(&mut self) {
        self.push(HostCall::ClearCaptureRequests);
    }

    fn advance_step(&mut self) -> HostResult<()> {
        self.record(HostCall::AdvanceStep)?;
        if self.profiling {
            if let Some(steps) = self.window_steps.as_mut() {
                *steps += 1;
            }
        }
        Ok(())
    }

    fn reset_clock(&mut self) {
        self.push(HostCall::ResetClock);
    }

    fn reset_stage_accumulation(&mut self, stage: StageHandle) -> HostResult<()> {
        let name = self
            .stages
            .get(stage)
            .cloned()
            .flatten()
            .ok_or(HostError::InvalidHandle("stage"))?;
        self.record(HostCall::ResetStageAccumulation(name))
    }

    fn set_profiling_enabled(&mut self, enabled: bool) {
        self.push(HostCall::SetProfilingEnabled(enabled));
        self.profiling = enabled;
    }

    fn start_capture_window(&mut self) -> HostResult<()> {
        self.record(HostCall::StartCaptureWindow)?;
        if self.window_steps.is_some() {
            return Err(HostError::CaptureWindowState("already open"));
        }
        self.window_steps = Some(0);
        Ok(())
    }

    fn end_capture_window(&mut self) -> HostResult<StatisticsRecord> {
        self.record(HostCall::EndCaptureWindow)?;
        let steps = self
            .window_steps
            .take()
            .ok_or(HostError::CaptureWindowState("not open"))?;

        let mut record = StatisticsRecord::new();
        if self.report_metrics && steps > 0 {
            record.insert(
                FRAME_TIME_METRIC,
                MetricStats {
                    mean: self.step_cost_ms,
                    std_dev: 0.0,
                    min: self.step_cost_ms,
                    max: self.step_cost_ms,
                    sample_count: steps,
                },
            );
        }
        Ok(record)
    }

    fn load_scene(&mut self, scene: &str) -> HostResult<()> {
        self.record(HostCall::LoadScene(scene.to_owned()))
    }

    fn unload_scene(&mut self) -> HostResult<()> {
        self.record(HostCall::UnloadScene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_calls_in_order() {
        let mut host = RecordingHost::new();
        host.load_scene("cornell_box").unwrap();
        host.reset_clock();
        host.advance_step().unwrap();
        host.unload_scene().unwrap();

        assert_eq!(
            host.kinds(),
            vec![
                HostCallKind::LoadScene,
                HostCallKind::ResetClock,
                HostCallKind::AdvanceStep,
                HostCallKind::UnloadScene,
            ]
        );
        assert_eq!(host.calls()[0], HostCall::LoadScene("cornell_box".to_owned()));
        assert_eq!(host.take_calls().len(), 4);
        assert!(host.calls().is_empty());
    }

    #[test]
    fn injected_failure_hits_nth_occurrence() {
        let mut host = RecordingHost::new().fail_at(HostCallKind::AdvanceStep, 3);
        host.advance_step().unwrap();
        host.advance_step().unwrap();
        assert!(matches!(host.advance_step(), Err(HostError::Failed(_))));
        host.advance_step().unwrap();
    }

    #[test]
    #[should_panic(expected = "ResetClock cannot fail")]
    fn infallible_calls_reject_failure_rules() {
        let _ = RecordingHost::new().fail_at(HostCallKind::ResetClock, 1);
    }

    #[test]
    fn window_statistics_count_profiled_steps() {
        let mut host = RecordingHost::new().with_step_cost(2.5);
        host.start_capture_window().unwrap();
        host.advance_step().unwrap();
        host.set_profiling_enabled(true);
        host.advance_step().unwrap();
        host.advance_step().unwrap();

        let record = host.end_capture_window().unwrap();
        let stats = record.get(FRAME_TIME_METRIC).unwrap();
        assert_eq!(stats.sample_count, 2);
        assert!((stats.mean - 2.5).abs() < f64::EPSILON);

        assert!(matches!(
            host.end_capture_window(),
            Err(HostError::CaptureWindowState(_))
        ));
    }

    #[test]
    fn registration_without_capability_is_unsupported() {
        let mut host = RecordingHost::new().without_registration();
        let pipeline = host.create_pipeline("p").unwrap();
        assert!(!host.supports_registration());
        assert!(matches!(
            host.register_pipeline(pipeline),
            Err(HostError::Unsupported(_))
        ));
        assert!(host.registered_pipeline().is_none());
    }
}
