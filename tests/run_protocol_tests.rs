//! Run Protocol Integration Tests
//!
//! Tests for:
//! - Host call ordering of one scenario with the default protocol
//! - Reset protocol completing before profiling starts
//! - Registration capability check and local recovery
//! - Failure propagation and best-effort teardown

use std::collections::BTreeSet;
use std::path::Path;

use bench_core::{EvalError, HostError, OptionSet};
use bench_host::{HostCall, HostCallKind, RecordingHost};
use graph_bench::{ComputePathTracerGraph, EvalSettings, RunController, RunState};

fn run_default(host: &mut RecordingHost) -> Result<(), EvalError> {
    let factory = ComputePathTracerGraph::evaluation();
    let settings = EvalSettings::default();
    let mut controller = RunController::new(host, &factory, &settings);
    let result = controller.run(&OptionSet::new().with("useNEE", true), Path::new("out"), "0");
    result.map(|_| ())
}

fn kinds_between(host: &RecordingHost, from: usize, to: usize) -> Vec<HostCallKind> {
    host.kinds()[from..to].to_vec()
}

// ============================================================================
// Call Ordering
// ============================================================================

#[test]
fn default_protocol_call_sequence() {
    let mut host = RecordingHost::new();
    run_default(&mut host).unwrap();
    let kinds = host.kinds();

    // Scenario start
    assert_eq!(kinds[0], HostCallKind::ResetClock);
    assert_eq!(kinds[1], HostCallKind::ClearCaptureRequests);
    assert_eq!(kinds[2], HostCallKind::CreatePipeline);
    assert_eq!(host.count(HostCallKind::CreateStage), 5);
    assert_eq!(host.count(HostCallKind::AddStage), 5);
    assert_eq!(host.count(HostCallKind::AddEdge), 5);

    let register = host.position(HostCallKind::RegisterPipeline).unwrap();
    let configure = host.position(HostCallKind::ConfigureFrameCapture).unwrap();
    let request = host.position(HostCallKind::RequestCaptureAtSteps).unwrap();
    let first_step = host.position(HostCallKind::AdvanceStep).unwrap();
    assert!(host.position(HostCallKind::MarkTerminalOutput).unwrap() < register);
    assert!(register < configure && configure < request && request < first_step);

    assert_eq!(
        host.calls()[request],
        HostCall::RequestCaptureAtSteps(BTreeSet::from([1, 2, 3, 4, 256]))
    );

    // 256 warmup steps, then the reset protocol
    let warmup_end = first_step + 256;
    assert!(kinds_between(&host, first_step, warmup_end)
        .iter()
        .all(|k| *k == HostCallKind::AdvanceStep));
    assert_eq!(
        kinds_between(&host, warmup_end, warmup_end + 5),
        vec![
            HostCallKind::ResetClock,
            HostCallKind::ClearCaptureRequests,
            HostCallKind::ResetStageAccumulation,
            HostCallKind::SetProfilingEnabled,
            HostCallKind::StartCaptureWindow,
        ]
    );
    assert_eq!(
        host.calls()[warmup_end + 2],
        HostCall::ResetStageAccumulation("AccumulatePass".to_owned())
    );
    assert_eq!(host.calls()[warmup_end + 3], HostCall::SetProfilingEnabled(true));

    // 512 measured steps, then completion
    let measure_start = warmup_end + 5;
    let measure_end = measure_start + 512;
    assert!(kinds_between(&host, measure_start, measure_end)
        .iter()
        .all(|k| *k == HostCallKind::AdvanceStep));
    assert_eq!(
        host.calls()[measure_end..].to_vec(),
        vec![
            HostCall::EndCaptureWindow,
            HostCall::SetProfilingEnabled(false),
            HostCall::DeregisterPipeline("ComputePathTracer".to_owned()),
        ]
    );
    assert_eq!(host.count(HostCallKind::AdvanceStep), 256 + 512);
}

#[test]
fn only_stage_under_test_receives_the_option_set() {
    let mut host = RecordingHost::new();
    run_default(&mut host).unwrap();

    let created: Vec<_> = host
        .calls()
        .iter()
        .filter_map(|c| match c {
            HostCall::CreateStage { kind, options } => Some((kind.type_name(), options.clone())),
            _ => None,
        })
        .collect();
    for (kind, options) in &created {
        let has_nee = options.get("useNEE").and_then(|v| v.as_bool());
        if *kind == "ComputePathTracer" {
            assert_eq!(has_nee, Some(true));
        } else {
            assert_eq!(has_nee, None, "{kind} must keep its baseline");
        }
    }
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn registration_skipped_without_capability() {
    let mut host = RecordingHost::new().without_registration();
    run_default(&mut host).unwrap();
    assert_eq!(host.count(HostCallKind::RegisterPipeline), 0);
    assert_eq!(host.count(HostCallKind::EndCaptureWindow), 1);
    // The unregistered pipeline is still released.
    assert_eq!(
        host.calls().last(),
        Some(&HostCall::DeregisterPipeline("ComputePathTracer".to_owned()))
    );
}

#[test]
fn unsupported_registration_is_recovered() {
    let mut host = RecordingHost::new().unsupported_at(HostCallKind::RegisterPipeline, 1);
    run_default(&mut host).unwrap();
    assert_eq!(host.count(HostCallKind::RegisterPipeline), 1);
    assert_eq!(host.count(HostCallKind::DeregisterPipeline), 1);
    assert!(host.registered_pipeline().is_none());
}

#[test]
fn other_registration_failures_abort() {
    let mut host = RecordingHost::new().fail_at(HostCallKind::RegisterPipeline, 1);
    let err = run_default(&mut host).unwrap_err();
    assert!(matches!(
        err,
        EvalError::Execution { phase: "build", source: HostError::Failed(_) }
    ));
    assert_eq!(host.count(HostCallKind::AdvanceStep), 0);
    assert_eq!(host.count(HostCallKind::DeregisterPipeline), 1);
}

#[test]
fn unsupported_release_is_tolerated() {
    let mut host = RecordingHost::new().unsupported_at(HostCallKind::DeregisterPipeline, 1);
    run_default(&mut host).unwrap();
    assert_eq!(host.count(HostCallKind::DeregisterPipeline), 1);
}

// ============================================================================
// Failures & Teardown
// ============================================================================

#[test]
fn failing_measured_step_tears_down() {
    let mut host = RecordingHost::new().fail_at(HostCallKind::AdvanceStep, 256 + 3);
    let factory = ComputePathTracerGraph::evaluation();
    let settings = EvalSettings::default();
    let mut controller = RunController::new(&mut host, &factory, &settings);

    let err = controller
        .run(&OptionSet::new(), Path::new("out"), "0")
        .unwrap_err();
    assert!(matches!(err, EvalError::StepFailed { phase: "measure", step: 3, .. }));
    assert_eq!(controller.state(), RunState::Failed);
    drop(controller);

    assert_eq!(host.count(HostCallKind::AdvanceStep), 256 + 3);
    let failed_at = host.last_position(HostCallKind::AdvanceStep).unwrap();
    assert_eq!(
        host.calls()[failed_at + 1..].to_vec(),
        vec![
            HostCall::EndCaptureWindow,
            HostCall::SetProfilingEnabled(false),
            HostCall::DeregisterPipeline("ComputePathTracer".to_owned()),
        ]
    );
    assert!(host.registered_pipeline().is_none());
    assert!(!host.profiling_enabled());
}

#[test]
fn partially_built_pipeline_is_released() {
    let mut host = RecordingHost::new().fail_at(HostCallKind::AddEdge, 1);
    let err = run_default(&mut host).unwrap_err();
    assert!(matches!(
        err,
        EvalError::Execution { phase: "build", source: HostError::Failed(_) }
    ));
    assert_eq!(host.count(HostCallKind::AddEdge), 1);
    assert_eq!(host.count(HostCallKind::RegisterPipeline), 0);
    assert_eq!(
        host.calls().last(),
        Some(&HostCall::DeregisterPipeline("ComputePathTracer".to_owned()))
    );
}

#[test]
fn failing_warmup_step_reports_step_index() {
    let mut host = RecordingHost::new().fail_at(HostCallKind::AdvanceStep, 10);
    let err = run_default(&mut host).unwrap_err();
    assert!(matches!(err, EvalError::StepFailed { phase: "warmup", step: 10, .. }));
    assert_eq!(host.count(HostCallKind::StartCaptureWindow), 0);
    assert_eq!(host.count(HostCallKind::DeregisterPipeline), 1);
}

#[test]
fn missing_metric_is_an_error() {
    let mut host = RecordingHost::new().without_metrics();
    let err = run_default(&mut host).unwrap_err();
    assert!(matches!(err, EvalError::MissingMetric(ref m) if m == "/onFrameRender/gpu_time"));
    assert!(!host.profiling_enabled());
    assert_eq!(host.count(HostCallKind::DeregisterPipeline), 1);
}

#[test]
fn custom_checkpoints_drive_warmup_length() {
    let mut host = RecordingHost::new();
    let factory = ComputePathTracerGraph::evaluation();
    let settings = EvalSettings {
        warmup_checkpoints: vec![5, 2],
        measured_steps: 7,
        ..EvalSettings::default()
    };
    RunController::new(&mut host, &factory, &settings)
        .run(&OptionSet::new(), Path::new("out"), "3")
        .unwrap();

    assert_eq!(host.count(HostCallKind::AdvanceStep), 5 + 7);
    assert!(host.calls().contains(&HostCall::RequestCaptureAtSteps(BTreeSet::from([2, 5]))));
    assert!(host.calls().contains(&HostCall::ConfigureFrameCapture {
        output_dir: "out".into(),
        base_filename: "3".to_owned(),
    }));
}
