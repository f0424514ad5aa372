//! Pipeline Builder Integration Tests
//!
//! Tests for:
//! - Determinism: identical option sets give identical descriptors
//! - Configuration errors for unrecognized keys, for every option set shape
//! - Wiring of the compute path tracer evaluation topology

use bench_core::{EvalError, OptionSet};
use bench_graph::{ChannelRef, ComputePathTracerGraph, PipelineFactory, StageKind};

fn option_sets() -> Vec<OptionSet> {
    vec![
        OptionSet::new(),
        OptionSet::new().with("useNEE", true),
        OptionSet::new().with("useNEE", false),
        OptionSet::new().with("useMIS", false).with("upperBounceCount", 4),
        OptionSet::new().with("useRR", true).with("RRProbStartValue", 0.95),
    ]
}

// ============================================================================
// Determinism
// ============================================================================

#[test]
fn build_is_deterministic() {
    let factory = ComputePathTracerGraph::evaluation();
    for options in option_sets() {
        let a = factory.build(&options).unwrap();
        let b = factory.build(&options).unwrap();
        assert_eq!(a, b, "descriptors differ for {options}");
        assert_eq!(a.descriptor.edges(), b.descriptor.edges());
        assert_eq!(a.descriptor.terminal_output(), b.descriptor.terminal_output());
        assert_eq!(
            a.descriptor.execution_order().unwrap(),
            b.descriptor.execution_order().unwrap()
        );
    }
}

#[test]
fn different_option_sets_differ_only_in_stage_under_test() {
    let factory = ComputePathTracerGraph::evaluation();
    let on = factory.build(&OptionSet::new().with("useNEE", true)).unwrap();
    let off = factory.build(&OptionSet::new().with("useNEE", false)).unwrap();

    assert_eq!(on.descriptor.edges(), off.descriptor.edges());
    for (a, b) in on.descriptor.stages().iter().zip(off.descriptor.stages()) {
        assert_eq!(a.name(), b.name());
        if a.name() == factory.stage_under_test() {
            let diff = a.config().properties().diff_keys(&b.config().properties());
            assert_eq!(diff, vec!["useNEE".to_owned()]);
        } else {
            assert_eq!(a, b);
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

#[test]
fn unknown_key_fails_for_every_option_set() {
    let factory = ComputePathTracerGraph::evaluation();
    for options in option_sets() {
        let typo = options.clone().with("useNNE", true);
        let err = factory.build(&typo).unwrap_err();
        match err {
            EvalError::UnknownOption { stage, key } => {
                assert_eq!(stage, "ComputePathTracer");
                assert_eq!(key, "useNNE");
            }
            other => panic!("expected UnknownOption, got {other:?}"),
        }
        assert!(factory.validate_options(&typo).is_err());
    }
}

// ============================================================================
// Topology
// ============================================================================

#[test]
fn evaluation_topology_wiring() {
    let built = ComputePathTracerGraph::evaluation().build(&OptionSet::new()).unwrap();
    let d = &built.descriptor;

    let edges: Vec<String> = d.edges().iter().map(ToString::to_string).collect();
    assert_eq!(
        edges,
        vec![
            "ImageLoader.dst -> ComputePathTracer.refImage",
            "VBufferRT.vbuffer -> ComputePathTracer.vbuffer",
            "VBufferRT.viewW -> ComputePathTracer.viewW",
            "ComputePathTracer.color -> AccumulatePass.input",
            "AccumulatePass.output -> ToneMapper.src",
        ]
    );
    assert_eq!(d.terminal_output(), Some(&ChannelRef::new("ToneMapper", "dst")));

    let order: Vec<&str> = d
        .execution_order()
        .unwrap()
        .into_iter()
        .map(|id| d.stage(id).unwrap().name())
        .collect();
    assert_eq!(
        order,
        vec!["ImageLoader", "VBufferRT", "ComputePathTracer", "AccumulatePass", "ToneMapper"]
    );

    let accumulating: Vec<StageKind> = d
        .accumulating_stages()
        .map(|id| d.stage(id).unwrap().kind())
        .collect();
    assert_eq!(accumulating, vec![StageKind::AccumulatePass]);
    assert!(!d.stage_by_name("AccumulatePass").unwrap().config().accumulation_enabled());
}

#[test]
fn reference_image_is_configurable() {
    let built = ComputePathTracerGraph::evaluation()
        .with_reference_image("media/refs/cornell_box.exr")
        .build(&OptionSet::new())
        .unwrap();
    let props = built.descriptor.stage_by_name("ImageLoader").unwrap().config().properties();
    assert_eq!(
        props.get("filename").map(ToString::to_string).as_deref(),
        Some("media/refs/cornell_box.exr")
    );
}
