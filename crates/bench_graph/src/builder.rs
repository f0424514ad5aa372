//! Pipeline Builders
//!
//! A [`PipelineFactory`] turns an [`OptionSet`] into a concrete
//! [`PipelineDescriptor`]. The topology is fixed by the factory; only the
//! stage under test receives the option set, every other stage keeps its
//! baseline configuration.
//!
//! Building is pure: it never talks to the host engine, so a configuration
//! error is always reported before any host-side state changes.
//!
//! # Example
//!
//! ```rust,ignore
//! let factory = ComputePathTracerGraph::evaluation();
//! let built = factory.build(&OptionSet::new().with("useNEE", true))?;
//! assert_eq!(built.descriptor.terminal_output().unwrap().to_string(), "ToneMapper.dst");
//! ```

use std::collections::BTreeMap;

use bench_core::{EvalError, OptionSet, Result};

use crate::descriptor::{PipelineDescriptor, StageId};
use crate::stage::{
    AccumulateOptions, ImageLoaderOptions, PrecisionMode, SamplePattern, StageConfig, StageKind,
    ToneMapperOptions, VBufferOptions,
};

/// Stage name → stage id lookup for a built descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageRegistry {
    by_name: BTreeMap<String, StageId>,
}

impl StageRegistry {
    #[must_use]
    pub fn from_descriptor(descriptor: &PipelineDescriptor) -> Self {
        let by_name = descriptor
            .stages()
            .iter()
            .filter_map(|s| descriptor.stage_id(s.name()).map(|id| (s.name().to_owned(), id)))
            .collect();
        Self { by_name }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<StageId> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, StageId)> {
        self.by_name.iter().map(|(k, v)| (k.as_str(), *v))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Output of [`PipelineFactory::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPipeline {
    pub descriptor: PipelineDescriptor,
    pub registry: StageRegistry,
    /// The stage that received the option set.
    pub under_test: StageId,
}

/// Builds a fixed pipeline topology parameterized by an option set.
pub trait PipelineFactory {
    /// Name of the produced pipeline; also names the evaluation output folder.
    fn pipeline_name(&self) -> &str;

    /// Name of the stage that receives the option set.
    fn stage_under_test(&self) -> &str;

    /// Builds a validated descriptor. Identical inputs produce structurally
    /// identical descriptors.
    fn build(&self, options: &OptionSet) -> Result<BuiltPipeline>;

    /// Checks `options` without keeping the descriptor.
    fn validate_options(&self, options: &OptionSet) -> Result<()> {
        self.build(options).map(|_| ())
    }
}

/// The compute path tracer evaluation graph.
///
/// ```text
/// ImageLoader.dst ─────► ComputePathTracer.refImage
/// VBufferRT.vbuffer ───► ComputePathTracer.vbuffer
/// VBufferRT.viewW ─────► ComputePathTracer.viewW
/// ComputePathTracer.color ─► AccumulatePass.input
/// AccumulatePass.output ───► ToneMapper.src ─► ToneMapper.dst (terminal)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ComputePathTracerGraph {
    name: String,
    reference_image: Option<ImageLoaderOptions>,
    accumulation: AccumulateOptions,
}

impl Default for ComputePathTracerGraph {
    fn default() -> Self {
        Self::evaluation()
    }
}

impl ComputePathTracerGraph {
    pub const STAGE_UNDER_TEST: &'static str = "ComputePathTracer";

    /// Benchmark topology: reference image loader attached, accumulation
    /// disabled so every measured step does the same amount of work.
    #[must_use]
    pub fn evaluation() -> Self {
        Self {
            name: "ComputePathTracer".to_owned(),
            reference_image: Some(ImageLoaderOptions::default()),
            accumulation: AccumulateOptions {
                enabled: false,
                precision_mode: PrecisionMode::Single,
                max_frame_count: 0,
            },
        }
    }

    /// Interactive topology: no reference image, accumulation enabled.
    #[must_use]
    pub fn accumulating() -> Self {
        Self {
            name: "ComputePathTracer".to_owned(),
            reference_image: None,
            accumulation: AccumulateOptions {
                enabled: true,
                precision_mode: PrecisionMode::Single,
                max_frame_count: 0,
            },
        }
    }

    /// Sets the reference image loaded by the `ImageLoader` stage.
    #[must_use]
    pub fn with_reference_image(mut self, filename: impl Into<String>) -> Self {
        self.reference_image = Some(ImageLoaderOptions {
            filename: filename.into(),
            ..ImageLoaderOptions::default()
        });
        self
    }
}

impl PipelineFactory for ComputePathTracerGraph {
    fn pipeline_name(&self) -> &str {
        &self.name
    }

    fn stage_under_test(&self) -> &str {
        Self::STAGE_UNDER_TEST
    }

    fn build(&self, options: &OptionSet) -> Result<BuiltPipeline> {
        // Resolve the stage under test first: an unknown key fails before any
        // descriptor work.
        let path_tracer = StageConfig::from_options(StageKind::ComputePathTracer, options)?;

        let mut d = PipelineDescriptor::new(self.name.clone());

        if let Some(image) = &self.reference_image {
            d.add_stage("ImageLoader", StageConfig::ImageLoader(image.clone()))?;
        }
        d.add_stage(
            "VBufferRT",
            StageConfig::VBufferRT(VBufferOptions {
                sample_pattern: SamplePattern::Stratified,
                sample_count: 16,
                ..VBufferOptions::default()
            }),
        )?;
        let under_test = d.add_stage(Self::STAGE_UNDER_TEST, path_tracer)?;
        d.add_stage("AccumulatePass", StageConfig::AccumulatePass(self.accumulation.clone()))?;
        d.add_stage(
            "ToneMapper",
            StageConfig::ToneMapper(ToneMapperOptions {
                auto_exposure: false,
                exposure_compensation: 0.0,
                ..ToneMapperOptions::default()
            }),
        )?;

        if self.reference_image.is_some() {
            d.add_edge("ImageLoader.dst", "ComputePathTracer.refImage")?;
        }
        d.add_edge("VBufferRT.vbuffer", "ComputePathTracer.vbuffer")?;
        d.add_edge("VBufferRT.viewW", "ComputePathTracer.viewW")?;
        d.add_edge("ComputePathTracer.color", "AccumulatePass.input")?;
        d.add_edge("AccumulatePass.output", "ToneMapper.src")?;
        d.mark_output("ToneMapper.dst")?;
        d.validate()?;

        let registry = StageRegistry::from_descriptor(&d);
        if registry.get(Self::STAGE_UNDER_TEST) != Some(under_test) {
            return Err(EvalError::UnknownStage(Self::STAGE_UNDER_TEST.to_owned()));
        }

        Ok(BuiltPipeline {
            descriptor: d,
            registry,
            under_test,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_graph_has_reference_loader() {
        let built = ComputePathTracerGraph::evaluation().build(&OptionSet::new()).unwrap();
        assert_eq!(built.descriptor.stages().len(), 5);
        assert_eq!(built.descriptor.edges().len(), 5);
        assert!(built.registry.get("ImageLoader").is_some());
        assert_eq!(built.registry.len(), 5);
    }

    #[test]
    fn accumulating_graph_omits_reference_loader() {
        let built = ComputePathTracerGraph::accumulating().build(&OptionSet::new()).unwrap();
        assert_eq!(built.descriptor.stages().len(), 4);
        assert!(built.registry.get("ImageLoader").is_none());
        let acc = built.registry.get("AccumulatePass").unwrap();
        assert!(built.descriptor.stage(acc).unwrap().config().accumulation_enabled());
    }

    #[test]
    fn options_only_reach_stage_under_test() {
        let options = OptionSet::new().with("useNEE", false);
        let built = ComputePathTracerGraph::evaluation().build(&options).unwrap();
        let pt = built.descriptor.stage(built.under_test).unwrap();
        assert_eq!(pt.name(), "ComputePathTracer");
        assert_eq!(
            pt.config().properties().get("useNEE"),
            Some(&bench_core::OptionValue::Bool(false))
        );

        // Baseline stages are untouched by the overrides.
        let baseline = ComputePathTracerGraph::evaluation().build(&OptionSet::new()).unwrap();
        for name in ["ImageLoader", "VBufferRT", "AccumulatePass", "ToneMapper"] {
            assert_eq!(
                built.descriptor.stage_by_name(name),
                baseline.descriptor.stage_by_name(name)
            );
        }
    }

    #[test]
    fn option_for_other_stage_is_unknown() {
        // `sampleCount` belongs to VBufferRT, not to the stage under test.
        let options = OptionSet::new().with("sampleCount", 4);
        let err = ComputePathTracerGraph::evaluation().build(&options).unwrap_err();
        assert!(matches!(err, EvalError::UnknownOption { .. }));
        assert!(err.is_configuration());
    }
}
