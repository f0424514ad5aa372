//! Stage Types & Typed Stage Configuration
//!
//! Every stage in a pipeline has a [`StageKind`] (its type tag) and a typed
//! options struct. The options structs are the single source of truth for
//! which keys a stage type recognizes: they deserialize with
//! `deny_unknown_fields`, and [`StageConfig::with_overrides`] rejects any key
//! that is not a field of the struct *before* touching the value.
//!
//! # Stage Overview
//!
//! | Kind | Inputs | Outputs | Accumulates |
//! |------|--------|---------|-------------|
//! | `ImageLoader` | — | `dst` | no |
//! | `VBufferRT` | — | `vbuffer`, `viewW`, `depth`, `mvec` | no |
//! | `ComputePathTracer` | `vbuffer`, `viewW`, `refImage` | `color`, `nirc_debug` | no |
//! | `AccumulatePass` | `input` | `output` | **yes** |
//! | `ToneMapper` | `src` | `dst` | no |
//!
//! # Example
//!
//! ```rust,ignore
//! let overrides = OptionSet::new().with("useNEE", false);
//! let config = StageConfig::from_options(StageKind::ComputePathTracer, &overrides)?;
//! assert_eq!(config.properties().get("useNEE"), Some(&OptionValue::Bool(false)));
//! ```

use std::fmt;
use std::str::FromStr;

use bench_core::{EvalError, OptionSet, OptionValue, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ============================================================================
// StageKind
// ============================================================================

/// Type tag of a processing stage.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKind {
    ImageLoader,
    VBufferRT,
    ComputePathTracer,
    AccumulatePass,
    ToneMapper,
}

impl StageKind {
    pub const ALL: [Self; 5] = [
        Self::ImageLoader,
        Self::VBufferRT,
        Self::ComputePathTracer,
        Self::AccumulatePass,
        Self::ToneMapper,
    ];

    /// Type name as understood by the host engine.
    #[inline]
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::ImageLoader => "ImageLoader",
            Self::VBufferRT => "VBufferRT",
            Self::ComputePathTracer => "ComputePathTracer",
            Self::AccumulatePass => "AccumulatePass",
            Self::ToneMapper => "ToneMapper",
        }
    }

    /// Input channel names.
    #[must_use]
    pub const fn inputs(self) -> &'static [&'static str] {
        match self {
            Self::ImageLoader | Self::VBufferRT => &[],
            Self::ComputePathTracer => &["vbuffer", "viewW", "refImage"],
            Self::AccumulatePass => &["input"],
            Self::ToneMapper => &["src"],
        }
    }

    /// Output channel names.
    #[must_use]
    pub const fn outputs(self) -> &'static [&'static str] {
        match self {
            Self::ImageLoader | Self::ToneMapper => &["dst"],
            Self::VBufferRT => &["vbuffer", "viewW", "depth", "mvec"],
            Self::ComputePathTracer => &["color", "nirc_debug"],
            Self::AccumulatePass => &["output"],
        }
    }

    #[must_use]
    pub fn has_input(self, channel: &str) -> bool {
        self.inputs().contains(&channel)
    }

    #[must_use]
    pub fn has_output(self, channel: &str) -> bool {
        self.outputs().contains(&channel)
    }

    /// Whether the stage integrates its input over multiple steps and must be
    /// reset before a measurement window.
    #[inline]
    #[must_use]
    pub const fn accumulates(self) -> bool {
        matches!(self, Self::AccumulatePass)
    }

    /// Baseline configuration for this stage type.
    #[must_use]
    pub fn default_config(self) -> StageConfig {
        match self {
            Self::ImageLoader => StageConfig::ImageLoader(ImageLoaderOptions::default()),
            Self::VBufferRT => StageConfig::VBufferRT(VBufferOptions::default()),
            Self::ComputePathTracer => StageConfig::ComputePathTracer(PathTracerOptions::default()),
            Self::AccumulatePass => StageConfig::AccumulatePass(AccumulateOptions::default()),
            Self::ToneMapper => StageConfig::ToneMapper(ToneMapperOptions::default()),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for StageKind {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.type_name() == s)
            .ok_or_else(|| EvalError::UnknownStageKind(s.to_owned()))
    }
}

// ============================================================================
// Enumerated option values
// ============================================================================

/// Sub-pixel sample pattern of the visibility buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SamplePattern {
    #[default]
    Center,
    DirectX,
    Halton,
    Stratified,
}

/// Arithmetic precision of the accumulation buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrecisionMode {
    #[default]
    Double,
    Single,
    SingleCompensated,
}

/// Tone mapping curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ToneMapOperator {
    Linear,
    Reinhard,
    ReinhardModified,
    HejiHableAlu,
    HableUc2,
    #[default]
    Aces,
}

// ============================================================================
// Typed option structs
// ============================================================================

/// Options of the `ImageLoader` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ImageLoaderOptions {
    pub filename: String,
    pub mips: bool,
    pub srgb: bool,
    pub output_size: Option<[u32; 2]>,
}

impl Default for ImageLoaderOptions {
    fn default() -> Self {
        Self {
            filename: String::new(),
            mips: false,
            srgb: true,
            output_size: None,
        }
    }
}

/// Options of the ray-traced visibility buffer stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct VBufferOptions {
    pub sample_pattern: SamplePattern,
    pub sample_count: u32,
    pub output_size: Option<[u32; 2]>,
    pub use_alpha_test: bool,
}

impl Default for VBufferOptions {
    fn default() -> Self {
        Self {
            sample_pattern: SamplePattern::Center,
            sample_count: 16,
            output_size: None,
            use_alpha_test: true,
        }
    }
}

/// Options of the compute path tracer, the stage usually under evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PathTracerOptions {
    #[serde(rename = "lowerBounceCount")]
    pub lower_bounce_count: u32,
    #[serde(rename = "upperBounceCount")]
    pub upper_bounce_count: u32,
    #[serde(rename = "useImportanceSampling")]
    pub use_importance_sampling: bool,
    #[serde(rename = "useNEE")]
    pub use_nee: bool,
    #[serde(rename = "useMIS")]
    pub use_mis: bool,
    #[serde(rename = "MISUsePowerHeuristic")]
    pub mis_use_power_heuristic: bool,
    #[serde(rename = "useRR")]
    pub use_rr: bool,
    #[serde(rename = "RRProbStartValue")]
    pub rr_prob_start_value: f64,
    #[serde(rename = "RRProbReductionFactor")]
    pub rr_prob_reduction_factor: f64,
    #[serde(rename = "RRSurvivalProbOption")]
    pub rr_survival_prob_option: u32,
    /// Radiance hash cache capacity is `2^exponent` entries.
    #[serde(rename = "RHCHashMapSizeExponent")]
    pub rhc_hash_map_size_exponent: u32,
    #[serde(rename = "RHCInjectRadianceRR")]
    pub rhc_inject_radiance_rr: bool,
    #[serde(rename = "RHCInjectRadianceSpread")]
    pub rhc_inject_radiance_spread: bool,
    #[serde(rename = "RHCDebugColor")]
    pub rhc_debug_color: bool,
    #[serde(rename = "NNDebugOutput")]
    pub nn_debug_output: bool,
}

impl Default for PathTracerOptions {
    fn default() -> Self {
        Self {
            lower_bounce_count: 0,
            upper_bounce_count: 10,
            use_importance_sampling: true,
            use_nee: true,
            use_mis: true,
            mis_use_power_heuristic: false,
            use_rr: false,
            rr_prob_start_value: 1.2,
            rr_prob_reduction_factor: 0.9,
            rr_survival_prob_option: 0,
            rhc_hash_map_size_exponent: 20,
            rhc_inject_radiance_rr: false,
            rhc_inject_radiance_spread: false,
            rhc_debug_color: false,
            nn_debug_output: false,
        }
    }
}

impl PathTracerOptions {
    fn check(&self) -> std::result::Result<(), String> {
        if self.lower_bounce_count > self.upper_bounce_count {
            return Err(format!(
                "lowerBounceCount ({}) exceeds upperBounceCount ({})",
                self.lower_bounce_count, self.upper_bounce_count
            ));
        }
        if self.rhc_hash_map_size_exponent > 31 {
            return Err(format!(
                "RHCHashMapSizeExponent ({}) must be at most 31",
                self.rhc_hash_map_size_exponent
            ));
        }
        Ok(())
    }
}

/// Options of the temporal accumulation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct AccumulateOptions {
    pub enabled: bool,
    pub precision_mode: PrecisionMode,
    /// Stop accumulating after this many frames (0 = unlimited).
    pub max_frame_count: u32,
}

impl Default for AccumulateOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            precision_mode: PrecisionMode::Double,
            max_frame_count: 0,
        }
    }
}

/// Options of the tone mapping stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ToneMapperOptions {
    pub auto_exposure: bool,
    /// Exposure compensation in f-stops.
    pub exposure_compensation: f64,
    pub operator: ToneMapOperator,
}

impl Default for ToneMapperOptions {
    fn default() -> Self {
        Self {
            auto_exposure: false,
            exposure_compensation: 0.0,
            operator: ToneMapOperator::Aces,
        }
    }
}

// ============================================================================
// StageConfig
// ============================================================================

/// Validated configuration of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageConfig {
    ImageLoader(ImageLoaderOptions),
    VBufferRT(VBufferOptions),
    ComputePathTracer(PathTracerOptions),
    AccumulatePass(AccumulateOptions),
    ToneMapper(ToneMapperOptions),
}

impl StageConfig {
    /// Baseline configuration of `kind` with `overrides` applied.
    pub fn from_options(kind: StageKind, overrides: &OptionSet) -> Result<Self> {
        kind.default_config().with_overrides(overrides)
    }

    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self {
            Self::ImageLoader(_) => StageKind::ImageLoader,
            Self::VBufferRT(_) => StageKind::VBufferRT,
            Self::ComputePathTracer(_) => StageKind::ComputePathTracer,
            Self::AccumulatePass(_) => StageKind::AccumulatePass,
            Self::ToneMapper(_) => StageKind::ToneMapper,
        }
    }

    /// Returns a new configuration with `overrides` applied on top of `self`.
    ///
    /// Fails with [`EvalError::UnknownOption`] for keys the stage type does not
    /// recognize and [`EvalError::InvalidOptionValue`] for values of the wrong
    /// type or out of range. `self` is never modified.
    pub fn with_overrides(&self, overrides: &OptionSet) -> Result<Self> {
        if overrides.is_empty() {
            return Ok(self.clone());
        }
        let kind = self.kind();
        let config = match self {
            Self::ImageLoader(o) => Self::ImageLoader(merge(kind, o, overrides)?),
            Self::VBufferRT(o) => Self::VBufferRT(merge(kind, o, overrides)?),
            Self::ComputePathTracer(o) => {
                let merged: PathTracerOptions = merge(kind, o, overrides)?;
                merged.check().map_err(|reason| EvalError::InvalidOptionValue {
                    stage: kind.type_name().to_owned(),
                    reason,
                })?;
                Self::ComputePathTracer(merged)
            }
            Self::AccumulatePass(o) => Self::AccumulatePass(merge(kind, o, overrides)?),
            Self::ToneMapper(o) => Self::ToneMapper(merge(kind, o, overrides)?),
        };
        Ok(config)
    }

    /// Full option map of this configuration, as handed to the host engine.
    ///
    /// Unset optional fields (e.g. `outputSize: None`) are omitted.
    #[must_use]
    pub fn properties(&self) -> OptionSet {
        match serialize_fields(self) {
            Some(map) => map
                .iter()
                .filter_map(|(k, v)| OptionValue::from_json(v).map(|v| (k.clone(), v)))
                .collect(),
            None => OptionSet::new(),
        }
    }

    /// Returns `true` for the accumulation stage when it is enabled.
    #[must_use]
    pub fn accumulation_enabled(&self) -> bool {
        matches!(self, Self::AccumulatePass(o) if o.enabled)
    }
}

fn serialize_fields(config: &StageConfig) -> Option<serde_json::Map<String, serde_json::Value>> {
    let value = match config {
        StageConfig::ImageLoader(o) => serde_json::to_value(o),
        StageConfig::VBufferRT(o) => serde_json::to_value(o),
        StageConfig::ComputePathTracer(o) => serde_json::to_value(o),
        StageConfig::AccumulatePass(o) => serde_json::to_value(o),
        StageConfig::ToneMapper(o) => serde_json::to_value(o),
    };
    match value {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Applies `overrides` to the serialized form of `base` and deserializes back.
///
/// Every field of an options struct serializes (optional ones as `null`), so
/// the serialized object's key set is exactly the set of recognized keys.
fn merge<T>(kind: StageKind, base: &T, overrides: &OptionSet) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let invalid = |reason: String| EvalError::InvalidOptionValue {
        stage: kind.type_name().to_owned(),
        reason,
    };

    let mut fields = match serde_json::to_value(base).map_err(|e| invalid(e.to_string()))? {
        serde_json::Value::Object(map) => map,
        other => return Err(invalid(format!("options serialized to {other}, expected an object"))),
    };

    if let Some(key) = overrides.keys().find(|k| !fields.contains_key(*k)) {
        return Err(EvalError::UnknownOption {
            stage: kind.type_name().to_owned(),
            key: key.to_owned(),
        });
    }

    for (key, value) in overrides.iter() {
        fields.insert(key.to_owned(), value.to_json());
    }

    serde_json::from_value(serde_json::Value::Object(fields)).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_kind_round_trips_type_name() {
        for kind in StageKind::ALL {
            assert_eq!(kind.type_name().parse::<StageKind>().unwrap(), kind);
        }
        assert!(matches!(
            "PathTracer".parse::<StageKind>(),
            Err(EvalError::UnknownStageKind(_))
        ));
    }

    #[test]
    fn only_accumulate_pass_accumulates() {
        let accumulating: Vec<_> = StageKind::ALL.into_iter().filter(|k| k.accumulates()).collect();
        assert_eq!(accumulating, vec![StageKind::AccumulatePass]);
    }

    #[test]
    fn overrides_apply_to_named_fields() {
        let overrides = OptionSet::new()
            .with("useNEE", false)
            .with("upperBounceCount", 3)
            .with("RRProbStartValue", 0.8);
        let config = StageConfig::from_options(StageKind::ComputePathTracer, &overrides).unwrap();
        let StageConfig::ComputePathTracer(o) = config else {
            panic!("wrong stage config variant");
        };
        assert!(!o.use_nee);
        assert_eq!(o.upper_bounce_count, 3);
        assert!((o.rr_prob_start_value - 0.8).abs() < 1e-12);
        assert!(o.use_mis, "untouched fields keep their baseline");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let overrides = OptionSet::new().with("useNNE", true);
        let err = StageConfig::from_options(StageKind::ComputePathTracer, &overrides).unwrap_err();
        assert!(matches!(
            err,
            EvalError::UnknownOption { ref stage, ref key } if stage == "ComputePathTracer" && key == "useNNE"
        ));
    }

    #[test]
    fn wrong_value_type_is_rejected() {
        let overrides = OptionSet::new().with("useNEE", 3);
        let err = StageConfig::from_options(StageKind::ComputePathTracer, &overrides).unwrap_err();
        assert!(matches!(err, EvalError::InvalidOptionValue { .. }));

        let overrides = OptionSet::new().with("samplePattern", "Sobol");
        let err = StageConfig::from_options(StageKind::VBufferRT, &overrides).unwrap_err();
        assert!(matches!(err, EvalError::InvalidOptionValue { .. }));
    }

    #[test]
    fn inverted_bounce_range_is_rejected() {
        let overrides = OptionSet::new().with("lowerBounceCount", 5).with("upperBounceCount", 2);
        let err = StageConfig::from_options(StageKind::ComputePathTracer, &overrides).unwrap_err();
        assert!(matches!(err, EvalError::InvalidOptionValue { .. }));
    }

    #[test]
    fn enum_and_dims_options_deserialize() {
        let overrides = OptionSet::new()
            .with("samplePattern", "Stratified")
            .with("outputSize", (640, 360));
        let config = StageConfig::from_options(StageKind::VBufferRT, &overrides).unwrap();
        assert_eq!(
            config,
            StageConfig::VBufferRT(VBufferOptions {
                sample_pattern: SamplePattern::Stratified,
                output_size: Some([640, 360]),
                ..VBufferOptions::default()
            })
        );
    }

    #[test]
    fn properties_omit_unset_optionals() {
        let props = StageKind::VBufferRT.default_config().properties();
        assert!(!props.contains_key("outputSize"));
        assert_eq!(props.get("sampleCount"), Some(&OptionValue::Int(16)));
        assert_eq!(props.get("samplePattern"), Some(&OptionValue::Text("Center".into())));
    }

    #[test]
    fn light_bvh_options_are_not_configurable() {
        let overrides = OptionSet::new().with("lightBVHOptions", "default");
        let err = StageConfig::from_options(StageKind::ComputePathTracer, &overrides).unwrap_err();
        assert!(matches!(err, EvalError::UnknownOption { ref key, .. } if key == "lightBVHOptions"));
    }
}
