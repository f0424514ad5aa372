//! CPU workloads standing in for the real stage implementations.
//!
//! Each stage produces single-channel `f32` images at the host resolution.
//! The arithmetic only has to be deterministic and roughly proportional to the
//! options a real implementation would be sensitive to (sample counts, bounce
//! counts, NEE light loops); image quality is irrelevant.

use bench_graph::{
    AccumulateOptions, ImageLoaderOptions, PathTracerOptions, PrecisionMode, StageConfig,
    ToneMapOperator, ToneMapperOptions, VBufferOptions,
};
use rustc_hash::FxHashMap;
use smallvec::{SmallVec, smallvec};

/// Per-scene parameters derived from the scene identifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneParams {
    pub seed: u64,
    pub light_count: u32,
    pub albedo: f32,
    /// Fraction of primary rays that hit geometry.
    pub coverage: f32,
}

impl SceneParams {
    #[must_use]
    pub fn from_seed(seed: u64) -> Self {
        Self {
            seed,
            light_count: 1 + (seed % 4) as u32,
            albedo: 0.3 + 0.5 * unit(mix(seed, 1)),
            coverage: 0.6 + 0.4 * unit(mix(seed, 2)),
        }
    }
}

/// Inputs of one stage invocation.
pub(crate) struct StepContext<'a> {
    pub width: u32,
    pub height: u32,
    pub frame: u64,
    pub time: f64,
    pub scene: SceneParams,
    pub inputs: FxHashMap<&'a str, &'a [f32]>,
}

impl StepContext<'_> {
    fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn input(&self, name: &str) -> Option<&[f32]> {
        self.inputs.get(name).copied()
    }
}

/// Mutable per-stage state that survives across steps.
#[derive(Debug, Clone, Default)]
pub struct StageState {
    pub accumulated_frames: u32,
    sum: Vec<f64>,
    compensation: Vec<f64>,
}

impl StageState {
    pub fn reset(&mut self) {
        self.accumulated_frames = 0;
        self.sum.clear();
        self.compensation.clear();
    }
}

pub(crate) type Outputs = SmallVec<[(&'static str, Vec<f32>); 4]>;

/// Executes one stage and returns its output channels.
pub(crate) fn run_stage(config: &StageConfig, state: &mut StageState, ctx: &StepContext<'_>) -> Outputs {
    match config {
        StageConfig::ImageLoader(o) => image_loader(o, ctx),
        StageConfig::VBufferRT(o) => vbuffer(o, ctx),
        StageConfig::ComputePathTracer(o) => path_tracer(o, ctx),
        StageConfig::AccumulatePass(o) => accumulate(o, state, ctx),
        StageConfig::ToneMapper(o) => tone_map(o, ctx),
    }
}

// ─── Random numbers ───────────────────────────────────────────────────────────

/// SplitMix64 finalizer.
#[inline]
fn mix(a: u64, b: u64) -> u64 {
    let mut z = a ^ b.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Maps a hash to `[0, 1)`.
#[inline]
fn unit(h: u64) -> f32 {
    (h >> 40) as f32 / (1u64 << 24) as f32
}

struct Rng(u64);

impl Rng {
    fn next(&mut self) -> f32 {
        self.0 = mix(self.0, 0x2545_F491_4F6C_DD1D);
        unit(self.0)
    }
}

// ─── Stages ───────────────────────────────────────────────────────────────────

fn image_loader(options: &ImageLoaderOptions, ctx: &StepContext<'_>) -> Outputs {
    let seed = options
        .filename
        .bytes()
        .fold(0xCBF2_9CE4_8422_2325_u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x100_0000_01B3));
    let dst = (0..ctx.pixel_count() as u64)
        .map(|p| 0.25 + 0.5 * unit(mix(seed, p)))
        .collect();
    smallvec![("dst", dst)]
}

fn vbuffer(options: &VBufferOptions, ctx: &StepContext<'_>) -> Outputs {
    let n = ctx.pixel_count();
    let samples = options.sample_count.max(1);
    let mut hit = Vec::with_capacity(n);
    let mut view = Vec::with_capacity(n);

    for p in 0..n as u64 {
        let mut covered = 0u32;
        let mut dir = 0.0f32;
        for s in 0..u64::from(samples) {
            let h = mix(mix(ctx.scene.seed, p), s);
            if unit(h) < ctx.scene.coverage {
                covered += 1;
            }
            dir += unit(h.rotate_left(17));
        }
        hit.push(covered as f32 / samples as f32);
        view.push(dir / samples as f32);
    }

    let depth = hit.iter().map(|h| 1.0 - h).collect();
    smallvec![
        ("vbuffer", hit),
        ("viewW", view),
        ("depth", depth),
        ("mvec", vec![0.0; n]),
    ]
}

fn path_tracer(options: &PathTracerOptions, ctx: &StepContext<'_>) -> Outputs {
    let n = ctx.pixel_count();
    let vbuffer = ctx.input("vbuffer");
    let reference = ctx.input("refImage");
    let time_seed = ctx.time.to_bits();
    let scene = ctx.scene;
    let mis_weight = if options.use_mis { 0.5 } else { 1.0 };

    let mut color = Vec::with_capacity(n);
    for p in 0..n {
        let mut rng = Rng(mix(mix(ctx.frame, p as u64), time_seed));
        let hit = vbuffer.map_or(1.0, |v| v.get(p).copied().unwrap_or(0.0));
        if hit <= 0.0 {
            color.push(0.1);
            continue;
        }

        let mut throughput = hit;
        let mut radiance = 0.0f32;
        for bounce in 0..options.upper_bounce_count {
            let contributes = bounce >= options.lower_bounce_count;
            if options.use_nee && contributes {
                for _ in 0..scene.light_count {
                    radiance += throughput * mis_weight * rng.next() / scene.light_count as f32;
                }
            }
            if (!options.use_nee || options.use_mis) && contributes && rng.next() < 0.1 {
                radiance += throughput * mis_weight;
            }

            throughput *= scene.albedo;
            if options.use_importance_sampling {
                throughput *= 0.5 + 0.5 * rng.next();
            }

            if options.use_rr {
                let survival = (options.rr_prob_start_value
                    * options.rr_prob_reduction_factor.powi(bounce as i32))
                .min(1.0) as f32;
                if survival <= 0.0 || rng.next() > survival {
                    break;
                }
                throughput /= survival;
            }
        }

        if options.nn_debug_output {
            radiance = (radiance - reference.and_then(|r| r.get(p).copied()).unwrap_or(0.0)).abs();
        }
        color.push(radiance);
    }

    smallvec![("color", color), ("nirc_debug", vec![0.0; n])]
}

fn accumulate(options: &AccumulateOptions, state: &mut StageState, ctx: &StepContext<'_>) -> Outputs {
    let n = ctx.pixel_count();
    let zeros;
    let input = match ctx.input("input") {
        Some(input) => input,
        None => {
            zeros = vec![0.0; n];
            &zeros
        }
    };

    if !options.enabled {
        return smallvec![("output", input.to_vec())];
    }

    if state.sum.len() != n {
        state.reset();
        state.sum.resize(n, 0.0);
        state.compensation.resize(n, 0.0);
    }

    let saturated = options.max_frame_count > 0 && state.accumulated_frames >= options.max_frame_count;
    if !saturated {
        state.accumulated_frames += 1;
        for (i, &x) in input.iter().enumerate().take(n) {
            let x = f64::from(x);
            match options.precision_mode {
                PrecisionMode::Double => state.sum[i] += x,
                PrecisionMode::Single => state.sum[i] = f64::from(state.sum[i] as f32 + x as f32),
                PrecisionMode::SingleCompensated => {
                    // Kahan summation in single precision.
                    let y = x as f32 - state.compensation[i] as f32;
                    let t = state.sum[i] as f32 + y;
                    state.compensation[i] = f64::from((t - state.sum[i] as f32) - y);
                    state.sum[i] = f64::from(t);
                }
            }
        }
    }

    let frames = f64::from(state.accumulated_frames.max(1));
    let output = state.sum.iter().map(|s| (s / frames) as f32).collect();
    smallvec![("output", output)]
}

fn tone_map(options: &ToneMapperOptions, ctx: &StepContext<'_>) -> Outputs {
    let n = ctx.pixel_count();
    let src = ctx.input("src").unwrap_or(&[]);

    let mut exposure = 2f32.powf(options.exposure_compensation as f32);
    if options.auto_exposure && !src.is_empty() {
        let mean = src.iter().sum::<f32>() / src.len() as f32;
        exposure *= 0.18 / mean.max(1e-4);
    }

    let dst = (0..n)
        .map(|p| {
            let x = src.get(p).copied().unwrap_or(0.0) * exposure;
            match options.operator {
                ToneMapOperator::Linear => x.clamp(0.0, 1.0),
                ToneMapOperator::Reinhard => x / (1.0 + x),
                ToneMapOperator::ReinhardModified => x * (1.0 + x / 4.0) / (1.0 + x),
                ToneMapOperator::HejiHableAlu => {
                    let x = (x - 0.004).max(0.0);
                    (x * (6.2 * x + 0.5)) / (x * (6.2 * x + 1.7) + 0.06)
                }
                ToneMapOperator::HableUc2 => {
                    let f = |v: f32| ((v * (0.15 * v + 0.05) + 0.004) / (v * (0.15 * v + 0.5) + 0.06)) - 0.066_666;
                    f(2.0 * x) / f(11.2)
                }
                ToneMapOperator::Aces => {
                    ((x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14)).clamp(0.0, 1.0)
                }
            }
        })
        .collect();
    smallvec![("dst", dst)]
}
