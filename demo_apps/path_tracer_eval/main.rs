//! Compute path tracer evaluation.
//!
//! Runs next-event estimation on and off over the two reference scenes and
//! writes one report per scenario to `evaluation/ComputePathTracer/<scene>/`.
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::Context;
use graph_bench::prelude::*;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut host = SimulatedHost::new(SimulatedHostSettings::default());
    let factory = ComputePathTracerGraph::evaluation();
    let matrix = EvalMatrix::path_tracer_default();
    let settings = EvalSettings::default();
    let output_root = settings.output_root.clone();

    let summary = ScenarioMatrix::new(&mut host, &factory, settings)
        .and_then(|mut driver| driver.run(&matrix))
        .inspect_err(|e| log::error!("Evaluation aborted: {e}"))
        .with_context(|| format!("evaluating into {}", output_root.display()))?;

    for outcome in &summary.outcomes {
        println!(
            "{:<18} #{} {:<16} mean {:>9.4} ms  std_dev {:>8.4}  -> {}",
            outcome.scenario.scene,
            outcome.scenario.ordinal,
            outcome.scenario.options.to_string(),
            outcome.stats.mean,
            outcome.stats.std_dev,
            outcome.report.display()
        );
    }
    Ok(())
}
