//! Scenario Matrix Driver
//!
//! Runs every option set on every scene, strictly in order:
//!
//! 1. scene identifiers and option sets are checked (no host calls yet)
//! 2. for each scene: load it and reset `<output_root>/<pipeline>/<scene>/`
//! 3. for each option set: run the scenario and write its report
//! 4. unload the scene
//!
//! The first failing scenario aborts the matrix. Its scene is still unloaded
//! on a best-effort basis before the error is returned.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use bench_core::{EvalError, MetricStats, OptionSet, Result};
use bench_graph::PipelineFactory;
use bench_host::HostEngine;

use crate::report::ResultReporter;
use crate::run::RunController;
use crate::scenario::{Scenario, reset_dir, scene_dir};
use crate::settings::{EvalMatrix, EvalSettings};

/// Result of one completed scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioOutcome {
    pub scenario: Scenario,
    pub report: PathBuf,
    /// Statistics of the configured metric.
    pub stats: MetricStats,
}

/// Everything a successful matrix run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixSummary {
    pub scenes: Vec<String>,
    pub outcomes: Vec<ScenarioOutcome>,
}

impl MatrixSummary {
    #[must_use]
    pub fn scenario_count(&self) -> usize {
        self.outcomes.len()
    }

    /// Outcomes of one scene, in ordinal order.
    pub fn for_scene<'s>(&'s self, scene: &'s str) -> impl Iterator<Item = &'s ScenarioOutcome> + 's {
        self.outcomes.iter().filter(move |o| o.scenario.scene == scene)
    }
}

/// Each scene names a directory that gets wiped, so it must be one plain path
/// component and appear only once.
fn validate_scenes(scenes: &[String]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for scene in scenes {
        let invalid = |reason| EvalError::InvalidScene {
            scene: scene.clone(),
            reason,
        };
        if scene.is_empty() {
            return Err(invalid("empty identifier"));
        }
        let mut components = Path::new(scene).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(name)), None) if name == scene.as_str()
        ) {
            return Err(invalid("must be a single directory name"));
        }
        if !seen.insert(scene.as_str()) {
            return Err(invalid("listed more than once"));
        }
    }
    Ok(())
}

/// Drives a scenes × option sets matrix through a host.
pub struct ScenarioMatrix<'a, H: HostEngine + ?Sized, F: PipelineFactory + ?Sized> {
    host: &'a mut H,
    factory: &'a F,
    settings: EvalSettings,
    reporter: ResultReporter,
}

impl<'a, H: HostEngine + ?Sized, F: PipelineFactory + ?Sized> ScenarioMatrix<'a, H, F> {
    /// Fails with [`EvalError::InvalidSettings`] for unusable settings.
    pub fn new(host: &'a mut H, factory: &'a F, settings: EvalSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            host,
            factory,
            reporter: ResultReporter::from_settings(&settings),
            settings,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    /// Runs `matrix`. See [`run_scenes`](Self::run_scenes).
    pub fn run(&mut self, matrix: &EvalMatrix) -> Result<MatrixSummary> {
        self.run_scenes(&matrix.scenes, &matrix.option_sets)
    }

    /// Runs every option set on every scene.
    pub fn run_scenes(&mut self, scenes: &[String], option_sets: &[OptionSet]) -> Result<MatrixSummary> {
        validate_scenes(scenes)?;
        for (i, options) in option_sets.iter().enumerate() {
            self.factory.validate_options(options).inspect_err(|e| {
                log::error!("Option set #{i} {options} rejected: {e}");
            })?;
        }

        let mut summary = MatrixSummary::default();
        for scene in scenes {
            log::info!("Scene '{scene}': {} scenario(s)", option_sets.len());
            self.host
                .load_scene(scene)
                .map_err(|source| EvalError::Execution { phase: "load scene", source })?;

            let result = self.run_scene(scene, option_sets, &mut summary);
            let unloaded = self.host.unload_scene();

            match (result, unloaded) {
                (Ok(()), Ok(())) => summary.scenes.push(scene.clone()),
                (Ok(()), Err(source)) => {
                    return Err(EvalError::Execution { phase: "unload scene", source });
                }
                (Err(e), unloaded) => {
                    if let Err(u) = unloaded {
                        log::warn!("Unloading scene '{scene}' after failure: {u}");
                    }
                    return Err(e);
                }
            }
        }

        log::info!(
            "Evaluation finished: {} scenario(s) on {} scene(s)",
            summary.scenario_count(),
            summary.scenes.len()
        );
        Ok(summary)
    }

    fn run_scene(&mut self, scene: &str, option_sets: &[OptionSet], summary: &mut MatrixSummary) -> Result<()> {
        let dir = scene_dir(&self.settings.output_root, self.factory.pipeline_name(), scene);
        reset_dir(&dir)?;

        for (ordinal, options) in option_sets.iter().enumerate() {
            let scenario = Scenario::new(scene, options.clone(), ordinal);
            log::info!("[{scene} #{ordinal}] {options}");

            let base = scenario.base_filename();
            let record = RunController::new(&mut *self.host, self.factory, &self.settings)
                .run(options, &dir, &base)?;

            let stats = *self.reporter.metric_stats(&record)?;
            let report = self.reporter.report(&record, options, &dir, &base)?;
            log::info!(
                "[{scene} #{ordinal}] mean {:.4} ms (min {:.4}, max {:.4}) -> {}",
                stats.mean,
                stats.min,
                stats.max,
                report.display()
            );

            summary.outcomes.push(ScenarioOutcome {
                scenario,
                report,
                stats,
            });
        }
        Ok(())
    }
}
