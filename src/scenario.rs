//! Scenarios and their place on disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bench_core::{EvalError, OptionSet, Result};

/// One (scene, option set) combination of a matrix run.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub scene: String,
    pub options: OptionSet,
    /// Index of the option set within the matrix; names the report file.
    pub ordinal: usize,
}

impl Scenario {
    #[must_use]
    pub fn new(scene: impl Into<String>, options: OptionSet, ordinal: usize) -> Self {
        Self {
            scene: scene.into(),
            options,
            ordinal,
        }
    }

    #[inline]
    #[must_use]
    pub fn base_filename(&self) -> String {
        self.ordinal.to_string()
    }

    #[must_use]
    pub fn output_dir(&self, output_root: &Path, pipeline: &str) -> PathBuf {
        scene_dir(output_root, pipeline, &self.scene)
    }
}

/// `<output_root>/<pipeline>/<scene>`
#[must_use]
pub fn scene_dir(output_root: &Path, pipeline: &str, scene: &str) -> PathBuf {
    output_root.join(pipeline).join(scene)
}

/// Deletes `dir` recursively if it exists, then recreates it empty.
pub fn reset_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => log::debug!("Removed previous results in {}", dir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(EvalError::io(dir, e)),
    }
    fs::create_dir_all(dir).map_err(|e| EvalError::io(dir, e))
}
