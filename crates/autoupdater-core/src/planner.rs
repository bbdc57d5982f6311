//! Discovers `up-<ver>.sh` / `down-<ver>.sh` scripts and computes the
//! ordered script set for a version transition.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::{Executor, ExecutorError};
use crate::version::PackageVersion;

fn script_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(up|down)-(v?\d+\.\d+\.\d+(?:-[A-Za-z0-9.]+)?)\.sh$").unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct MigrationScript {
    pub filename: String,
    pub remote_path: String,
    pub version: PackageVersion,
    pub direction: Direction,
}

impl MigrationScript {
    /// Pure validation of a filename against the grammar
    /// `^(up|down)-(v?\d+\.\d+\.\d+(-[A-Za-z0-9.]+)?)\.sh$`. Direction and
    /// version are fully determined by the name — no other metadata.
    pub fn parse_filename(filename: &str) -> Option<(Direction, PackageVersion)> {
        let caps = script_regex().captures(filename)?;
        let direction = match &caps[1] {
            "up" => Direction::Up,
            _ => Direction::Down,
        };
        let version = PackageVersion::parse(&caps[2]);
        if !version.is_valid_nonempty() {
            return None;
        }
        Some((direction, version))
    }
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("script {0} failed and stopped the migration plan")]
    ScriptFailed(String),
}

/// Discover every `up-*.sh` / `down-*.sh` script in a compose directory.
/// Names that don't match the grammar are silently ignored.
pub async fn discover_scripts(
    executor: &dyn Executor,
    compose_dir: &str,
) -> Result<Vec<MigrationScript>, ExecutorError> {
    let entries = executor.list_files(compose_dir, "*.sh").await?;
    let mut scripts = Vec::new();
    for path in entries {
        let filename = path.rsplit('/').next().unwrap_or(&path);
        if let Some((direction, version)) = MigrationScript::parse_filename(filename) {
            scripts.push(MigrationScript {
                filename: filename.to_string(),
                remote_path: path.clone(),
                version,
                direction,
            });
        }
    }
    Ok(scripts)
}

/// An ordered, directional set of scripts to run for one transition.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    pub scripts: Vec<MigrationScript>,
    /// True when one or more selected scripts previously failed (present
    /// in the state's `Failed` set) — the Engine surfaces this as a
    /// "resume" rather than a fresh attempt.
    pub is_resume: bool,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// Compute the ordered script set for a transition from `from_version` to
/// `target_version`, given every discovered script and the set of
/// versions whose up-scripts already succeeded (`executed`, i.e.
/// `DeploymentState::up`). `failed` is `DeploymentState::failed`, used
/// only to flag the plan as a resume.
pub fn build_plan(
    scripts: &[MigrationScript],
    from_version: &PackageVersion,
    target_version: &PackageVersion,
    executed: &BTreeSet<PackageVersion>,
    failed: &BTreeSet<PackageVersion>,
) -> MigrationPlan {
    if from_version == target_version {
        return MigrationPlan::default();
    }

    let mut selected: Vec<MigrationScript> = if target_version > from_version {
        scripts
            .iter()
            .filter(|s| {
                s.direction == Direction::Up
                    && &s.version > from_version
                    && &s.version <= target_version
                    && !executed.contains(&s.version)
            })
            .cloned()
            .collect()
    } else {
        scripts
            .iter()
            .filter(|s| {
                s.direction == Direction::Down
                    && &s.version <= from_version
                    && &s.version > target_version
                    && executed.contains(&s.version)
            })
            .cloned()
            .collect()
    };

    if target_version > from_version {
        selected.sort_by(|a, b| a.version.cmp(&b.version));
    } else {
        selected.sort_by(|a, b| b.version.cmp(&a.version));
    }

    let is_resume = selected.iter().any(|s| failed.contains(&s.version));

    MigrationPlan {
        scripts: selected,
        is_resume,
    }
}

#[derive(Debug, Clone)]
pub struct ScriptRunOutcome {
    pub filename: String,
    pub version: PackageVersion,
    pub success: bool,
    pub stderr: String,
}

/// Execute a plan in order through the Remote Executor, working directory
/// set to the compose directory. Stops at the first non-zero exit.
pub async fn execute_plan(
    executor: &dyn Executor,
    compose_dir: &str,
    plan: &MigrationPlan,
) -> Result<Vec<ScriptRunOutcome>, PlannerError> {
    let mut outcomes = Vec::new();
    for script in &plan.scripts {
        if !executor.is_executable(&script.remote_path).await? {
            outcomes.push(ScriptRunOutcome {
                filename: script.filename.clone(),
                version: script.version.clone(),
                success: false,
                stderr: format!("{} is not executable", script.filename),
            });
            return Ok(outcomes);
        }

        let result = executor
            .exec(&format!("sudo {}", script.remote_path), Some(compose_dir))
            .await?;

        let success = result.success();
        outcomes.push(ScriptRunOutcome {
            filename: script.filename.clone(),
            version: script.version.clone(),
            success,
            stderr: result.stderr.clone(),
        });

        if !success {
            return Ok(outcomes);
        }
    }
    Ok(outcomes)
}
