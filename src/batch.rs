use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::run::ReplacementRequest;

#[derive(Debug, Deserialize)]
pub struct BatchPlan {
    pub steps: Vec<PlanStep>,
}

/// One run in a plan. Unset options fall back to the command line.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PlanStep {
    pub root: PathBuf,
    #[serde(alias = "name")]
    pub pattern: String,
    pub find: String,
    #[serde(default, alias = "with")]
    pub replace: String,
    #[serde(default)]
    pub legacy_encoding: Option<String>,
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub allow_lossy: Option<bool>,
    #[serde(default)]
    pub skip_hidden: Option<bool>,
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
}

impl PlanStep {
    pub fn request(&self) -> Result<ReplacementRequest> {
        ReplacementRequest::new(&self.root, &self.pattern, &self.find, &self.replace)
            .with_context(|| format!("invalid step for {}", self.root.display()))
    }
}

/// Reads a plan as JSON (by extension) or YAML. Relative roots are resolved
/// against the plan's directory.
pub fn load_plan(path: &Path) -> Result<BatchPlan> {
    let data = fs::read(path).with_context(|| format!("reading plan {}", path.display()))?;
    let mut plan: BatchPlan = if path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
    {
        serde_json::from_slice(&data)
            .with_context(|| format!("parsing plan {}", path.display()))?
    } else {
        serde_yaml::from_slice(&data)
            .with_context(|| format!("parsing plan {}", path.display()))?
    };
    if plan.steps.is_empty() {
        bail!("plan {} does not contain any steps", path.display());
    }
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    for step in &mut plan.steps {
        if step.root.is_relative() {
            step.root = base.join(&step.root);
        }
    }
    Ok(plan)
}
