//! Build plans: named steps with declared dependencies, evaluated in
//! topological order, with a persistent execution report.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::component::Applier;
use crate::context::DeployContext;
use crate::error::{CompError, CompResult};

/// How a plan reacts to a failing step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Stop at the first failure; later steps are never evaluated
    FailFast,
    /// Keep evaluating independent steps and report every failure
    #[default]
    Aggregate,
}

/// Overall plan state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// State of a single step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Not evaluated
    #[default]
    Pending,
    Applied,
    Failed,
    /// Not evaluated because a dependency did not apply
    Skipped,
}

/// A step in a build plan.
pub struct PlanStep {
    pub name: String,
    pub applier: Arc<dyn Applier>,
    pub depends_on: Vec<String>,
}

impl fmt::Debug for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlanStep")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

/// Execution record of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub state: StepState,
    pub error: Option<String>,
    /// Dependency that prevented this step from running
    pub blocked_by: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: StepState::Pending,
            error: None,
            blocked_by: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Persistent report of a plan execution.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlanReport {
    pub plan_name: String,
    pub execution_id: Uuid,
    pub state: ExecutionState,
    /// One record per step, in plan order
    pub steps: Vec<StepRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    errors: Vec<CompError>,
}

impl PlanReport {
    fn new(plan: &BuildPlan, execution_id: Uuid) -> Self {
        Self {
            plan_name: plan.name.clone(),
            execution_id,
            state: ExecutionState::Pending,
            steps: plan.steps.iter().map(|s| StepRecord::pending(&s.name)).collect(),
            started_at: None,
            completed_at: None,
            errors: Vec::new(),
        }
    }

    /// Get the record of a step by name.
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    fn names_in(&self, state: StepState) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.state == state)
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn applied_steps(&self) -> Vec<&str> {
        self.names_in(StepState::Applied)
    }

    pub fn failed_steps(&self) -> Vec<&str> {
        self.names_in(StepState::Failed)
    }

    pub fn skipped_steps(&self) -> Vec<&str> {
        self.names_in(StepState::Skipped)
    }

    pub fn pending_steps(&self) -> Vec<&str> {
        self.names_in(StepState::Pending)
    }

    pub fn is_success(&self) -> bool {
        self.state == ExecutionState::Completed
    }

    /// Errors collected during this execution.
    pub fn errors(&self) -> &[CompError] {
        &self.errors
    }

    /// Turn collected failures into one error.
    ///
    /// A report loaded from disk carries only error messages; those are
    /// reported as construction errors.
    pub fn into_result(mut self) -> CompResult<Self> {
        let errors = if self.errors.is_empty() {
            self.steps
                .iter()
                .filter(|s| s.state == StepState::Failed)
                .map(|s| {
                    CompError::construction(s.error.clone().unwrap_or_else(|| "step failed".to_string()))
                        .in_component(&s.name)
                })
                .collect()
        } else {
            std::mem::take(&mut self.errors)
        };
        match CompError::join(errors) {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }

    /// Save the report as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> CompResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CompError::Serialization(e.to_string()))?;
        fs::write(path, json)?;
        debug!("Saved plan report to {:?}", path);
        Ok(())
    }

    /// Load a report from disk.
    pub fn load(path: impl AsRef<Path>) -> CompResult<Self> {
        let content = fs::read_to_string(path)?;
        let report: Self =
            serde_json::from_str(&content).map_err(|e| CompError::Serialization(e.to_string()))?;
        Ok(report)
    }

    fn finish(&mut self) {
        self.state = if self.errors.is_empty() {
            ExecutionState::Completed
        } else {
            ExecutionState::Failed
        };
        self.completed_at = Some(Utc::now());
    }
}

/// A directed acyclic graph of named build steps.
#[derive(Debug, Default)]
pub struct BuildPlan {
    name: String,
    steps: Vec<PlanStep>,
    index: HashMap<String, usize>,
}

impl BuildPlan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Step names in insertion order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Declared dependencies of a step.
    pub fn dependencies(&self, name: &str) -> Option<&[String]> {
        self.index
            .get(name)
            .map(|&i| self.steps[i].depends_on.as_slice())
    }

    /// Add a step without dependencies.
    pub fn add(&mut self, applier: impl Applier + 'static) -> CompResult<&mut Self> {
        self.add_step(applier, Vec::<String>::new())
    }

    /// Add a step that runs after `depends_on`.
    ///
    /// The step is named after its applier. Step and dependency names are
    /// trimmed the same way. Dependencies may be declared
    /// before the steps they name exist; [`BuildPlan::validate`] checks them.
    pub fn add_step<S: Into<String>>(
        &mut self,
        applier: impl Applier + 'static,
        depends_on: impl IntoIterator<Item = S>,
    ) -> CompResult<&mut Self> {
        let name = applier.name().trim().to_string();
        if name.is_empty() {
            return Err(CompError::EmptyName);
        }
        if self.index.contains_key(&name) {
            return Err(CompError::DuplicateStep(name));
        }

        let mut deps: Vec<String> = Vec::new();
        for dep in depends_on.into_iter().map(Into::into) {
            let dep = dep.trim().to_string();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        debug!("Adding build step: {} (after {:?})", name, deps);
        self.index.insert(name.clone(), self.steps.len());
        self.steps.push(PlanStep {
            name,
            applier: Arc::new(applier),
            depends_on: deps,
        });
        Ok(self)
    }

    /// Check that every dependency exists and there is no cycle.
    pub fn validate(&self) -> CompResult<()> {
        self.levels().map(|_| ())
    }

    /// Step names in evaluation order.
    ///
    /// Steps are ordered by depth in the dependency graph, then by insertion.
    pub fn order(&self) -> CompResult<Vec<&str>> {
        Ok(self
            .levels()?
            .into_iter()
            .flatten()
            .map(|i| self.steps[i].name.as_str())
            .collect())
    }

    /// Group step indices by depth. Every step's dependencies sit in
    /// earlier groups.
    fn levels(&self) -> CompResult<Vec<Vec<usize>>> {
        let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(self.steps.len(), 0);
        let nodes: Vec<NodeIndex> = (0..self.steps.len()).map(|i| graph.add_node(i)).collect();

        for (i, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                let &d = self.index.get(dep).ok_or_else(|| CompError::UnknownDependency {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                })?;
                graph.add_edge(nodes[d], nodes[i], ());
            }
        }

        let sorted = toposort(&graph, None)
            .map_err(|cycle| CompError::DependencyCycle(self.steps[graph[cycle.node_id()]].name.clone()))?;

        let mut depth = vec![0usize; self.steps.len()];
        for node in sorted {
            let i = graph[node];
            depth[i] = self.steps[i]
                .depends_on
                .iter()
                .filter_map(|d| self.index.get(d))
                .map(|&d| depth[d] + 1)
                .max()
                .unwrap_or(0);
        }

        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let mut levels = vec![Vec::new(); if self.steps.is_empty() { 0 } else { max_depth + 1 }];
        for (i, d) in depth.into_iter().enumerate() {
            levels[d].push(i);
        }
        Ok(levels)
    }

    async fn run_step(&self, ctx: &DeployContext, i: usize) -> (DateTime<Utc>, CompResult<()>) {
        let step = &self.steps[i];
        info!("Applying step: {}", step.name);
        (Utc::now(), step.applier.apply(ctx).await)
    }

    fn record(report: &mut PlanReport, i: usize, started: DateTime<Utc>, result: CompResult<()>) -> bool {
        let record = &mut report.steps[i];
        record.started_at = Some(started);
        record.completed_at = Some(Utc::now());
        match result {
            Ok(()) => {
                record.state = StepState::Applied;
                debug!("Step '{}' applied", record.name);
                true
            }
            Err(e) => {
                error!("Step '{}' failed: {}", record.name, e);
                record.state = StepState::Failed;
                record.error = Some(e.to_string());
                report.errors.push(e);
                false
            }
        }
    }

    /// Evaluate the plan.
    ///
    /// Structural problems (unknown dependencies, cycles) are returned as
    /// errors before anything runs. Step failures are collected in the
    /// report.
    pub async fn execute(&self, ctx: &DeployContext, mode: FailureMode) -> CompResult<PlanReport> {
        let levels = self.levels()?;
        let mut report = PlanReport::new(self, ctx.execution_id());
        report.state = ExecutionState::Running;
        report.started_at = Some(Utc::now());

        info!("Starting plan: {} ({} steps, {:?})", self.name, self.steps.len(), mode);

        match mode {
            FailureMode::FailFast => {
                for i in levels.into_iter().flatten() {
                    let (started, result) = self.run_step(ctx, i).await;
                    if !Self::record(&mut report, i, started, result) {
                        break;
                    }
                }
            }
            FailureMode::Aggregate => {
                for level in levels {
                    let mut runnable = Vec::with_capacity(level.len());
                    for i in level {
                        let blocker = self.steps[i]
                            .depends_on
                            .iter()
                            .find(|d| self.index.get(*d).map(|&j| report.steps[j].state) != Some(StepState::Applied));
                        match blocker {
                            Some(dep) => {
                                warn!("Skipping step '{}': dependency '{}' did not apply", self.steps[i].name, dep);
                                report.steps[i].state = StepState::Skipped;
                                report.steps[i].blocked_by = Some(dep.clone());
                            }
                            None => runnable.push(i),
                        }
                    }

                    let results = join_all(runnable.iter().map(|&i| self.run_step(ctx, i))).await;
                    for (i, (started, result)) in runnable.into_iter().zip(results) {
                        Self::record(&mut report, i, started, result);
                    }
                }
            }
        }

        report.finish();
        if report.is_success() {
            info!("Plan '{}' completed successfully", self.name);
        } else {
            error!("Plan '{}' failed with {} error(s)", self.name, report.errors.len());
        }
        Ok(report)
    }

    /// Evaluate the plan and turn any failure into an error.
    pub async fn apply(&self, ctx: &DeployContext, mode: FailureMode) -> CompResult<PlanReport> {
        self.execute(ctx, mode).await?.into_result()
    }
}
