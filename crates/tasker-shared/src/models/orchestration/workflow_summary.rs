//! # Task Workflow Summary
//!
//! The execution context plus DAG-shape analytics: ready and root step ids,
//! topological depth, efficiency and parallelism classification. Consumed by
//! the analytics endpoints and the discovery component's processing-mode
//! decision.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use uuid::Uuid;

use crate::errors::TaskerResult;
use crate::models::core::workflow_step_edge::WorkflowStepEdge;

use super::backoff::BackoffCalculator;
use super::execution_context::{ExecutionStatus, TaskExecutionContext};
use super::step_readiness::StepReadiness;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEfficiency {
    Optimal,
    Recovering,
    Processing,
    Blocked,
    Waiting,
}

impl fmt::Display for WorkflowEfficiency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowEfficiency::Optimal => "optimal",
            WorkflowEfficiency::Recovering => "recovering",
            WorkflowEfficiency::Processing => "processing",
            WorkflowEfficiency::Blocked => "blocked",
            WorkflowEfficiency::Waiting => "waiting",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelismPotential {
    HighParallelism,
    ModerateParallelism,
    SequentialOnly,
    NoReadyWork,
}

impl fmt::Display for ParallelismPotential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParallelismPotential::HighParallelism => "high_parallelism",
            ParallelismPotential::ModerateParallelism => "moderate_parallelism",
            ParallelismPotential::SequentialOnly => "sequential_only",
            ParallelismPotential::NoReadyWork => "no_ready_work",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWorkflowSummary {
    #[serde(flatten)]
    pub context: TaskExecutionContext,
    /// Ready steps ordered by step uuid for reproducible replays
    pub ready_step_ids: Vec<Uuid>,
    pub root_step_ids: Vec<Uuid>,
    pub root_step_count: u32,
    pub workflow_efficiency: WorkflowEfficiency,
    pub parallelism_potential: ParallelismPotential,
}

impl TaskWorkflowSummary {
    /// Build the summary from an evaluated readiness set. Pure.
    pub fn from_readiness(task_uuid: Uuid, readiness: &[StepReadiness]) -> TaskWorkflowSummary {
        let context = TaskExecutionContext::from_readiness(task_uuid, readiness);

        let mut ready_step_ids: Vec<Uuid> = readiness
            .iter()
            .filter(|s| s.ready_for_execution)
            .map(|s| s.workflow_step_uuid)
            .collect();
        ready_step_ids.sort();

        let mut root_step_ids: Vec<Uuid> = readiness
            .iter()
            .filter(|s| s.total_parents == 0)
            .map(|s| s.workflow_step_uuid)
            .collect();
        root_step_ids.sort();

        let workflow_efficiency = classify_efficiency(&context);
        let parallelism_potential = classify_parallelism(ready_step_ids.len());

        TaskWorkflowSummary {
            root_step_count: root_step_ids.len() as u32,
            context,
            ready_step_ids,
            root_step_ids,
            workflow_efficiency,
            parallelism_potential,
        }
    }

    pub async fn for_task(
        pool: &PgPool,
        task_uuid: Uuid,
        backoff: &BackoffCalculator,
    ) -> TaskerResult<TaskWorkflowSummary> {
        let readiness = StepReadiness::for_task(pool, task_uuid, backoff).await?;
        Ok(Self::from_readiness(task_uuid, &readiness))
    }
}

fn classify_efficiency(context: &TaskExecutionContext) -> WorkflowEfficiency {
    match context.execution_status {
        ExecutionStatus::BlockedByFailures => WorkflowEfficiency::Blocked,
        ExecutionStatus::HasReadySteps if context.failed_steps > 0 => {
            WorkflowEfficiency::Recovering
        }
        ExecutionStatus::HasReadySteps | ExecutionStatus::AllComplete => {
            WorkflowEfficiency::Optimal
        }
        ExecutionStatus::Processing => WorkflowEfficiency::Processing,
        ExecutionStatus::WaitingForDependencies => WorkflowEfficiency::Waiting,
    }
}

fn classify_parallelism(ready_count: usize) -> ParallelismPotential {
    match ready_count {
        0 => ParallelismPotential::NoReadyWork,
        1 => ParallelismPotential::SequentialOnly,
        2 => ParallelismPotential::ModerateParallelism,
        _ => ParallelismPotential::HighParallelism,
    }
}

/// Topological depth of every step: roots at level 0, each consumer one past
/// its deepest producer. Pure; assumes the edge set is acyclic (enforced at
/// insert time).
pub fn dependency_levels(
    step_uuids: &[Uuid],
    edges: &[(Uuid, Uuid)],
) -> HashMap<Uuid, i32> {
    let mut in_degree: HashMap<Uuid, usize> = step_uuids.iter().map(|s| (*s, 0)).collect();
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (from, to) in edges {
        *in_degree.entry(*to).or_insert(0) += 1;
        children.entry(*from).or_default().push(*to);
    }

    let mut levels: HashMap<Uuid, i32> = HashMap::new();
    let mut frontier: Vec<Uuid> = step_uuids
        .iter()
        .filter(|s| in_degree.get(s).copied().unwrap_or(0) == 0)
        .copied()
        .collect();
    for root in &frontier {
        levels.insert(*root, 0);
    }

    while let Some(step) = frontier.pop() {
        let level = levels[&step];
        for child in children.get(&step).cloned().unwrap_or_default() {
            let child_level = levels.entry(child).or_insert(level + 1);
            *child_level = (*child_level).max(level + 1);
            let Some(degree) = in_degree.get_mut(&child) else {
                continue;
            };
            *degree -= 1;
            if *degree == 0 {
                frontier.push(child);
            }
        }
    }

    levels
}

/// Load the edge list of a task and compute dependency levels
pub async fn dependency_levels_for_task(
    pool: &PgPool,
    task_uuid: Uuid,
    step_uuids: &[Uuid],
) -> TaskerResult<HashMap<Uuid, i32>> {
    let edges = WorkflowStepEdge::list_by_task(pool, task_uuid).await?;
    let pairs: Vec<(Uuid, Uuid)> = edges
        .iter()
        .map(|e| (e.from_step_uuid, e.to_step_uuid))
        .collect();
    Ok(dependency_levels(step_uuids, &pairs))
}
