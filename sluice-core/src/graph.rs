//! Job dependency graph
//!
//! Start-condition evaluation and pipeline status aggregation. Everything in
//! this module is a pure function of the job records it is built from; the
//! orchestrator reloads jobs and rebuilds the graph after every transition.

use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

use crate::domain::job::{Job, JobStatus, RequiredOutcome, StartCondition};
use crate::domain::pipeline::PipelineStatus;
use crate::dto::pipeline::JobDefinition;

/// Whether a waiting job may start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Every start condition is met
    Ready,
    /// Some predecessor has not finished yet
    Blocked,
    /// The branch leading here was not taken in this run
    Unreachable,
    /// A predecessor failed and nothing handles that failure
    ShortCircuit { predecessor: Uuid },
}

impl Readiness {
    fn rank(&self) -> u8 {
        match self {
            Readiness::Ready => 0,
            Readiness::Blocked => 1,
            Readiness::Unreachable => 2,
            Readiness::ShortCircuit { .. } => 3,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    status: JobStatus,
    conditions: Vec<StartCondition>,
    executed: bool,
}

/// Dependency graph of one pipeline's jobs
#[derive(Debug, Clone)]
pub struct JobGraph {
    nodes: HashMap<Uuid, Node>,
    /// Job ids in definition order
    order: Vec<Uuid>,
    dependents: HashMap<Uuid, Vec<Uuid>>,
}

impl JobGraph {
    pub fn new(jobs: &[Job]) -> Self {
        let mut sorted: Vec<&Job> = jobs.iter().collect();
        sorted.sort_by_key(|job| job.position);

        let mut nodes = HashMap::with_capacity(sorted.len());
        let mut order = Vec::with_capacity(sorted.len());
        let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

        for job in sorted {
            for condition in &job.start_conditions {
                let entry = dependents.entry(condition.preceding_job_id).or_default();
                if !entry.contains(&job.id) {
                    entry.push(job.id);
                }
            }
            order.push(job.id);
            nodes.insert(
                job.id,
                Node {
                    status: job.status,
                    conditions: job.start_conditions.clone(),
                    executed: job.started_at.is_some(),
                },
            );
        }

        Self {
            nodes,
            order,
            dependents,
        }
    }

    pub fn status(&self, id: Uuid) -> Option<JobStatus> {
        self.nodes.get(&id).map(|node| node.status)
    }

    /// Jobs with at least one start condition on `id`, in definition order
    pub fn dependents(&self, id: Uuid) -> &[Uuid] {
        self.dependents.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Jobs without start conditions
    pub fn roots(&self) -> Vec<Uuid> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.nodes[id].conditions.is_empty())
            .collect()
    }

    /// A failure of `id` is handled when some dependent is meant to run after it
    pub fn failure_is_handled(&self, id: Uuid) -> bool {
        self.dependents(id).iter().any(|dependent| {
            self.nodes[dependent]
                .conditions
                .iter()
                .any(|c| c.preceding_job_id == id && c.outcome.tolerates_failure())
        })
    }

    pub fn readiness(&self, id: Uuid) -> Readiness {
        let Some(node) = self.nodes.get(&id) else {
            return Readiness::Blocked;
        };

        let mut result = Readiness::Ready;
        for condition in &node.conditions {
            let verdict = self.evaluate(condition);
            if verdict.rank() > result.rank() {
                result = verdict;
            }
        }
        result
    }

    fn evaluate(&self, condition: &StartCondition) -> Readiness {
        let predecessor = condition.preceding_job_id;
        match self.status(predecessor) {
            None | Some(JobStatus::Idle) => Readiness::Unreachable,
            Some(JobStatus::Waiting | JobStatus::Running) => Readiness::Blocked,
            Some(status) if condition.outcome.accepts(status) => Readiness::Ready,
            Some(JobStatus::Failed) if condition.outcome == RequiredOutcome::Succeeded => {
                if self.failure_is_handled(predecessor) {
                    Readiness::Unreachable
                } else {
                    Readiness::ShortCircuit { predecessor }
                }
            }
            Some(_) => Readiness::Unreachable,
        }
    }

    /// Failed predecessors whose error should be handed to `id`'s worker
    pub fn upstream_failures(&self, id: Uuid) -> Vec<Uuid> {
        self.nodes
            .get(&id)
            .map(|node| {
                node.conditions
                    .iter()
                    .filter(|c| c.pass_error && self.status(c.preceding_job_id) == Some(JobStatus::Failed))
                    .map(|c| c.preceding_job_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pipeline status implied by the current job statuses
    pub fn aggregate(&self) -> PipelineStatus {
        let statuses: Vec<(Uuid, JobStatus)> = self
            .order
            .iter()
            .map(|id| (*id, self.nodes[id].status))
            .collect();

        if statuses
            .iter()
            .any(|(id, status)| *status == JobStatus::Failed && !self.failure_is_handled(*id))
        {
            return PipelineStatus::Failed;
        }

        if statuses.iter().any(|(_, status)| status.is_active()) {
            let all_waiting = statuses
                .iter()
                .filter(|(_, status)| *status != JobStatus::Idle)
                .all(|(_, status)| *status == JobStatus::Waiting);
            return if all_waiting {
                PipelineStatus::Waiting
            } else {
                PipelineStatus::Running
            };
        }

        if statuses.iter().any(|(_, status)| *status == JobStatus::Failed) {
            PipelineStatus::Failed
        } else if statuses.iter().any(|(_, status)| *status == JobStatus::Succeeded) {
            PipelineStatus::Succeeded
        } else {
            PipelineStatus::Idle
        }
    }

    /// The job to blame for a failed pipeline
    ///
    /// Prefers the first unhandled failure that actually executed, then any
    /// executed failure, then any failure at all.
    pub fn culprit(&self) -> Option<Uuid> {
        let failed: Vec<Uuid> = self
            .order
            .iter()
            .copied()
            .filter(|id| self.nodes[id].status == JobStatus::Failed)
            .collect();

        failed
            .iter()
            .copied()
            .find(|id| self.nodes[id].executed && !self.failure_is_handled(*id))
            .or_else(|| failed.iter().copied().find(|id| self.nodes[id].executed))
            .or_else(|| failed.first().copied())
    }
}

/// Structural problems in a pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("pipeline must define at least one job")]
    NoJobs,
    #[error("job #{0} has an empty name")]
    EmptyName(usize),
    #[error("job name '{0}' is used more than once")]
    DuplicateName(String),
    #[error("job '{job}' depends on unknown job '{predecessor}'")]
    UnknownPredecessor { job: String, predecessor: String },
    #[error("job '{0}' depends on itself")]
    SelfDependency(String),
    #[error("start conditions form a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Validates names, references and acyclicity of a pipeline definition
pub fn validate_definitions(jobs: &[JobDefinition]) -> Result<(), GraphError> {
    if jobs.is_empty() {
        return Err(GraphError::NoJobs);
    }

    let mut names = HashSet::with_capacity(jobs.len());
    for (index, job) in jobs.iter().enumerate() {
        if job.name.trim().is_empty() {
            return Err(GraphError::EmptyName(index));
        }
        if !names.insert(job.name.as_str()) {
            return Err(GraphError::DuplicateName(job.name.clone()));
        }
    }

    for job in jobs {
        for condition in &job.start_conditions {
            if condition.job == job.name {
                return Err(GraphError::SelfDependency(job.name.clone()));
            }
            if !names.contains(condition.job.as_str()) {
                return Err(GraphError::UnknownPredecessor {
                    job: job.name.clone(),
                    predecessor: condition.job.clone(),
                });
            }
        }
    }

    // Kahn's algorithm; whatever is left over sits on a cycle.
    let mut in_degree: HashMap<&str, usize> = jobs.iter().map(|j| (j.name.as_str(), 0)).collect();
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for job in jobs {
        let predecessors: HashSet<&str> = job.start_conditions.iter().map(|c| c.job.as_str()).collect();
        for predecessor in predecessors {
            edges.entry(predecessor).or_default().push(job.name.as_str());
            *in_degree.entry(job.name.as_str()).or_default() += 1;
        }
    }

    let mut queue: VecDeque<&str> = jobs
        .iter()
        .map(|j| j.name.as_str())
        .filter(|name| in_degree[name] == 0)
        .collect();
    let mut visited = 0;
    while let Some(name) = queue.pop_front() {
        visited += 1;
        for next in edges.get(name).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    if visited < jobs.len() {
        let cycle = jobs
            .iter()
            .filter(|j| in_degree[j.name.as_str()] > 0)
            .map(|j| j.name.clone())
            .collect();
        return Err(GraphError::Cycle(cycle));
    }

    Ok(())
}
