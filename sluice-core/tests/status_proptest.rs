use chrono::Utc;
use proptest::prelude::*;
use sluice_core::domain::job::{Job, JobStatus, RequiredOutcome, StartCondition};
use sluice_core::domain::pipeline::PipelineStatus;
use sluice_core::graph::{JobGraph, Readiness};
use uuid::Uuid;

fn arb_status() -> impl Strategy<Value = JobStatus> {
    prop_oneof![
        Just(JobStatus::Idle),
        Just(JobStatus::Waiting),
        Just(JobStatus::Running),
        Just(JobStatus::Succeeded),
        Just(JobStatus::Failed),
    ]
}

fn arb_outcome() -> impl Strategy<Value = RequiredOutcome> {
    prop_oneof![
        Just(RequiredOutcome::Succeeded),
        Just(RequiredOutcome::Failed),
        Just(RequiredOutcome::Finished),
    ]
}

prop_compose! {
    fn arb_job_def()(
        status in arb_status(),
        edges in prop::collection::vec((any::<prop::sample::Index>(), arb_outcome()), 0..3),
    ) -> (JobStatus, Vec<(prop::sample::Index, RequiredOutcome)>) {
        (status, edges)
    }
}

prop_compose! {
    /// A pipeline whose conditions only point at earlier jobs, so it is acyclic
    fn arb_pipeline()(
        defs in prop::collection::vec(arb_job_def(), 1..8),
    ) -> Vec<Job> {
        let ids: Vec<Uuid> = (0..defs.len()).map(|_| Uuid::new_v4()).collect();
        defs
            .into_iter()
            .enumerate()
            .map(|(position, (status, edges))| {
                let start_conditions = if position == 0 {
                    Vec::new()
                } else {
                    edges
                        .into_iter()
                        .map(|(index, outcome)| StartCondition {
                            preceding_job_id: ids[index.index(position)],
                            outcome,
                            pass_error: false,
                        })
                        .collect()
                };
                Job {
                    id: ids[position],
                    pipeline_id: Uuid::nil(),
                    name: format!("job-{position}"),
                    position: position as i32,
                    status,
                    worker_class: "Commenter".to_string(),
                    params: serde_json::Value::Null,
                    start_conditions,
                    max_retries: 0,
                    retries_left: 0,
                    dispatch_seq: 0,
                    last_error: None,
                    updated_at: Utc::now(),
                    started_at: None,
                    finished_at: None,
                }
            })
            .collect()
    }
}

proptest! {
    #[test]
    fn test_aggregate_ignores_record_order(jobs in arb_pipeline(), seed in any::<u64>()) {
        let expected = JobGraph::new(&jobs).aggregate();

        let mut shuffled = jobs.clone();
        let len = shuffled.len();
        for i in 0..len {
            let j = ((seed.rotate_left(i as u32) as usize) ^ i) % len;
            shuffled.swap(i, j);
        }

        prop_assert_eq!(JobGraph::new(&shuffled).aggregate(), expected);
        prop_assert_eq!(JobGraph::new(&jobs).aggregate(), expected);
    }

    #[test]
    fn test_aggregate_matches_job_statuses(jobs in arb_pipeline()) {
        let graph = JobGraph::new(&jobs);
        let status = graph.aggregate();

        let unhandled_failure = jobs
            .iter()
            .any(|j| j.status == JobStatus::Failed && !graph.failure_is_handled(j.id));
        let any_active = jobs.iter().any(|j| j.status.is_active());
        let any_failed = jobs.iter().any(|j| j.status == JobStatus::Failed);
        let all_idle = jobs.iter().all(|j| j.status == JobStatus::Idle);

        if unhandled_failure {
            prop_assert_eq!(status, PipelineStatus::Failed);
        } else if any_active {
            prop_assert!(status.is_active());
        } else if any_failed {
            prop_assert_eq!(status, PipelineStatus::Failed);
        } else if all_idle {
            prop_assert_eq!(status, PipelineStatus::Idle);
        } else {
            prop_assert_eq!(status, PipelineStatus::Succeeded);
        }

        if status == PipelineStatus::Failed {
            prop_assert!(graph.culprit().is_some());
        }
    }

    #[test]
    fn test_roots_are_always_ready(jobs in arb_pipeline()) {
        let graph = JobGraph::new(&jobs);
        for root in graph.roots() {
            prop_assert_eq!(graph.readiness(root), Readiness::Ready);
        }
    }
}
