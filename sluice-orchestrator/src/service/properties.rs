//! Randomized delivery sequences against the in-memory engine
//!
//! Each case builds a random acyclic pipeline of scripted jobs, starts it,
//! and then interleaves deliveries, redeliveries, stale tasks, stale
//! repository writes and operator stops. After every step a job that has
//! finished must still hold its terminal status, and the stored pipeline
//! status must equal the aggregation of its jobs.

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use sluice_core::domain::job::{JobStatus, RequiredOutcome};
use sluice_core::domain::task::TaskMessage;
use sluice_core::dto::pipeline::{ConditionDefinition, JobDefinition};
use sluice_core::graph::JobGraph;
use std::collections::HashMap;
use uuid::Uuid;

use crate::dispatcher::{START_TASK, TaskQueue};
use crate::service::pipeline;
use crate::service::runner::{TaskDisposition, run_task};
use crate::testing::{TestHarness, scripted};

#[derive(Debug, Clone)]
enum Action {
    /// Deliver the queued task at this position
    Deliver(prop::sample::Index),
    /// Deliver an already delivered task again
    Redeliver(prop::sample::Index),
    /// Deliver a queued task with its sequence moved back
    DeliverStale(prop::sample::Index, i64),
    /// Claim a job with an outdated sequence
    ClaimStale(prop::sample::Index, i64),
    /// Complete a job with an outdated sequence
    CompleteStale(prop::sample::Index, i64, bool),
    /// Spend a retry with an outdated sequence
    RetryStale(prop::sample::Index, i64),
    Stop,
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        6 => any::<prop::sample::Index>().prop_map(Action::Deliver),
        2 => any::<prop::sample::Index>().prop_map(Action::Redeliver),
        2 => (any::<prop::sample::Index>(), 1..3i64).prop_map(|(i, back)| Action::DeliverStale(i, back)),
        1 => (any::<prop::sample::Index>(), 1..3i64).prop_map(|(i, back)| Action::ClaimStale(i, back)),
        1 => (any::<prop::sample::Index>(), 1..3i64, any::<bool>())
            .prop_map(|(i, back, ok)| Action::CompleteStale(i, back, ok)),
        1 => (any::<prop::sample::Index>(), 1..3i64).prop_map(|(i, back)| Action::RetryStale(i, back)),
        1 => Just(Action::Stop),
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
    fn arb_job()(
        transient_failures in 0..3u32,
        fatal in prop::bool::weighted(0.3),
        max_retries in 0..3u32,
        edges in prop::collection::vec((any::<prop::sample::Index>(), arb_outcome()), 1..3),
    ) -> (u32, bool, u32, Vec<(prop::sample::Index, RequiredOutcome)>) {
        (transient_failures, fatal, max_retries, edges)
    }
}

prop_compose! {
    /// Conditions only point at earlier jobs, so the pipeline is acyclic
    fn arb_definitions()(jobs in prop::collection::vec(arb_job(), 1..6)) -> Vec<JobDefinition> {
        jobs.into_iter()
            .enumerate()
            .map(|(position, (transient_failures, fatal, max_retries, edges))| {
                let name = format!("j{position}");
                let mut def = scripted(&name, transient_failures, if fatal { "fatal" } else { "done" });
                def.max_retries = max_retries;
                if position > 0 {
                    for (index, outcome) in edges {
                        let job = format!("j{}", index.index(position));
                        if def.start_conditions.iter().all(|c| c.job != job) {
                            def.start_conditions.push(ConditionDefinition { job, outcome, pass_error: false });
                        }
                    }
                }
                def
            })
            .collect()
    }
}

async fn check_invariants(
    harness: &TestHarness,
    id: Uuid,
    finished: &mut HashMap<Uuid, JobStatus>,
) -> Result<(), TestCaseError> {
    let jobs = harness.jobs(id).await;
    for job in &jobs {
        match finished.get(&job.id) {
            Some(status) => prop_assert_eq!(job.status, *status, "job {} left its terminal status", job.name),
            None if job.status.is_terminal() => {
                finished.insert(job.id, job.status);
            }
            None => {}
        }
    }

    let pipeline = harness.pipeline(id).await;
    prop_assert_eq!(pipeline.status, JobGraph::new(&jobs).aggregate());
    Ok(())
}

async fn run_actions(definitions: Vec<JobDefinition>, actions: Vec<Action>) -> Result<(), TestCaseError> {
    let harness = TestHarness::new();
    let id = harness.create(definitions).await.pipeline.id;
    harness.start(id).await;

    let mut finished = HashMap::new();
    let mut delivered: Vec<TaskMessage> = Vec::new();
    check_invariants(&harness, id, &mut finished).await?;

    for action in actions {
        match action {
            Action::Deliver(index) => {
                let queued: Vec<_> = harness
                    .queue
                    .snapshot()
                    .into_iter()
                    .filter(|t| t.topic == START_TASK.name)
                    .collect();
                if queued.is_empty() {
                    continue;
                }
                let task = &queued[index.index(queued.len())];
                harness.queue.ack(task.id).await.unwrap();
                let message: TaskMessage = serde_json::from_value(task.payload.clone()).unwrap();
                run_task(&harness.state, message.clone()).await.unwrap();
                delivered.push(message);
            }
            Action::Redeliver(index) => {
                if delivered.is_empty() {
                    continue;
                }
                let message = delivered[index.index(delivered.len())].clone();
                let disposition = run_task(&harness.state, message).await.unwrap();
                prop_assert_eq!(disposition, TaskDisposition::Discarded);
            }
            Action::DeliverStale(index, back) => {
                let pending = harness.pending_tasks();
                if pending.is_empty() {
                    continue;
                }
                let mut message = pending[index.index(pending.len())].clone();
                message.sequence -= back;
                let disposition = run_task(&harness.state, message).await.unwrap();
                prop_assert_eq!(disposition, TaskDisposition::Discarded);
            }
            Action::ClaimStale(index, back) => {
                let jobs = harness.jobs(id).await;
                let job = &jobs[index.index(jobs.len())];
                let claimed = harness
                    .state
                    .repos
                    .jobs
                    .claim_dispatch(job.id, &JobStatus::ACTIVE, job.dispatch_seq - back)
                    .await
                    .unwrap();
                prop_assert_eq!(claimed, None);
            }
            Action::CompleteStale(index, back, succeeded) => {
                let jobs = harness.jobs(id).await;
                let job = &jobs[index.index(jobs.len())];
                let status = if succeeded { JobStatus::Succeeded } else { JobStatus::Failed };
                let applied = harness
                    .state
                    .repos
                    .jobs
                    .complete(job.id, job.dispatch_seq - back, status, None)
                    .await
                    .unwrap();
                prop_assert!(!applied);
            }
            Action::RetryStale(index, back) => {
                let jobs = harness.jobs(id).await;
                let job = &jobs[index.index(jobs.len())];
                let remaining = harness
                    .state
                    .repos
                    .jobs
                    .consume_retry(job.id, job.dispatch_seq - back)
                    .await
                    .unwrap();
                prop_assert_eq!(remaining, None);
            }
            Action::Stop => {
                let active = harness.pipeline(id).await.status.is_active();
                prop_assert_eq!(pipeline::stop_pipeline(&harness.state, id).await.is_ok(), active);
            }
        }

        check_invariants(&harness, id, &mut finished).await?;
    }

    // with every task delivered, nothing is left running
    harness.drain().await;
    check_invariants(&harness, id, &mut finished).await?;
    let jobs = harness.jobs(id).await;
    prop_assert!(jobs.iter().all(|j| !j.status.is_active()));
    prop_assert!(!harness.pipeline(id).await.status.is_active());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_delivery_sequences_keep_status_consistent(
        definitions in arb_definitions(),
        actions in prop::collection::vec(arb_action(), 0..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_actions(definitions, actions))?;
    }
}
