//! Engine test harness
//!
//! Wires the services to the in-memory repositories and task queue, with a
//! scripted worker, a sleeping worker and a fake external operation
//! registered next to the built-in workers. Tasks are delivered by hand so tests control ordering.

use async_trait::async_trait;
use serde_json::json;
use sluice_core::domain::job::{Job, RequiredOutcome};
use sluice_core::domain::pipeline::Pipeline;
use sluice_core::domain::task::TaskMessage;
use sluice_core::dto::pipeline::{
    ConditionDefinition, CreatePipeline, JobDefinition, PipelineDetails, StartPipelineResponse,
};
use sluice_worker::{
    Continuation, ExternalOperation, LongRunningWorker, OperationState, PollSchedule, Step,
    WaiterWorker, Worker, WorkerContext, WorkerError, WorkerRegistry,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::dispatcher::memory::InMemoryTaskQueue;
use crate::dispatcher::{Dispatcher, START_TASK, TaskQueue};
use crate::repository::Repositories;
use crate::service::pipeline;
use crate::service::runner::{self, TaskDisposition};
use crate::state::{AppState, EngineSettings};

pub const SCRIPTED: &str = "Scripted";
pub const SLOW_EXPORT: &str = "SlowExport";
pub const SLOW_EXPORT_WAITER: &str = "SlowExportWaiter";
pub const SLEEPER: &str = "Sleeper";
pub const PUSH_TOKEN: &str = "s3cret";

type Attempts = Arc<Mutex<HashMap<Uuid, u32>>>;

/// Fails transiently a given number of times, then finishes as scripted
struct ScriptedWorker {
    attempts: Attempts,
    transient_failures: u32,
    result: String,
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn name(&self) -> &str {
        SCRIPTED
    }

    async fn do_work(&self, ctx: &WorkerContext) -> Result<Step, WorkerError> {
        // let concurrent deliveries interleave
        tokio::task::yield_now().await;

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(ctx.job_id).or_insert(0);
            *count += 1;
            *count
        };

        if attempt <= self.transient_failures {
            return Err(anyhow::anyhow!("scripted transient failure {}", attempt).into());
        }

        match self.result.as_str() {
            "fatal" => Err(WorkerError::fatal("scripted fatal failure")),
            "continue" => Ok(Step::Continue(Continuation {
                worker_class: SCRIPTED.to_string(),
                params: ctx.params.clone(),
                checkpoint: None,
                delay: Duration::from_secs(60),
            })),
            _ => Ok(Step::Done),
        }
    }
}

/// Sleeps for `sleep_secs` before finishing
struct SleepingWorker {
    sleep: Duration,
}

#[async_trait]
impl Worker for SleepingWorker {
    fn name(&self) -> &str {
        SLEEPER
    }

    async fn do_work(&self, _ctx: &WorkerContext) -> Result<Step, WorkerError> {
        tokio::time::sleep(self.sleep).await;
        Ok(Step::Done)
    }
}

/// External operation that completes on its 15th successful status poll
pub struct SlowOperation {
    submits: AtomicUsize,
    polls: AtomicUsize,
    failing_polls: AtomicUsize,
    done_after: usize,
}

impl SlowOperation {
    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    /// Makes the next `count` status polls fail transiently
    pub fn fail_next_polls(&self, count: usize) {
        self.failing_polls.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExternalOperation for SlowOperation {
    async fn submit(&self, _ctx: &WorkerContext) -> Result<String, WorkerError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("op-{}", n))
    }

    async fn status(&self, _ctx: &WorkerContext, handle: &str) -> Result<OperationState, WorkerError> {
        let failing = self.failing_polls.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_polls.store(failing - 1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("status of {} unavailable", handle).into());
        }
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(if n >= self.done_after {
            OperationState::Succeeded
        } else {
            OperationState::Pending
        })
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub queue: Arc<InMemoryTaskQueue>,
    pub operation: Arc<SlowOperation>,
    attempts: Attempts,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings {
            retry_base_delay: Duration::from_secs(30),
            retry_max_delay: Duration::from_secs(600),
            execution_timeout: Duration::from_secs(540),
        })
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let attempts: Attempts = Arc::default();
        let operation = Arc::new(SlowOperation {
            submits: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            failing_polls: AtomicUsize::new(0),
            done_after: 15,
        });

        let schedule = PollSchedule {
            safety_threshold: Duration::from_secs(60),
            repoll_interval: Duration::from_secs(120),
            ..PollSchedule::default()
        };
        let mut workers = WorkerRegistry::standard(reqwest::Client::new(), schedule.clone());

        let script_attempts = Arc::clone(&attempts);
        workers.register(SCRIPTED, move |params| {
            Ok(Box::new(ScriptedWorker {
                attempts: Arc::clone(&script_attempts),
                transient_failures: params["transient_failures"].as_u64().unwrap_or(0) as u32,
                result: params["result"].as_str().unwrap_or("done").to_string(),
            }))
        });

        workers.register(SLEEPER, |params| {
            Ok(Box::new(SleepingWorker {
                sleep: Duration::from_secs(params["sleep_secs"].as_u64().unwrap_or(0)),
            }))
        });

        let (op, poll) = (Arc::clone(&operation), schedule.clone());
        workers.register(SLOW_EXPORT, move |_| {
            Ok(Box::new(LongRunningWorker::new(
                SLOW_EXPORT,
                SLOW_EXPORT_WAITER,
                Arc::clone(&op),
                poll.clone(),
            )))
        });
        let op = Arc::clone(&operation);
        workers.register(SLOW_EXPORT_WAITER, move |_| {
            Ok(Box::new(WaiterWorker::new(SLOW_EXPORT_WAITER, Arc::clone(&op), schedule.clone())))
        });

        let state = AppState::new(
            Repositories::in_memory(),
            Dispatcher::new(queue.clone()),
            workers,
            settings,
            PUSH_TOKEN,
        );

        Self {
            state,
            queue,
            operation,
            attempts,
        }
    }

    pub async fn create(&self, jobs: Vec<JobDefinition>) -> PipelineDetails {
        pipeline::create_pipeline(&self.state, pipeline_request(jobs))
            .await
            .unwrap()
    }

    /// Starts a pipeline that is expected to accept, returning the run id
    pub async fn start(&self, id: Uuid) -> Uuid {
        match pipeline::start_pipeline(&self.state, id).await.unwrap() {
            StartPipelineResponse::Accepted { run_id } => run_id,
            other => panic!("pipeline {} not started: {:?}", id, other),
        }
    }

    pub async fn pipeline(&self, id: Uuid) -> Pipeline {
        pipeline::get_pipeline(&self.state, id).await.unwrap()
    }

    pub async fn jobs(&self, id: Uuid) -> Vec<Job> {
        pipeline::list_jobs(&self.state, id).await.unwrap()
    }

    /// Queued job steps in enqueue order, regardless of their delay
    pub fn pending_tasks(&self) -> Vec<TaskMessage> {
        self.queue
            .snapshot()
            .into_iter()
            .filter(|t| t.topic == START_TASK.name)
            .map(|t| serde_json::from_value(t.payload).unwrap())
            .collect()
    }

    /// Removes and returns every queued job step
    pub async fn take_tasks(&self) -> Vec<TaskMessage> {
        let mut tasks = Vec::new();
        for task in self.queue.snapshot() {
            if task.topic == START_TASK.name {
                self.queue.ack(task.id).await.unwrap();
                tasks.push(serde_json::from_value(task.payload).unwrap());
            }
        }
        tasks
    }

    /// Delivers the oldest queued job step, ignoring its delay
    pub async fn deliver_next(&self) -> Option<TaskDisposition> {
        let task = self
            .queue
            .snapshot()
            .into_iter()
            .find(|t| t.topic == START_TASK.name)?;
        self.queue.ack(task.id).await.unwrap();

        let message: TaskMessage = serde_json::from_value(task.payload).unwrap();
        Some(runner::run_task(&self.state, message).await.unwrap())
    }

    /// Delivers job steps until the queue is empty
    pub async fn drain(&self) {
        for _ in 0..100 {
            if self.deliver_next().await.is_none() {
                return;
            }
        }
        panic!("task queue did not drain");
    }

    /// Times the scripted worker ran for a job
    pub fn attempts(&self, job_id: Uuid) -> u32 {
        self.attempts.lock().unwrap().get(&job_id).copied().unwrap_or(0)
    }

    /// Serves the API on an ephemeral port and returns its base URL
    pub async fn serve(&self) -> String {
        let app = crate::api::create_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }
}

pub fn pipeline_request(jobs: Vec<JobDefinition>) -> CreatePipeline {
    CreatePipeline {
        name: "nightly-sync".to_string(),
        schedule: None,
        jobs,
    }
}

/// A `Commenter` job without start conditions
pub fn job(name: &str) -> JobDefinition {
    JobDefinition {
        name: name.to_string(),
        worker_class: "Commenter".to_string(),
        params: json!({ "comment": format!("running {}", name) }),
        max_retries: 0,
        start_conditions: Vec::new(),
    }
}

pub fn job_after(name: &str, predecessor: &str, outcome: RequiredOutcome) -> JobDefinition {
    JobDefinition {
        start_conditions: vec![ConditionDefinition {
            job: predecessor.to_string(),
            outcome,
            pass_error: false,
        }],
        ..job(name)
    }
}

pub fn scripted(name: &str, transient_failures: u32, result: &str) -> JobDefinition {
    JobDefinition {
        worker_class: SCRIPTED.to_string(),
        params: json!({ "transient_failures": transient_failures, "result": result }),
        ..job(name)
    }
}

pub fn sleeper(name: &str, sleep_secs: u64, max_retries: u32) -> JobDefinition {
    JobDefinition {
        worker_class: SLEEPER.to_string(),
        params: json!({ "sleep_secs": sleep_secs }),
        max_retries,
        ..job(name)
    }
}

pub fn scripted_after(
    name: &str,
    predecessor: &str,
    outcome: RequiredOutcome,
    transient_failures: u32,
    result: &str,
) -> JobDefinition {
    JobDefinition {
        start_conditions: job_after(name, predecessor, outcome).start_conditions,
        ..scripted(name, transient_failures, result)
    }
}
