//! In-memory repositories
//!
//! All three repositories share one store behind a single lock, so the
//! multi-record operations are as atomic as their Postgres counterparts.

use async_trait::async_trait;
use chrono::Utc;
use sluice_core::domain::job::{Job, JobStatus};
use sluice_core::domain::log::LogEntry;
use sluice_core::domain::pipeline::{Pipeline, PipelineStatus};
use sluice_core::dto::admin::ResetReport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::{JobRepository, LogRepository, PipelineRepository, RepoResult};

#[derive(Default)]
struct StoreInner {
    pipelines: HashMap<Uuid, Pipeline>,
    jobs: HashMap<Uuid, Job>,
    logs: HashMap<Uuid, Vec<LogEntry>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn idle_job(job: &mut Job) -> bool {
    if job.status == JobStatus::Idle {
        return false;
    }
    job.status = JobStatus::Idle;
    job.updated_at = Utc::now();
    true
}

pub struct MemoryPipelineRepository {
    store: MemoryStore,
}

impl MemoryPipelineRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PipelineRepository for MemoryPipelineRepository {
    async fn create(&self, pipeline: &Pipeline, jobs: &[Job]) -> RepoResult<()> {
        let mut store = self.store.lock();
        store.pipelines.insert(pipeline.id, pipeline.clone());
        for job in jobs {
            store.jobs.insert(job.id, job.clone());
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Pipeline>> {
        Ok(self.store.lock().pipelines.get(&id).cloned())
    }

    async fn list_all(&self) -> RepoResult<Vec<Pipeline>> {
        let mut pipelines: Vec<Pipeline> = self.store.lock().pipelines.values().cloned().collect();
        pipelines.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pipelines)
    }

    async fn list_scheduled(&self) -> RepoResult<Vec<Pipeline>> {
        let mut pipelines: Vec<Pipeline> = self
            .store
            .lock()
            .pipelines
            .values()
            .filter(|p| p.schedule.is_some())
            .cloned()
            .collect();
        pipelines.sort_by_key(|p| p.created_at);
        Ok(pipelines)
    }

    async fn transition(&self, id: Uuid, from: &[PipelineStatus], to: PipelineStatus) -> RepoResult<bool> {
        let mut store = self.store.lock();
        match store.pipelines.get_mut(&id) {
            Some(pipeline) if from.contains(&pipeline.status) => {
                pipeline.status = to;
                pipeline.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn begin_run(&self, id: Uuid, run_id: Uuid) -> RepoResult<bool> {
        let now = Utc::now();
        let mut store = self.store.lock();
        match store.pipelines.get_mut(&id) {
            Some(pipeline) if !pipeline.status.is_active() => {
                pipeline.status = PipelineStatus::Waiting;
                pipeline.run_id = Some(run_id);
                pipeline.failed_job_id = None;
                pipeline.last_error = None;
                pipeline.started_at = Some(now);
                pipeline.finished_at = None;
                pipeline.updated_at = now;
            }
            _ => return Ok(false),
        }

        for job in store.jobs.values_mut().filter(|j| j.pipeline_id == id) {
            job.status = JobStatus::Waiting;
            job.retries_left = job.max_retries;
            job.last_error = None;
            job.started_at = None;
            job.finished_at = None;
            job.updated_at = now;
        }
        Ok(true)
    }

    async fn finish(
        &self,
        id: Uuid,
        from: &[PipelineStatus],
        to: PipelineStatus,
        failed_job_id: Option<Uuid>,
        error: Option<String>,
    ) -> RepoResult<bool> {
        let now = Utc::now();
        let mut store = self.store.lock();
        match store.pipelines.get_mut(&id) {
            Some(pipeline) if from.contains(&pipeline.status) => {
                pipeline.status = to;
                pipeline.failed_job_id = failed_job_id;
                pipeline.last_error = error;
                pipeline.finished_at = Some(now);
                pipeline.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset(&self, id: Uuid) -> RepoResult<ResetReport> {
        let mut store = self.store.lock();
        let mut report = ResetReport::default();

        if let Some(pipeline) = store.pipelines.get_mut(&id) {
            if pipeline.status != PipelineStatus::Idle {
                pipeline.status = PipelineStatus::Idle;
                pipeline.updated_at = Utc::now();
                report.pipelines += 1;
            }
        }
        for job in store.jobs.values_mut().filter(|j| j.pipeline_id == id) {
            if idle_job(job) {
                report.jobs += 1;
            }
        }
        Ok(report)
    }

    async fn reset_active(&self) -> RepoResult<ResetReport> {
        let mut store = self.store.lock();
        let mut report = ResetReport::default();
        let mut reset_ids = Vec::new();

        for pipeline in store.pipelines.values_mut() {
            if pipeline.status.is_active() {
                pipeline.status = PipelineStatus::Idle;
                pipeline.updated_at = Utc::now();
                reset_ids.push(pipeline.id);
            }
        }
        report.pipelines = reset_ids.len() as u64;

        for job in store.jobs.values_mut() {
            if (job.status.is_active() || reset_ids.contains(&job.pipeline_id)) && idle_job(job) {
                report.jobs += 1;
            }
        }
        Ok(report)
    }
}

pub struct MemoryJobRepository {
    store: MemoryStore,
}

impl MemoryJobRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Job>> {
        Ok(self.store.lock().jobs.get(&id).cloned())
    }

    async fn find_by_pipeline(&self, pipeline_id: Uuid) -> RepoResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .store
            .lock()
            .jobs
            .values()
            .filter(|j| j.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.position);
        Ok(jobs)
    }

    async fn claim_dispatch(&self, id: Uuid, from: &[JobStatus], expected_seq: i64) -> RepoResult<Option<i64>> {
        let now = Utc::now();
        let mut store = self.store.lock();
        match store.jobs.get_mut(&id) {
            Some(job) if from.contains(&job.status) && job.dispatch_seq == expected_seq => {
                job.dispatch_seq += 1;
                job.status = JobStatus::Running;
                job.started_at.get_or_insert(now);
                job.updated_at = now;
                Ok(Some(job.dispatch_seq))
            }
            _ => Ok(None),
        }
    }

    async fn complete(&self, id: Uuid, expected_seq: i64, status: JobStatus, error: Option<String>) -> RepoResult<bool> {
        let now = Utc::now();
        let mut store = self.store.lock();
        match store.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Running && job.dispatch_seq == expected_seq => {
                job.status = status;
                job.last_error = error;
                job.finished_at = Some(now);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
        error: Option<String>,
    ) -> RepoResult<bool> {
        let now = Utc::now();
        let mut store = self.store.lock();
        match store.jobs.get_mut(&id) {
            Some(job) if from.contains(&job.status) => {
                job.status = to;
                if error.is_some() {
                    job.last_error = error;
                }
                if to.is_terminal() {
                    job.finished_at = Some(now);
                }
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_retry(&self, id: Uuid, expected_seq: i64) -> RepoResult<Option<u32>> {
        let mut store = self.store.lock();
        match store.jobs.get_mut(&id) {
            Some(job)
                if job.status == JobStatus::Running
                    && job.dispatch_seq == expected_seq
                    && job.retries_left > 0 =>
            {
                job.retries_left -= 1;
                job.updated_at = Utc::now();
                Ok(Some(job.retries_left))
            }
            _ => Ok(None),
        }
    }
}

pub struct MemoryLogRepository {
    store: MemoryStore,
}

impl MemoryLogRepository {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl LogRepository for MemoryLogRepository {
    async fn append(&self, job_id: Uuid, entries: Vec<LogEntry>) -> RepoResult<()> {
        self.store.lock().logs.entry(job_id).or_default().extend(entries);
        Ok(())
    }

    async fn find_by_job(&self, job_id: Uuid) -> RepoResult<Vec<LogEntry>> {
        Ok(self.store.lock().logs.get(&job_id).cloned().unwrap_or_default())
    }
}
