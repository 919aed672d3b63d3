use async_trait::async_trait;

use crate::context::WorkerContext;
use crate::worker::{Step, Worker, WorkerError};

/// Does nothing but leave a note in the job log
///
/// Useful as a placeholder node, or as a failure handler that records which
/// upstream jobs failed.
pub struct Commenter;

#[async_trait]
impl Worker for Commenter {
    fn name(&self) -> &str {
        super::COMMENTER
    }

    async fn do_work(&self, ctx: &WorkerContext) -> Result<Step, WorkerError> {
        if let Some(comment) = ctx.params.get("comment").and_then(|c| c.as_str()) {
            ctx.log_info(comment);
        }
        for failure in ctx.upstream_failures() {
            ctx.log_warning(format!(
                "Upstream job '{}' failed: {}",
                failure.job_name,
                failure.error.as_deref().unwrap_or("no error recorded")
            ));
        }
        Ok(Step::Done)
    }
}
