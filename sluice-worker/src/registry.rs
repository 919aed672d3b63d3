//! Worker registry
//!
//! Maps the worker class name stored in a job's configuration to a factory
//! building the worker from the job's parameters.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

use crate::external::{LongRunningWorker, WaiterWorker};
use crate::long_poll::PollSchedule;
use crate::worker::{Worker, WorkerError};
use crate::workers::{self, Commenter, HttpOperation};

pub type WorkerFactory = Arc<dyn Fn(&JsonValue) -> Result<Box<dyn Worker>, WorkerError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct WorkerRegistry {
    factories: HashMap<String, WorkerFactory>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in worker
    pub fn standard(http: reqwest::Client, schedule: PollSchedule) -> Self {
        let mut registry = Self::new();

        registry.register(workers::COMMENTER, |_| Ok(Box::new(Commenter)));

        let (client, poll) = (http.clone(), schedule.clone());
        registry.register(workers::HTTP_JOB, move |params| {
            let operation = HttpOperation::from_params(client.clone(), params)?;
            Ok(Box::new(LongRunningWorker::new(
                workers::HTTP_JOB,
                workers::HTTP_JOB_WAITER,
                operation,
                poll.clone(),
            )))
        });

        registry.register(workers::HTTP_JOB_WAITER, move |params| {
            let operation = HttpOperation::from_params(http.clone(), params)?;
            Ok(Box::new(WaiterWorker::new(
                workers::HTTP_JOB_WAITER,
                operation,
                schedule.clone(),
            )))
        });

        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&JsonValue) -> Result<Box<dyn Worker>, WorkerError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds the worker for `name`; unknown names are fatal
    pub fn create(&self, name: &str, params: &JsonValue) -> Result<Box<dyn Worker>, WorkerError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| WorkerError::fatal(format!("unknown worker class '{}'", name)))?;
        factory(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::standard(reqwest::Client::new(), PollSchedule::default())
    }

    #[test]
    fn test_standard_registry_names() {
        assert_eq!(registry().names(), vec!["Commenter", "HttpJob", "HttpJobWaiter"]);
    }

    #[test]
    fn test_create_known_worker() {
        let worker = registry().create("Commenter", &JsonValue::Null).unwrap();
        assert_eq!(worker.name(), "Commenter");

        let params = json!({ "submit_url": "http://x/jobs", "status_url": "http://x/jobs/{id}" });
        assert_eq!(registry().create("HttpJob", &params).unwrap().name(), "HttpJob");
        assert_eq!(registry().create("HttpJobWaiter", &params).unwrap().name(), "HttpJobWaiter");
    }

    #[test]
    fn test_unknown_class_and_bad_params_are_fatal() {
        assert!(registry().create("BigQueryExport", &JsonValue::Null).err().unwrap().is_fatal());
        assert!(registry().create("HttpJob", &json!({})).err().unwrap().is_fatal());
    }
}
