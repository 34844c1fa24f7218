//! In-process dispatcher for local development.
//!
//! # Observability
//!
//! [`LocalDispatcher::dispatch_job`] spawns the executor as a detached tokio
//! task and returns [`LOCAL_EXTERNAL_ID`] immediately, before the executor has
//! started. The task is not tied to the caller's future: dropping or
//! cancelling the `dispatch_job` call does not stop it. Executor failures are
//! logged and never reach the caller, so a successful dispatch does not mean
//! the job started. Use this backend only for local development.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::config::PluginData;
use crate::dispatcher::{JobDispatcher, JobEnvironment, JobLaunch};
use crate::error::{ConfigError, DispatchError};

/// External id returned for every locally dispatched job.
pub const LOCAL_EXTERNAL_ID: &str = "local";

const REQUIRED_KEYS: &[&str] = &["api_url"];

/// Everything an in-process executor needs to run one job.
#[derive(Clone)]
pub struct LocalJob {
    pub job_id: String,
    pub token: String,
    pub api_url: String,
    pub discovery_hosts: Vec<String>,
}

impl fmt::Debug for LocalJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalJob")
            .field("job_id", &self.job_id)
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("discovery_hosts", &self.discovery_hosts)
            .finish()
    }
}

/// Runs a job to completion inside the current process.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: LocalJob) -> anyhow::Result<()>;
}

/// Dispatches jobs to a background task in this process.
pub struct LocalDispatcher {
    environment: JobEnvironment,
    executor: Arc<dyn JobExecutor>,
}

impl LocalDispatcher {
    pub fn new(
        data: &PluginData,
        executor: Option<Arc<dyn JobExecutor>>,
    ) -> Result<Self, ConfigError> {
        data.require(REQUIRED_KEYS)?;
        let environment = JobEnvironment::new(
            data.get_required("api_url")?,
            &data.get_list("extra_service_discovery_hosts"),
        )?;
        let executor = executor.ok_or(ConfigError::MissingDependency(
            "local dispatcher requires an in-process job executor",
        ))?;

        Ok(Self {
            environment,
            executor,
        })
    }
}

#[async_trait]
impl JobDispatcher for LocalDispatcher {
    async fn dispatch_job(&self, job_id: &str, token: &str) -> Result<String, DispatchError> {
        let launch = JobLaunch::new(job_id, token)?;
        let job = LocalJob {
            job_id: launch.job_id().to_string(),
            token: launch.token().to_string(),
            api_url: self.environment.api_url().to_string(),
            discovery_hosts: self.environment.discovery_hosts().to_vec(),
        };

        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let job_id = job.job_id.clone();
            if let Err(e) = executor.execute(job).await {
                error!(job_id = %job_id, error = %e, "Local job executor failed");
            }
        });

        info!(job_id = %job_id, "Dispatched job to local executor");
        Ok(LOCAL_EXTERNAL_ID.to_string())
    }
}
