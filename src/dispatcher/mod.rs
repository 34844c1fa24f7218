//! The job dispatcher facade.
//!
//! Callers construct exactly one [`JobDispatcher`] at startup with
//! [`new_job_dispatcher`] and then call [`JobDispatcher::dispatch_job`] once
//! per job. Construction validates the selected backend's configuration and
//! fails fast; no backend retries, queues or monitors jobs.
//!
//! # Backends
//!
//! | Type         | Launches               | External id      |
//! |--------------|------------------------|------------------|
//! | `kubernetes` | a `batch/v1` Job       | Job UID          |
//! | `docker`     | a container            | container id     |
//! | `ecs`        | an ECS task            | task ARN         |
//! | `local`      | an in-process executor | `"local"`        |

pub mod launch;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::{DispatcherConfig, DispatcherType};
use crate::docker::DockerDispatcher;
use crate::ecs::EcsDispatcher;
use crate::error::{ConfigError, DispatchError};
use crate::kubernetes::configurer::IdentityTokenSource;
use crate::kubernetes::KubernetesDispatcher;
use crate::local::{JobExecutor, LocalDispatcher};

pub use launch::{JobEnvironment, JobLaunch};

/// Launches a single job on a compute substrate.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Submits the job and returns the substrate-assigned identifier.
    ///
    /// `token` is forwarded into the launched job's environment and is never
    /// inspected. Dropping the returned future cancels the outbound call.
    async fn dispatch_job(&self, job_id: &str, token: &str) -> Result<String, DispatchError>;
}

/// Collaborators that cannot be expressed as plugin data strings.
#[derive(Clone, Default)]
pub struct DispatcherDeps {
    /// Identity token source for the `runner_id_token` Kubernetes auth type.
    pub identity_token_source: Option<Arc<dyn IdentityTokenSource>>,
    /// In-process job executor for the `local` backend.
    pub executor: Option<Arc<dyn JobExecutor>>,
}

impl DispatcherDeps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity_token_source(mut self, source: Arc<dyn IdentityTokenSource>) -> Self {
        self.identity_token_source = Some(source);
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }
}

/// Constructs the dispatcher selected by `config`.
pub async fn new_job_dispatcher(
    config: &DispatcherConfig,
    deps: DispatcherDeps,
) -> Result<Box<dyn JobDispatcher>, ConfigError> {
    let data = &config.plugin_data;

    let dispatcher: Box<dyn JobDispatcher> = match config.dispatcher_type {
        DispatcherType::Kubernetes => Box::new(KubernetesDispatcher::new(data, &deps).await?),
        DispatcherType::Docker => Box::new(DockerDispatcher::new(data)?),
        DispatcherType::Ecs => Box::new(EcsDispatcher::new(data)?),
        DispatcherType::Local => Box::new(LocalDispatcher::new(data, deps.executor)?),
    };

    info!(dispatcher_type = %config.dispatcher_type, "Job dispatcher initialized");
    Ok(dispatcher)
}
