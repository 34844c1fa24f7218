//! Kubernetes dispatcher.
//!
//! Submits each job as a `batch/v1` Job through the connection produced by
//! the configured [`Configurer`].
//!
//! # Plugin data
//!
//! Required: `api_url`, `auth_type`, `image`, `memory_request`,
//! `memory_limit`, plus the keys of the selected auth type (see
//! [`configurer`]). Optional: `namespace`, `node_selector`,
//! `security_context_run_as_user`, `security_context_run_as_group`,
//! `security_context_run_as_non_root`, `extra_service_discovery_hosts`.

pub mod client;
pub mod configurer;
pub mod job;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::PluginData;
use crate::dispatcher::{DispatcherDeps, JobDispatcher, JobLaunch};
use crate::error::{ConfigError, DispatchError};

pub use client::{JobSubmitter, RestJobSubmitter};
pub use configurer::{AuthType, Configurer, ConnectionDescriptor, Credential};
pub use job::{Job, JobTemplate};

const REQUIRED_KEYS: &[&str] = &["api_url", "auth_type", "image", "memory_request", "memory_limit"];

/// Dispatches jobs as Kubernetes Jobs.
pub struct KubernetesDispatcher {
    configurer: Arc<dyn Configurer>,
    submitter: Arc<dyn JobSubmitter>,
    template: JobTemplate,
}

impl std::fmt::Debug for KubernetesDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesDispatcher")
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl KubernetesDispatcher {
    /// Validates plugin data and builds the configurer for `auth_type`.
    ///
    /// The common keys and the auth type's keys are checked before any file
    /// or network access.
    pub async fn new(data: &PluginData, deps: &DispatcherDeps) -> Result<Self, ConfigError> {
        data.require(REQUIRED_KEYS)?;
        let auth_type: AuthType = data.get_required("auth_type")?.parse()?;
        data.require(auth_type.required_keys())?;
        let template = JobTemplate::from_plugin_data(data)?;

        let configurer = configurer::new_configurer(auth_type, data, deps).await?;
        debug!(auth_type = %auth_type, namespace = %template.namespace, "Kubernetes configurer ready");

        Ok(Self {
            configurer,
            submitter: Arc::new(RestJobSubmitter),
            template,
        })
    }

    /// Validates the job settings and uses the given configurer and submitter.
    pub fn with_parts(
        data: &PluginData,
        configurer: Arc<dyn Configurer>,
        submitter: Arc<dyn JobSubmitter>,
    ) -> Result<Self, ConfigError> {
        data.require(REQUIRED_KEYS)?;
        Ok(Self {
            configurer,
            submitter,
            template: JobTemplate::from_plugin_data(data)?,
        })
    }

    /// Builds the Job that [`JobDispatcher::dispatch_job`] would submit.
    pub fn build_job(&self, launch: &JobLaunch<'_>) -> Job {
        self.template.build(launch)
    }
}

#[async_trait]
impl JobDispatcher for KubernetesDispatcher {
    async fn dispatch_job(&self, job_id: &str, token: &str) -> Result<String, DispatchError> {
        let launch = JobLaunch::new(job_id, token)?;
        let job = self.build_job(&launch);

        let connection =
            self.configurer
                .connection()
                .await
                .map_err(|source| DispatchError::Connection {
                    job_id: job_id.to_string(),
                    source,
                })?;

        let uid = self
            .submitter
            .create_job(&connection, &self.template.namespace, &job)
            .await
            .map_err(|source| DispatchError::KubernetesSubmit {
                job_id: job_id.to_string(),
                source,
            })?;

        info!(
            job_id = %job_id,
            external_id = %uid,
            namespace = %self.template.namespace,
            image = %self.template.image,
            "Dispatched job to kubernetes"
        );
        Ok(uid)
    }
}
