//! ECS dispatcher.
//!
//! Runs each job as a single ECS task from a pre-registered task definition,
//! overriding the executor container's environment with the job's variables.
//!
//! # Plugin data
//!
//! Required: `region`, `task_definition`, `cluster`, `subnets`, `launch_type`,
//! `api_url`. Optional: `extra_service_discovery_hosts`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::aws::ecs::{
    AwsVpcConfiguration, ContainerOverride, KeyValuePair, NetworkConfiguration, RunTaskResponse,
    TaskOverride,
};
use crate::aws::{DefaultCredentialsChain, EcsClient, RunTaskRequest, TaskRunner};
use crate::config::PluginData;
use crate::dispatcher::{JobDispatcher, JobEnvironment, JobLaunch};
use crate::error::{ConfigError, DispatchError};

const REQUIRED_KEYS: &[&str] = &[
    "region",
    "task_definition",
    "cluster",
    "subnets",
    "launch_type",
    "api_url",
];

/// Name of the container in the task definition that runs the job executor.
pub const EXECUTOR_CONTAINER_NAME: &str = "main";

/// ECS compute mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchType {
    Ec2,
    Fargate,
}

impl LaunchType {
    /// The value ECS expects on the wire.
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::Ec2 => "EC2",
            Self::Fargate => "FARGATE",
        }
    }
}

impl fmt::Display for LaunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_api_str())
    }
}

impl FromStr for LaunchType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ec2" => Ok(Self::Ec2),
            "fargate" => Ok(Self::Fargate),
            other => Err(ConfigError::InvalidLaunchType(other.to_string())),
        }
    }
}

/// Dispatches jobs as ECS tasks.
pub struct EcsDispatcher {
    runner: Arc<dyn TaskRunner>,
    task_definition: String,
    cluster: String,
    subnets: Vec<String>,
    launch_type: LaunchType,
    environment: JobEnvironment,
}

impl fmt::Debug for EcsDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EcsDispatcher")
            .field("task_definition", &self.task_definition)
            .field("cluster", &self.cluster)
            .field("subnets", &self.subnets)
            .field("launch_type", &self.launch_type)
            .finish()
    }
}

impl EcsDispatcher {
    /// Validates plugin data and builds an ECS client for the configured region.
    pub fn new(data: &PluginData) -> Result<Self, ConfigError> {
        data.require(REQUIRED_KEYS)?;
        // Validate everything before touching credentials.
        let _: LaunchType = data.get_required("launch_type")?.parse()?;

        let credentials = DefaultCredentialsChain::new()?;
        let client = EcsClient::new(Arc::new(credentials), data.get_required("region")?)?;
        Self::with_runner(data, Arc::new(client))
    }

    /// Validates plugin data and uses the given task runner.
    pub fn with_runner(
        data: &PluginData,
        runner: Arc<dyn TaskRunner>,
    ) -> Result<Self, ConfigError> {
        data.require(REQUIRED_KEYS)?;

        let launch_type = data.get_required("launch_type")?.parse()?;
        let subnets = data.get_list("subnets");
        if subnets.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "subnets".to_string(),
                reason: "at least one subnet is required".to_string(),
            });
        }

        Ok(Self {
            runner,
            task_definition: data.get_required("task_definition")?.to_string(),
            cluster: data.get_required("cluster")?.to_string(),
            subnets,
            launch_type,
            environment: JobEnvironment::new(
                data.get_required("api_url")?,
                &data.get_list("extra_service_discovery_hosts"),
            )?,
        })
    }

    /// Builds the `RunTask` request for one job.
    pub fn run_task_request(&self, launch: &JobLaunch<'_>) -> RunTaskRequest {
        RunTaskRequest {
            cluster: self.cluster.clone(),
            task_definition: self.task_definition.clone(),
            launch_type: self.launch_type.as_api_str().to_string(),
            count: 1,
            network_configuration: NetworkConfiguration {
                awsvpc_configuration: AwsVpcConfiguration {
                    subnets: self.subnets.clone(),
                    assign_public_ip: "DISABLED".to_string(),
                },
            },
            overrides: TaskOverride {
                container_overrides: vec![ContainerOverride {
                    name: EXECUTOR_CONTAINER_NAME.to_string(),
                    environment: self
                        .environment
                        .core_vars(launch)
                        .into_iter()
                        .map(|(name, value)| KeyValuePair {
                            name: name.to_string(),
                            value,
                        })
                        .collect(),
                }],
            },
        }
    }
}

/// Interprets a `RunTask` response, returning the ARN of the started task.
///
/// Reported failures take precedence over an empty task list.
fn task_arn(job_id: &str, response: RunTaskResponse) -> Result<String, DispatchError> {
    if let Some(failure) = response.failures.into_iter().next() {
        let mut message = failure
            .reason
            .filter(|r| !r.is_empty())
            .or(failure.arn)
            .unwrap_or_else(|| "unknown".to_string());
        if let Some(detail) = failure.detail.filter(|d| !d.is_empty()) {
            message = format!("{message}; {detail}");
        }
        return Err(DispatchError::TaskFailure {
            job_id: job_id.to_string(),
            message,
        });
    }

    response
        .tasks
        .into_iter()
        .next()
        .and_then(|task| task.task_arn)
        .ok_or_else(|| DispatchError::NoTasksCreated(job_id.to_string()))
}

#[async_trait]
impl JobDispatcher for EcsDispatcher {
    async fn dispatch_job(&self, job_id: &str, token: &str) -> Result<String, DispatchError> {
        let launch = JobLaunch::new(job_id, token)?;
        let request = self.run_task_request(&launch);

        let response = self
            .runner
            .run_task(&request)
            .await
            .map_err(|source| DispatchError::TaskSubmit {
                job_id: job_id.to_string(),
                source,
            })?;

        let arn = task_arn(job_id, response)?;
        info!(job_id = %job_id, external_id = %arn, cluster = %self.cluster, "Dispatched job to ECS");
        Ok(arn)
    }
}
