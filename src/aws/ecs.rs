//! ECS `RunTask` over the JSON 1.1 protocol.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{service_endpoint, CredentialsProvider, SignedClient};
use crate::error::AwsError;

const RUN_TASK_TARGET: &str = "AmazonEC2ContainerServiceV20141113.RunTask";
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskRequest {
    pub cluster: String,
    pub task_definition: String,
    pub launch_type: String,
    pub count: u32,
    pub network_configuration: NetworkConfiguration,
    pub overrides: TaskOverride,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfiguration {
    pub awsvpc_configuration: AwsVpcConfiguration,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AwsVpcConfiguration {
    pub subnets: Vec<String>,
    pub assign_public_ip: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskOverride {
    pub container_overrides: Vec<ContainerOverride>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerOverride {
    pub name: String,
    pub environment: Vec<KeyValuePair>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KeyValuePair {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskResponse {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub failures: Vec<Failure>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_arn: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub arn: Option<String>,
    pub reason: Option<String>,
    pub detail: Option<String>,
}

/// Submits ECS task runs.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskResponse, AwsError>;
}

/// SigV4-signed ECS client.
pub struct EcsClient {
    client: SignedClient,
}

impl EcsClient {
    pub fn new(
        credentials: Arc<dyn CredentialsProvider>,
        region: impl Into<String>,
    ) -> Result<Self, AwsError> {
        Ok(Self {
            client: SignedClient::new(credentials, region, "ecs")?,
        })
    }
}

#[async_trait]
impl TaskRunner for EcsClient {
    async fn run_task(&self, request: &RunTaskRequest) -> Result<RunTaskResponse, AwsError> {
        let url = service_endpoint("ecs", self.client.region())?;
        let body = serde_json::to_vec(request)
            .map_err(|e| AwsError::RequestFailed(format!("Failed to encode RunTask: {e}")))?;

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), JSON_CONTENT_TYPE.to_string());
        headers.insert("x-amz-target".to_string(), RUN_TASK_TARGET.to_string());

        let text = self.client.send(Method::POST, url, headers, body).await?;
        serde_json::from_str(&text)
            .map_err(|e| AwsError::ParseError(format!("Failed to parse RunTask response: {e}")))
    }
}
