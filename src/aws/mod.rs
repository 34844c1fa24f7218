//! Minimal AWS clients used by the EKS configurer and the ECS dispatcher.
//!
//! Only the handful of calls the dispatcher needs are implemented:
//! - `eks:DescribeCluster` (REST JSON)
//! - `sts:GetCallerIdentity`, presigned as an EKS bearer token
//! - `ecs:RunTask` (JSON 1.1)
//!
//! Requests are signed with SigV4 using credentials from a
//! [`CredentialsProvider`].

pub mod credentials;
pub mod ecs;
pub mod eks;
pub mod sigv4;
pub mod sts;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Method, Url};
use serde::Deserialize;

use crate::error::AwsError;

pub use credentials::{AwsCredentials, CredentialsProvider, DefaultCredentialsChain, StaticCredentials};
pub use ecs::{EcsClient, RunTaskRequest, RunTaskResponse, TaskRunner};
pub use eks::{ClusterDescriber, ClusterInfo, EksClient};
pub use sts::{StsPresigner, TokenPresigner};

/// Returns the public endpoint of `service` in `region`.
pub fn service_endpoint(service: &str, region: &str) -> Result<Url, AwsError> {
    let suffix = if region.starts_with("cn-") {
        "amazonaws.com.cn"
    } else {
        "amazonaws.com"
    };
    let raw = format!("https://{service}.{region}.{suffix}/");
    Url::parse(&raw).map_err(|_| AwsError::InvalidEndpoint(raw))
}

/// HTTP client that signs every request for a single service and region.
#[derive(Clone)]
pub(crate) struct SignedClient {
    http: Client,
    credentials: Arc<dyn CredentialsProvider>,
    region: String,
    service: &'static str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

impl SignedClient {
    pub(crate) fn new(
        credentials: Arc<dyn CredentialsProvider>,
        region: impl Into<String>,
        service: &'static str,
    ) -> Result<Self, AwsError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AwsError::RequestFailed(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            credentials,
            region: region.into(),
            service,
        })
    }

    pub(crate) fn region(&self) -> &str {
        &self.region
    }

    /// Signs and sends a request, returning the response body on success.
    pub(crate) async fn send(
        &self,
        method: Method,
        url: Url,
        headers: BTreeMap<String, String>,
        body: Vec<u8>,
    ) -> Result<String, AwsError> {
        let credentials = self.credentials.credentials().await?;
        let params = sigv4::SigningParams {
            credentials: &credentials,
            region: &self.region,
            service: self.service,
            time: Utc::now(),
        };
        let auth_headers = sigv4::sign_headers(&params, method.as_str(), &url, &headers, &body)?;

        let mut request = self.http.request(method, url);
        for (name, value) in headers.iter().chain(auth_headers.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| AwsError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AwsError::RequestFailed(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(AwsError::Api {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        Ok(text)
    }
}

/// Extracts a readable message from an AWS JSON error body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error_type,
            message: Some(message),
        }) => match error_type {
            Some(t) => format!("{}: {}", t.rsplit('#').next().unwrap_or(&t), message),
            None => message,
        },
        _ => body.to_string(),
    }
}
