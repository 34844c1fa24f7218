//! EKS `DescribeCluster`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;

use super::{service_endpoint, CredentialsProvider, SignedClient};
use crate::error::AwsError;

/// The parts of an EKS cluster description needed to reach its API server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    pub endpoint: Option<String>,
    /// Base64-encoded PEM bundle, as reported by EKS.
    pub certificate_authority_data: Option<String>,
}

/// Looks up an EKS cluster's endpoint and certificate authority.
#[async_trait]
pub trait ClusterDescriber: Send + Sync {
    async fn describe_cluster(&self, name: &str) -> Result<ClusterInfo, AwsError>;
}

#[derive(Debug, Deserialize)]
struct DescribeClusterResponse {
    cluster: ClusterBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterBody {
    endpoint: Option<String>,
    certificate_authority: Option<CertificateAuthority>,
}

#[derive(Debug, Deserialize)]
struct CertificateAuthority {
    data: Option<String>,
}

/// SigV4-signed EKS REST client.
pub struct EksClient {
    client: SignedClient,
}

impl EksClient {
    pub fn new(
        credentials: Arc<dyn CredentialsProvider>,
        region: impl Into<String>,
    ) -> Result<Self, AwsError> {
        Ok(Self {
            client: SignedClient::new(credentials, region, "eks")?,
        })
    }
}

#[async_trait]
impl ClusterDescriber for EksClient {
    async fn describe_cluster(&self, name: &str) -> Result<ClusterInfo, AwsError> {
        let path = format!("clusters/{}", urlencoding::encode(name));
        let url = service_endpoint("eks", self.client.region())?
            .join(&path)
            .map_err(|_| AwsError::InvalidEndpoint(path))?;

        let body = self
            .client
            .send(Method::GET, url, BTreeMap::new(), Vec::new())
            .await?;

        parse_describe_cluster(&body)
    }
}

fn parse_describe_cluster(body: &str) -> Result<ClusterInfo, AwsError> {
    let response: DescribeClusterResponse = serde_json::from_str(body)
        .map_err(|e| AwsError::ParseError(format!("Failed to parse DescribeCluster: {e}")))?;

    Ok(ClusterInfo {
        endpoint: response.cluster.endpoint,
        certificate_authority_data: response.cluster.certificate_authority.and_then(|ca| ca.data),
    })
}
