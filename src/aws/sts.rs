//! Presigned `sts:GetCallerIdentity` requests used as EKS bearer tokens.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{service_endpoint, sigv4, CredentialsProvider};
use crate::error::AwsError;

/// Header EKS uses to bind a presigned identity request to one cluster.
pub const CLUSTER_ID_HEADER: &str = "x-k8s-aws-id";

/// Lifetime of the presigned request itself. EKS accepts the token for
/// fifteen minutes regardless of this value.
pub const PRESIGN_EXPIRES_SECONDS: u64 = 60;

/// Produces a presigned `GetCallerIdentity` URL for a cluster.
#[async_trait]
pub trait TokenPresigner: Send + Sync {
    async fn presign_caller_identity(&self, cluster_name: &str) -> Result<String, AwsError>;
}

/// Presigns against the regional STS endpoint.
pub struct StsPresigner {
    credentials: Arc<dyn CredentialsProvider>,
    region: String,
}

impl StsPresigner {
    pub fn new(credentials: Arc<dyn CredentialsProvider>, region: impl Into<String>) -> Self {
        Self {
            credentials,
            region: region.into(),
        }
    }
}

#[async_trait]
impl TokenPresigner for StsPresigner {
    async fn presign_caller_identity(&self, cluster_name: &str) -> Result<String, AwsError> {
        let credentials = self.credentials.credentials().await?;

        let mut url = service_endpoint("sts", &self.region)?;
        url.query_pairs_mut()
            .append_pair("Action", "GetCallerIdentity")
            .append_pair("Version", "2011-06-15");

        let mut headers = BTreeMap::new();
        headers.insert(CLUSTER_ID_HEADER.to_string(), cluster_name.to_string());

        let params = sigv4::SigningParams {
            credentials: &credentials,
            region: &self.region,
            service: "sts",
            time: Utc::now(),
        };

        // The token is always replayed by the API server as a GET.
        sigv4::presign_url(&params, "GET", &url, &headers, PRESIGN_EXPIRES_SECONDS)
    }
}
