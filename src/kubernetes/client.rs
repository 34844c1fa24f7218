//! Job submission over the Kubernetes REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity};
use serde::Deserialize;

use super::configurer::{ConnectionDescriptor, Credential};
use super::job::Job;
use crate::error::KubeApiError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates Jobs on an API server.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Creates `job` in `namespace` and returns its UID.
    async fn create_job(
        &self,
        connection: &ConnectionDescriptor,
        namespace: &str,
        job: &Job,
    ) -> Result<String, KubeApiError>;
}

#[derive(Debug, Deserialize)]
struct CreatedJob {
    metadata: CreatedMeta,
}

#[derive(Debug, Deserialize)]
struct CreatedMeta {
    uid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Status {
    message: Option<String>,
}

/// [`JobSubmitter`] that builds a fresh reqwest client per connection, so
/// rotated credentials and CAs always take effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestJobSubmitter;

impl RestJobSubmitter {
    fn client(connection: &ConnectionDescriptor) -> Result<Client, KubeApiError> {
        let mut builder = Client::builder().connect_timeout(CONNECT_TIMEOUT);

        if let Some(ca) = &connection.ca_data {
            let certs = Certificate::from_pem_bundle(ca)
                .map_err(|e| KubeApiError::Tls(format!("invalid CA bundle: {e}")))?;
            if certs.is_empty() {
                return Err(KubeApiError::Tls("CA bundle contains no certificates".to_string()));
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let Credential::ClientCertificate { cert_pem, key_pem } = &connection.credential {
            let mut pem = cert_pem.clone();
            if !pem.ends_with(b"\n") {
                pem.push(b'\n');
            }
            pem.extend_from_slice(key_pem);
            let identity = Identity::from_pem(&pem)
                .map_err(|e| KubeApiError::Tls(format!("invalid client certificate: {e}")))?;
            builder = builder.identity(identity);
        }

        builder
            .build()
            .map_err(|e| KubeApiError::Tls(format!("failed to build HTTP client: {e}")))
    }
}

/// `{endpoint}/apis/batch/v1/namespaces/{namespace}/jobs`
pub fn jobs_url(endpoint: &str, namespace: &str) -> String {
    format!(
        "{}/apis/batch/v1/namespaces/{}/jobs",
        endpoint.trim_end_matches('/'),
        urlencoding::encode(namespace)
    )
}

#[async_trait]
impl JobSubmitter for RestJobSubmitter {
    async fn create_job(
        &self,
        connection: &ConnectionDescriptor,
        namespace: &str,
        job: &Job,
    ) -> Result<String, KubeApiError> {
        let client = Self::client(connection)?;
        let url = jobs_url(&connection.endpoint, namespace);

        let mut request = client.post(&url).json(job);
        if let Credential::BearerToken(token) = &connection.credential {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| KubeApiError::Request {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| KubeApiError::Request {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(KubeApiError::Api {
                status: status.as_u16(),
                message: status_message(&body),
            });
        }

        let created: CreatedJob = serde_json::from_str(&body)
            .map_err(|e| KubeApiError::ParseError(e.to_string()))?;
        created
            .metadata
            .uid
            .ok_or_else(|| KubeApiError::ParseError("created job has no metadata.uid".to_string()))
    }
}

/// Extracts `Status.message`, falling back to the raw body.
fn status_message(body: &str) -> String {
    serde_json::from_str::<Status>(body)
        .ok()
        .and_then(|s| s.message)
        .unwrap_or_else(|| body.trim().to_string())
}
