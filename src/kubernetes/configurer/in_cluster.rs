//! Ambient service-account credentials of the pod this process runs in.

use std::env;
use std::path::PathBuf;

use async_trait::async_trait;

use super::{Configurer, ConnectionDescriptor, Credential};
use crate::error::CredentialError;

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";
const PORT_ENV: &str = "KUBERNETES_SERVICE_PORT";

/// Uses the mounted service-account token and CA.
///
/// The token file is re-read on every call since projected tokens rotate.
#[derive(Debug, Clone)]
pub struct InClusterConfigurer {
    service_account_dir: PathBuf,
    endpoint: Option<String>,
}

impl Default for InClusterConfigurer {
    fn default() -> Self {
        Self::new()
    }
}

impl InClusterConfigurer {
    pub fn new() -> Self {
        Self {
            service_account_dir: PathBuf::from(SERVICE_ACCOUNT_DIR),
            endpoint: None,
        }
    }

    /// Reads `token` and `ca.crt` from `dir` instead of the standard mount.
    pub fn with_service_account_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.service_account_dir = dir.into();
        self
    }

    /// Uses a fixed endpoint instead of the service environment variables.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn resolve_endpoint(&self) -> Result<String, CredentialError> {
        if let Some(endpoint) = &self.endpoint {
            return Ok(endpoint.clone());
        }

        let host = env::var(HOST_ENV)
            .map_err(|_| CredentialError::InClusterUnavailable(format!("{HOST_ENV} is not set")))?;
        let port = env::var(PORT_ENV)
            .map_err(|_| CredentialError::InClusterUnavailable(format!("{PORT_ENV} is not set")))?;

        if host.contains(':') {
            Ok(format!("https://[{host}]:{port}"))
        } else {
            Ok(format!("https://{host}:{port}"))
        }
    }
}

#[async_trait]
impl Configurer for InClusterConfigurer {
    async fn connection(&self) -> Result<ConnectionDescriptor, CredentialError> {
        let endpoint = self.resolve_endpoint()?;

        let token_path = self.service_account_dir.join("token");
        let token = tokio::fs::read_to_string(&token_path).await.map_err(|e| {
            CredentialError::InClusterUnavailable(format!(
                "failed to read service account token {}: {e}",
                token_path.display()
            ))
        })?;

        let ca_path = self.service_account_dir.join("ca.crt");
        let ca_data = tokio::fs::read(&ca_path).await.map_err(|e| {
            CredentialError::InClusterUnavailable(format!(
                "failed to read service account CA {}: {e}",
                ca_path.display()
            ))
        })?;

        Ok(ConnectionDescriptor {
            endpoint,
            ca_data: Some(ca_data),
            credential: Credential::BearerToken(token.trim().to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_account(token: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token"), token).unwrap();
        std::fs::write(dir.path().join("ca.crt"), "-----BEGIN CERTIFICATE-----\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_reads_mounted_credentials() {
        let dir = service_account("sa-token\n");
        let configurer = InClusterConfigurer::new()
            .with_service_account_dir(dir.path())
            .with_endpoint("https://10.96.0.1:443");

        let conn = configurer.connection().await.unwrap();
        assert_eq!(conn.endpoint, "https://10.96.0.1:443");
        assert_eq!(conn.credential, Credential::BearerToken("sa-token".to_string()));
        assert!(conn.ca_data.is_some());
    }

    #[tokio::test]
    async fn test_token_is_reread_on_every_call() {
        let dir = service_account("first");
        let configurer = InClusterConfigurer::new()
            .with_service_account_dir(dir.path())
            .with_endpoint("https://10.96.0.1:443");

        configurer.connection().await.unwrap();
        std::fs::write(dir.path().join("token"), "rotated").unwrap();

        let conn = configurer.connection().await.unwrap();
        assert_eq!(conn.credential, Credential::BearerToken("rotated".to_string()));
    }

    #[tokio::test]
    async fn test_missing_mount_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let configurer = InClusterConfigurer::new()
            .with_service_account_dir(dir.path())
            .with_endpoint("https://10.96.0.1:443");

        let err = configurer.connection().await.unwrap_err();
        assert!(matches!(err, CredentialError::InClusterUnavailable(_)));
        assert!(err.to_string().contains("token"));
    }
}
