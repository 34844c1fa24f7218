//! Connection strategies for the Kubernetes API.
//!
//! A [`Configurer`] produces the endpoint, CA bundle and credential used to
//! submit a Job. The strategy is selected once from the `auth_type` plugin
//! data key:
//!
//! | `auth_type`       | Strategy                   | Extra required keys             |
//! |-------------------|----------------------------|---------------------------------|
//! | `in_cluster`      | [`InClusterConfigurer`]    |                                 |
//! | `kube_config`     | [`KubeConfigConfigurer`]   | `kube_config_path`              |
//! | `x509_cert`       | [`X509Configurer`]         | `kube_server`, `client_cert`, `client_key` |
//! | `runner_id_token` | [`RunnerTokenConfigurer`]  | `kube_server`                   |
//! | `eks_iam`         | [`EksIamConfigurer`]       | `region`, `eks_cluster`         |

pub mod eks_iam;
pub mod in_cluster;
pub mod kube_config;
pub mod runner_token;
pub mod x509;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PluginData;
use crate::dispatcher::DispatcherDeps;
use crate::error::{ConfigError, CredentialError};

pub use eks_iam::EksIamConfigurer;
pub use in_cluster::InClusterConfigurer;
pub use kube_config::KubeConfigConfigurer;
pub use runner_token::RunnerTokenConfigurer;
pub use x509::X509Configurer;

/// Kubernetes authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    InCluster,
    KubeConfig,
    X509Cert,
    RunnerIdToken,
    EksIam,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InCluster => "in_cluster",
            Self::KubeConfig => "kube_config",
            Self::X509Cert => "x509_cert",
            Self::RunnerIdToken => "runner_id_token",
            Self::EksIam => "eks_iam",
        }
    }

    /// Plugin data keys this mode needs on top of the common cluster keys.
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            Self::InCluster => &[],
            Self::KubeConfig => &["kube_config_path"],
            Self::X509Cert => &["kube_server", "client_cert", "client_key"],
            Self::RunnerIdToken => &["kube_server"],
            Self::EksIam => &["region", "eks_cluster"],
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_cluster" => Ok(Self::InCluster),
            "kube_config" => Ok(Self::KubeConfig),
            "x509_cert" => Ok(Self::X509Cert),
            "runner_id_token" => Ok(Self::RunnerIdToken),
            "eks_iam" => Ok(Self::EksIam),
            other => Err(ConfigError::UnknownAuthType(other.to_string())),
        }
    }
}

/// How a request authenticates to the API server.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    BearerToken(String),
    ClientCertificate { cert_pem: Vec<u8>, key_pem: Vec<u8> },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BearerToken(_) => f.write_str("BearerToken(<redacted>)"),
            Self::ClientCertificate { .. } => f.write_str("ClientCertificate(<redacted>)"),
        }
    }
}

/// Everything needed to reach the API server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Base URL of the API server, e.g. `https://10.0.0.1:443`.
    pub endpoint: String,
    /// PEM-encoded CA bundle to trust, if the server is not publicly trusted.
    pub ca_data: Option<Vec<u8>>,
    pub credential: Credential,
}

/// Produces a connection descriptor on demand.
///
/// Called once per dispatched job, so implementations may rotate credentials
/// between calls.
#[async_trait]
pub trait Configurer: Send + Sync {
    async fn connection(&self) -> Result<ConnectionDescriptor, CredentialError>;
}

/// Supplies the runner's own identity token for `runner_id_token` auth.
#[async_trait]
pub trait IdentityTokenSource: Send + Sync {
    async fn token(&self) -> anyhow::Result<String>;
}

/// Reads the identity token from a file on every call.
#[derive(Debug, Clone)]
pub struct FileIdentityTokenSource {
    path: PathBuf,
}

impl FileIdentityTokenSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl IdentityTokenSource for FileIdentityTokenSource {
    async fn token(&self) -> anyhow::Result<String> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            anyhow::anyhow!("failed to read identity token from {}: {e}", self.path.display())
        })?;
        Ok(raw.trim().to_string())
    }
}

/// Builds the configurer for `auth_type`, validating its required keys first.
pub async fn new_configurer(
    auth_type: AuthType,
    data: &PluginData,
    deps: &DispatcherDeps,
) -> Result<Arc<dyn Configurer>, ConfigError> {
    data.require(auth_type.required_keys())?;

    let configurer: Arc<dyn Configurer> = match auth_type {
        AuthType::InCluster => Arc::new(InClusterConfigurer::new()),
        AuthType::KubeConfig => Arc::new(KubeConfigConfigurer::new(
            data.get_required("kube_config_path")?,
        )?),
        AuthType::X509Cert => Arc::new(X509Configurer::new(data)?),
        AuthType::RunnerIdToken => Arc::new(RunnerTokenConfigurer::new(
            data,
            deps.identity_token_source.clone(),
        )?),
        AuthType::EksIam => Arc::new(EksIamConfigurer::new(data).await?),
    };
    Ok(configurer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_auth_type_round_trip() {
        for auth in [
            AuthType::InCluster,
            AuthType::KubeConfig,
            AuthType::X509Cert,
            AuthType::RunnerIdToken,
            AuthType::EksIam,
        ] {
            assert_eq!(auth.as_str().parse::<AuthType>().unwrap(), auth);
        }
        assert!(matches!(
            "oidc".parse::<AuthType>(),
            Err(ConfigError::UnknownAuthType(ref t)) if t == "oidc"
        ));
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let bearer = Credential::BearerToken("sekrit".to_string());
        assert!(!format!("{bearer:?}").contains("sekrit"));

        let cert = Credential::ClientCertificate {
            cert_pem: b"CERT".to_vec(),
            key_pem: b"KEY".to_vec(),
        };
        let rendered = format!("{cert:?}");
        assert!(!rendered.contains("KEY"));
    }

    #[tokio::test]
    async fn test_missing_mode_keys_fail_before_any_io() {
        let data = PluginData::new().with("region", "us-east-1");
        let err = new_configurer(AuthType::EksIam, &data, &DispatcherDeps::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingKeys { ref keys } if keys == &vec!["eks_cluster".to_string()]));

        let err = new_configurer(AuthType::X509Cert, &PluginData::new(), &DispatcherDeps::new())
            .await
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "missing required plugin data keys: client_cert, client_key, kube_server"
        );
    }

    #[tokio::test]
    async fn test_file_identity_token_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "runner-jwt").unwrap();

        let source = FileIdentityTokenSource::new(file.path());
        assert_eq!(source.token().await.unwrap(), "runner-jwt");

        let missing = FileIdentityTokenSource::new("/nonexistent/token");
        assert!(missing.token().await.is_err());
    }
}
