//! Connection settings loaded from a kubeconfig file.
//!
//! Supports the subset of kubeconfig a dispatcher needs: the current (or
//! first) context, inline or file-based CA data, and static token or client
//! certificate users. Exec and auth-provider plugins are rejected.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;

use super::{Configurer, ConnectionDescriptor, Credential};
use crate::error::{ConfigError, CredentialError};

#[derive(Debug, Deserialize)]
struct KubeConfig {
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
    #[serde(default)]
    clusters: Vec<NamedCluster>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<NamedUser>,
}

#[derive(Debug, Deserialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Cluster {
    server: String,
    certificate_authority_data: Option<String>,
    certificate_authority: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(Debug, Deserialize)]
struct Context {
    cluster: String,
    user: String,
}

#[derive(Debug, Deserialize)]
struct NamedUser {
    name: String,
    #[serde(default)]
    user: User,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct User {
    token: Option<String>,
    #[serde(rename = "tokenFile")]
    token_file: Option<String>,
    client_certificate_data: Option<String>,
    client_certificate: Option<String>,
    client_key_data: Option<String>,
    client_key: Option<String>,
    exec: Option<serde_yaml::Value>,
    auth_provider: Option<serde_yaml::Value>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("token_file", &self.token_file)
            .field("client_certificate", &self.client_certificate)
            .field("client_key", &self.client_key)
            .finish_non_exhaustive()
    }
}

/// Loads connection settings from a kubeconfig on every call.
#[derive(Debug, Clone)]
pub struct KubeConfigConfigurer {
    path: PathBuf,
}

impl KubeConfigConfigurer {
    /// Fails if `path` does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        Ok(Self { path })
    }

    fn error(&self, reason: impl Into<String>) -> CredentialError {
        CredentialError::KubeConfig {
            path: self.path.display().to_string(),
            reason: reason.into(),
        }
    }

    /// Resolves a file reference relative to the kubeconfig's directory.
    fn resolve_path(&self, file: &str) -> PathBuf {
        let file = Path::new(file);
        if file.is_absolute() {
            return file.to_path_buf();
        }
        self.path
            .parent()
            .map(|dir| dir.join(file))
            .unwrap_or_else(|| file.to_path_buf())
    }

    async fn read_file(&self, file: &str) -> Result<Vec<u8>, CredentialError> {
        let resolved = self.resolve_path(file);
        tokio::fs::read(&resolved)
            .await
            .map_err(|e| self.error(format!("failed to read {}: {e}", resolved.display())))
    }

    fn decode(&self, field: &str, value: &str) -> Result<Vec<u8>, CredentialError> {
        BASE64
            .decode(value.trim())
            .map_err(|e| self.error(format!("invalid base64 in {field}: {e}")))
    }

    /// Returns inline data, falling back to the referenced file.
    async fn inline_or_file(
        &self,
        field: &str,
        data: Option<&str>,
        file: Option<&str>,
    ) -> Result<Option<Vec<u8>>, CredentialError> {
        match (data, file) {
            (Some(data), _) => self.decode(field, data).map(Some),
            (None, Some(file)) => self.read_file(file).await.map(Some),
            (None, None) => Ok(None),
        }
    }

    async fn credential(&self, name: &str, user: &User) -> Result<Credential, CredentialError> {
        if let Some(token) = user.token.as_deref().filter(|t| !t.is_empty()) {
            return Ok(Credential::BearerToken(token.to_string()));
        }

        if let Some(file) = &user.token_file {
            let raw = self.read_file(file).await?;
            let token = String::from_utf8(raw)
                .map_err(|_| self.error(format!("token file {file} is not valid UTF-8")))?;
            return Ok(Credential::BearerToken(token.trim().to_string()));
        }

        let cert = self
            .inline_or_file(
                "client-certificate-data",
                user.client_certificate_data.as_deref(),
                user.client_certificate.as_deref(),
            )
            .await?;
        let key = self
            .inline_or_file(
                "client-key-data",
                user.client_key_data.as_deref(),
                user.client_key.as_deref(),
            )
            .await?;

        match (cert, key) {
            (Some(cert_pem), Some(key_pem)) => Ok(Credential::ClientCertificate { cert_pem, key_pem }),
            (Some(_), None) | (None, Some(_)) => Err(self.error(format!(
                "user '{name}' must set both a client certificate and a client key"
            ))),
            (None, None) if user.exec.is_some() || user.auth_provider.is_some() => Err(self.error(
                format!("user '{name}' uses a credential plugin, which is not supported"),
            )),
            (None, None) => Err(self.error(format!("user '{name}' has no supported credentials"))),
        }
    }
}

#[async_trait]
impl Configurer for KubeConfigConfigurer {
    async fn connection(&self) -> Result<ConnectionDescriptor, CredentialError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.error(e.to_string()))?;
        let config: KubeConfig =
            serde_yaml::from_str(&raw).map_err(|e| self.error(e.to_string()))?;

        let context = match config.current_context.as_deref().filter(|c| !c.is_empty()) {
            Some(current) => config
                .contexts
                .iter()
                .find(|c| c.name == current)
                .ok_or_else(|| self.error(format!("context '{current}' not found")))?,
            None => config
                .contexts
                .first()
                .ok_or_else(|| self.error("no contexts defined"))?,
        };

        let cluster = config
            .clusters
            .iter()
            .find(|c| c.name == context.context.cluster)
            .map(|c| &c.cluster)
            .ok_or_else(|| self.error(format!("cluster '{}' not found", context.context.cluster)))?;

        let user = config
            .users
            .iter()
            .find(|u| u.name == context.context.user)
            .ok_or_else(|| self.error(format!("user '{}' not found", context.context.user)))?;

        let ca_data = self
            .inline_or_file(
                "certificate-authority-data",
                cluster.certificate_authority_data.as_deref(),
                cluster.certificate_authority.as_deref(),
            )
            .await?;

        Ok(ConnectionDescriptor {
            endpoint: cluster.server.trim_end_matches('/').to_string(),
            ca_data,
            credential: self.credential(&user.name, &user.user).await?,
        })
    }
}
