//! Authenticates with the runner's own identity token.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Configurer, ConnectionDescriptor, Credential, IdentityTokenSource};
use crate::config::PluginData;
use crate::error::{ConfigError, CredentialError};

/// Fetches a bearer token from an [`IdentityTokenSource`] on every call.
pub struct RunnerTokenConfigurer {
    server: String,
    ca_data: Option<Vec<u8>>,
    source: Arc<dyn IdentityTokenSource>,
}

impl RunnerTokenConfigurer {
    pub fn new(
        data: &PluginData,
        source: Option<Arc<dyn IdentityTokenSource>>,
    ) -> Result<Self, ConfigError> {
        let server = data.get_required("kube_server")?.to_string();
        let ca_data = data.get_base64("kube_ca_cert")?;
        let source = source.ok_or(ConfigError::MissingDependency(
            "runner_id_token auth requires an identity token source",
        ))?;

        Ok(Self {
            server,
            ca_data,
            source,
        })
    }
}

#[async_trait]
impl Configurer for RunnerTokenConfigurer {
    async fn connection(&self) -> Result<ConnectionDescriptor, CredentialError> {
        let identity_error = |reason: String| CredentialError::IdentityToken {
            host: self.server.clone(),
            reason,
        };

        let token = self
            .source
            .token()
            .await
            .map_err(|e| identity_error(format!("{e:#}")))?;
        if token.is_empty() {
            return Err(identity_error("token source returned an empty token".to_string()));
        }

        Ok(ConnectionDescriptor {
            endpoint: self.server.clone(),
            ca_data: self.ca_data.clone(),
            credential: Credential::BearerToken(token),
        })
    }
}
