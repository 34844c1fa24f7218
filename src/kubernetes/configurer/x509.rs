//! Static client certificate credentials from plugin data.

use async_trait::async_trait;

use super::{Configurer, ConnectionDescriptor, Credential};
use crate::config::PluginData;
use crate::error::{ConfigError, CredentialError};

/// Authenticates with a base64-encoded PEM certificate and key.
#[derive(Clone)]
pub struct X509Configurer {
    descriptor: ConnectionDescriptor,
}

impl std::fmt::Debug for X509Configurer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X509Configurer")
            .field("endpoint", &self.descriptor.endpoint)
            .finish_non_exhaustive()
    }
}

impl X509Configurer {
    /// Decodes `client_cert`, `client_key` and the optional `kube_ca_cert`.
    pub fn new(data: &PluginData) -> Result<Self, ConfigError> {
        let decode_required = |key: &str| {
            data.get_base64(key)?
                .ok_or_else(|| ConfigError::MissingKeys {
                    keys: vec![key.to_string()],
                })
        };

        Ok(Self {
            descriptor: ConnectionDescriptor {
                endpoint: data.get_required("kube_server")?.to_string(),
                ca_data: data.get_base64("kube_ca_cert")?,
                credential: Credential::ClientCertificate {
                    cert_pem: decode_required("client_cert")?,
                    key_pem: decode_required("client_key")?,
                },
            },
        })
    }
}

#[async_trait]
impl Configurer for X509Configurer {
    async fn connection(&self) -> Result<ConnectionDescriptor, CredentialError> {
        Ok(self.descriptor.clone())
    }
}
