//! EKS authentication with IAM-derived bearer tokens.
//!
//! The cluster endpoint and CA are described once at construction. Tokens are
//! presigned STS `GetCallerIdentity` URLs, cached for [`TOKEN_VALIDITY_MINUTES`]
//! and shared by every dispatch until they expire. The cache lock is held
//! across a refresh, so at most one presign runs per configurer.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Configurer, ConnectionDescriptor, Credential};
use crate::aws::{
    ClusterDescriber, DefaultCredentialsChain, EksClient, StsPresigner, TokenPresigner,
};
use crate::config::PluginData;
use crate::error::{ConfigError, CredentialError};

/// Prefix the API server's aws-iam-authenticator expects on bearer tokens.
pub const TOKEN_PREFIX: &str = "k8s-aws-v1.";

/// Shorter than the 15 minutes the authenticator accepts a presigned URL for.
pub const TOKEN_VALIDITY_MINUTES: i64 = 14;

struct TokenCache {
    token: Option<String>,
    expires_at: DateTime<Utc>,
}

/// Connects to an EKS cluster using the ambient AWS identity.
pub struct EksIamConfigurer {
    cluster_name: String,
    endpoint: String,
    ca_data: Vec<u8>,
    presigner: Arc<dyn TokenPresigner>,
    cache: Mutex<TokenCache>,
}

impl std::fmt::Debug for EksIamConfigurer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EksIamConfigurer")
            .field("cluster_name", &self.cluster_name)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl EksIamConfigurer {
    /// Resolves AWS credentials and describes `eks_cluster` in `region`.
    pub async fn new(data: &PluginData) -> Result<Self, ConfigError> {
        let region = data.get_required("region")?;
        let cluster_name = data.get_required("eks_cluster")?;
        let lookup_error = |source| ConfigError::ClusterLookup {
            cluster: cluster_name.to_string(),
            source,
        };

        let credentials = Arc::new(DefaultCredentialsChain::new().map_err(lookup_error)?);
        let describer = EksClient::new(credentials.clone(), region).map_err(lookup_error)?;
        let presigner = Arc::new(StsPresigner::new(credentials, region));

        Self::from_clients(cluster_name, &describer, presigner).await
    }

    /// Builds the configurer from explicit AWS clients.
    ///
    /// Fails when the cluster reports no endpoint, no CA, or a CA that is not
    /// valid base64.
    pub async fn from_clients(
        cluster_name: &str,
        describer: &dyn ClusterDescriber,
        presigner: Arc<dyn TokenPresigner>,
    ) -> Result<Self, ConfigError> {
        let info = describer
            .describe_cluster(cluster_name)
            .await
            .map_err(|source| ConfigError::ClusterLookup {
                cluster: cluster_name.to_string(),
                source,
            })?;

        let ca_base64 = info
            .certificate_authority_data
            .filter(|ca| !ca.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingClusterCa(cluster_name.to_string()))?;
        let ca_data = STANDARD
            .decode(ca_base64.trim())
            .map_err(|source| ConfigError::InvalidBase64 {
                key: format!("certificate authority of EKS cluster '{cluster_name}'"),
                source,
            })?;
        let endpoint = info
            .endpoint
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ConfigError::MissingClusterEndpoint(cluster_name.to_string()))?;

        debug!(cluster = %cluster_name, endpoint = %endpoint, "Described EKS cluster");

        Ok(Self {
            cluster_name: cluster_name.to_string(),
            endpoint,
            ca_data,
            presigner,
            cache: Mutex::new(TokenCache {
                token: None,
                expires_at: Utc::now(),
            }),
        })
    }

    /// Seeds the token cache, e.g. with an already expired token.
    pub fn with_cached_token(mut self, token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        self.cache = Mutex::new(TokenCache {
            token: Some(token.into()),
            expires_at,
        });
        self
    }

    async fn token(&self) -> Result<String, CredentialError> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now();

        if let Some(token) = cache.token.as_ref().filter(|_| now < cache.expires_at) {
            return Ok(token.clone());
        }

        debug!(cluster = %self.cluster_name, "Refreshing EKS token");
        let url = self
            .presigner
            .presign_caller_identity(&self.cluster_name)
            .await
            .map_err(|source| CredentialError::TokenSigning {
                cluster: self.cluster_name.clone(),
                source,
            })?;

        let token = format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(url));
        cache.token = Some(token.clone());
        cache.expires_at = now + Duration::minutes(TOKEN_VALIDITY_MINUTES);
        Ok(token)
    }
}

#[async_trait]
impl Configurer for EksIamConfigurer {
    async fn connection(&self) -> Result<ConnectionDescriptor, CredentialError> {
        Ok(ConnectionDescriptor {
            endpoint: self.endpoint.clone(),
            ca_data: Some(self.ca_data.clone()),
            credential: Credential::BearerToken(self.token().await?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::ClusterInfo;
    use crate::error::AwsError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CA_B64: &str = "LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0tCg==";

    struct MockDescriber {
        info: ClusterInfo,
    }

    #[async_trait]
    impl ClusterDescriber for MockDescriber {
        async fn describe_cluster(&self, _name: &str) -> Result<ClusterInfo, AwsError> {
            Ok(self.info.clone())
        }
    }

    #[derive(Default)]
    struct CountingPresigner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenPresigner for CountingPresigner {
        async fn presign_caller_identity(&self, cluster_name: &str) -> Result<String, AwsError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(format!(
                "https://sts.us-east-1.amazonaws.com/?Action=GetCallerIdentity&cluster={cluster_name}&n={n}"
            ))
        }
    }

    fn describer(endpoint: Option<&str>, ca: Option<&str>) -> MockDescriber {
        MockDescriber {
            info: ClusterInfo {
                endpoint: endpoint.map(str::to_string),
                certificate_authority_data: ca.map(str::to_string),
            },
        }
    }

    async fn configurer(presigner: Arc<CountingPresigner>) -> EksIamConfigurer {
        EksIamConfigurer::from_clients(
            "prod",
            &describer(Some("https://ABC.gr7.us-east-1.eks.amazonaws.com"), Some(CA_B64)),
            presigner,
        )
        .await
        .unwrap()
    }

    fn bearer(conn: &ConnectionDescriptor) -> &str {
        match &conn.credential {
            Credential::BearerToken(token) => token,
            other => panic!("expected bearer token, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tokens_are_reused_within_validity_window() {
        let presigner = Arc::new(CountingPresigner::default());
        let configurer = configurer(presigner.clone()).await;

        let first = configurer.connection().await.unwrap();
        let second = configurer.connection().await.unwrap();

        assert_eq!(bearer(&first), bearer(&second));
        assert_eq!(presigner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.endpoint, "https://ABC.gr7.us-east-1.eks.amazonaws.com");
        assert_eq!(
            first.ca_data.as_deref(),
            Some(&b"-----BEGIN CERTIFICATE-----\n"[..])
        );
    }

    #[tokio::test]
    async fn test_expired_token_is_replaced() {
        let presigner = Arc::new(CountingPresigner::default());
        let first = configurer(presigner.clone()).await.connection().await.unwrap();
        let first = bearer(&first).to_string();

        // Same presigner, so a refresh yields a different URL than the first token.
        let configurer = configurer(presigner.clone())
            .await
            .with_cached_token(first.clone(), Utc::now() - Duration::seconds(1));

        let conn = configurer.connection().await.unwrap();
        assert!(bearer(&conn).starts_with(TOKEN_PREFIX));
        assert_ne!(bearer(&conn), first);
        assert_eq!(presigner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unexpired_seeded_token_is_returned() {
        let presigner = Arc::new(CountingPresigner::default());
        let configurer = configurer(presigner.clone())
            .await
            .with_cached_token("k8s-aws-v1.cached", Utc::now() + Duration::minutes(5));

        let conn = configurer.connection().await.unwrap();
        assert_eq!(bearer(&conn), "k8s-aws-v1.cached");
        assert_eq!(presigner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_token_encoding() {
        let configurer = configurer(Arc::new(CountingPresigner::default())).await;
        let conn = configurer.connection().await.unwrap();

        let token = bearer(&conn);
        let encoded = token.strip_prefix(TOKEN_PREFIX).expect("token prefix");
        assert!(!encoded.contains('='));
        let url = String::from_utf8(URL_SAFE_NO_PAD.decode(encoded).unwrap()).unwrap();
        assert!(url.starts_with("https://sts.us-east-1.amazonaws.com/"));
        assert!(url.contains("cluster=prod"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let presigner = Arc::new(CountingPresigner::default());
        let configurer = Arc::new(configurer(presigner.clone()).await);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let configurer = Arc::clone(&configurer);
                tokio::spawn(async move { configurer.connection().await.unwrap() })
            })
            .collect();

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(bearer(&handle.await.unwrap()).to_string());
        }

        assert_eq!(presigner.calls.load(Ordering::SeqCst), 1);
        assert!(tokens.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_missing_ca_fails_construction() {
        for ca in [None, Some("")] {
            let err = EksIamConfigurer::from_clients(
                "prod",
                &describer(Some("https://eks.example.com"), ca),
                Arc::new(CountingPresigner::default()),
            )
            .await
            .err()
            .unwrap();
            assert!(matches!(err, ConfigError::MissingClusterCa(ref c) if c == "prod"));
        }
    }

    #[tokio::test]
    async fn test_invalid_ca_fails_construction() {
        let err = EksIamConfigurer::from_clients(
            "prod",
            &describer(Some("https://eks.example.com"), Some("not*base64")),
            Arc::new(CountingPresigner::default()),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::InvalidBase64 { .. }));
    }

    #[tokio::test]
    async fn test_missing_endpoint_fails_construction() {
        let err = EksIamConfigurer::from_clients(
            "prod",
            &describer(None, Some(CA_B64)),
            Arc::new(CountingPresigner::default()),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::MissingClusterEndpoint(_)));
    }
}
