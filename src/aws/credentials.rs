//! AWS credential resolution.
//!
//! The default chain checks, in order: environment variables, the ECS
//! container credentials endpoint and the EC2 instance metadata service
//! (IMDSv2). Credentials from the two HTTP sources are cached until shortly
//! before they expire.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AwsError;

const ECS_CREDENTIALS_HOST: &str = "http://169.254.170.2";
const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const IMDS_TOKEN_TTL_SECONDS: &str = "21600";

/// Credentials are refreshed this many minutes before their reported expiration.
const REFRESH_MARGIN_MINUTES: i64 = 5;

/// An AWS access key pair with an optional session token.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expiration: None,
        }
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Reads `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Option<Self> {
        let access_key_id = non_empty_env("AWS_ACCESS_KEY_ID")?;
        let secret_access_key = non_empty_env("AWS_SECRET_ACCESS_KEY")?;
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token: non_empty_env("AWS_SESSION_TOKEN"),
            expiration: None,
        })
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            Some(expiration) => now + chrono::Duration::minutes(REFRESH_MARGIN_MINUTES) < expiration,
            None => true,
        }
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Source of AWS credentials used to sign requests.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credentials(&self) -> Result<AwsCredentials, AwsError>;
}

/// Always returns the same credentials.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub AwsCredentials);

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn credentials(&self) -> Result<AwsCredentials, AwsError> {
        Ok(self.0.clone())
    }
}

/// Environment, then ECS container endpoint, then EC2 instance metadata.
pub struct DefaultCredentialsChain {
    http: Client,
    cached: Mutex<Option<AwsCredentials>>,
}

/// JSON shape shared by the ECS credentials endpoint and IMDS.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RemoteCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
    expiration: Option<DateTime<Utc>>,
}

impl From<RemoteCredentials> for AwsCredentials {
    fn from(remote: RemoteCredentials) -> Self {
        Self {
            access_key_id: remote.access_key_id,
            secret_access_key: remote.secret_access_key,
            session_token: remote.token,
            expiration: remote.expiration,
        }
    }
}

impl DefaultCredentialsChain {
    pub fn new() -> Result<Self, AwsError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AwsError::RequestFailed(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            cached: Mutex::new(None),
        })
    }

    async fn fetch_remote(&self) -> Result<AwsCredentials, AwsError> {
        if let Some(url) = container_credentials_url() {
            debug!("Resolving AWS credentials from container endpoint");
            let mut request = self.http.get(&url);
            if let Some(token) = non_empty_env("AWS_CONTAINER_AUTHORIZATION_TOKEN") {
                request = request.header("Authorization", token);
            }
            let remote: RemoteCredentials = send_json(request).await?;
            return Ok(remote.into());
        }

        debug!("Resolving AWS credentials from instance metadata");
        self.fetch_imds().await
    }

    async fn fetch_imds(&self) -> Result<AwsCredentials, AwsError> {
        let token = self
            .http
            .put(format!("{IMDS_ENDPOINT}/latest/api/token"))
            .header("X-aws-ec2-metadata-token-ttl-seconds", IMDS_TOKEN_TTL_SECONDS)
            .send()
            .await
            .map_err(|e| AwsError::MissingCredentials(format!("instance metadata unavailable: {e}")))?
            .text()
            .await
            .map_err(|e| AwsError::RequestFailed(e.to_string()))?;

        let roles_url = format!("{IMDS_ENDPOINT}/latest/meta-data/iam/security-credentials/");
        let roles = send_text(
            self.http
                .get(&roles_url)
                .header("X-aws-ec2-metadata-token", &token),
        )
        .await?;
        let role = roles
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| {
                AwsError::MissingCredentials("no IAM role attached to instance".to_string())
            })?;

        let remote: RemoteCredentials = send_json(
            self.http
                .get(format!("{roles_url}{role}"))
                .header("X-aws-ec2-metadata-token", &token),
        )
        .await?;
        Ok(remote.into())
    }
}

#[async_trait]
impl CredentialsProvider for DefaultCredentialsChain {
    async fn credentials(&self) -> Result<AwsCredentials, AwsError> {
        if let Some(credentials) = AwsCredentials::from_env() {
            return Ok(credentials);
        }

        let mut cached = self.cached.lock().await;
        if let Some(credentials) = cached.as_ref().filter(|c| c.is_fresh(Utc::now())) {
            return Ok(credentials.clone());
        }

        let credentials = self.fetch_remote().await?;
        *cached = Some(credentials.clone());
        Ok(credentials)
    }
}

fn container_credentials_url() -> Option<String> {
    if let Some(relative) = non_empty_env("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI") {
        return Some(format!("{ECS_CREDENTIALS_HOST}{relative}"));
    }
    non_empty_env("AWS_CONTAINER_CREDENTIALS_FULL_URI")
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

async fn send_text(request: reqwest::RequestBuilder) -> Result<String, AwsError> {
    let response = request
        .send()
        .await
        .map_err(|e| AwsError::MissingCredentials(e.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AwsError::RequestFailed(e.to_string()))?;
    if !status.is_success() {
        return Err(AwsError::Api {
            status: status.as_u16(),
            message: body,
        });
    }
    Ok(body)
}

async fn send_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
) -> Result<T, AwsError> {
    let body = send_text(request).await?;
    serde_json::from_str(&body)
        .map_err(|e| AwsError::ParseError(format!("Failed to parse credentials: {e}")))
}
