//! Per-call launch request and the environment contract shared by every backend.

use std::fmt;

use reqwest::Url;

use crate::error::{ConfigError, DispatchError};

pub const ENV_JOB_ID: &str = "JOB_ID";
pub const ENV_JOB_TOKEN: &str = "JOB_TOKEN";
pub const ENV_API_URL: &str = "API_URL";
pub const ENV_DISCOVERY_PROTOCOL_HOSTS: &str = "DISCOVERY_PROTOCOL_HOSTS";
pub const ENV_MEMORY_LIMIT: &str = "MEMORY_LIMIT";

/// A single job launch.
///
/// Borrows the caller's job id and token so the token cannot outlive the
/// `dispatch_job` call that received it.
#[derive(Clone, Copy)]
pub struct JobLaunch<'a> {
    job_id: &'a str,
    token: &'a str,
}

impl<'a> JobLaunch<'a> {
    /// Validates that both the job id and the token are non-empty.
    pub fn new(job_id: &'a str, token: &'a str) -> Result<Self, DispatchError> {
        if job_id.trim().is_empty() {
            return Err(DispatchError::InvalidJob("job id must not be empty".to_string()));
        }
        if token.is_empty() {
            return Err(DispatchError::InvalidJob(format!(
                "token for job {job_id} must not be empty"
            )));
        }
        Ok(Self { job_id, token })
    }

    pub fn job_id(&self) -> &'a str {
        self.job_id
    }

    pub fn token(&self) -> &'a str {
        self.token
    }
}

impl fmt::Debug for JobLaunch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobLaunch")
            .field("job_id", &self.job_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Static part of the launch-time environment, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEnvironment {
    api_url: String,
    discovery_hosts: Vec<String>,
    memory_limit: Option<String>,
}

impl JobEnvironment {
    /// Builds the environment for `api_url`.
    ///
    /// The discovery host list starts with the API host (including a
    /// non-default port) followed by `extra_hosts`, de-duplicated in order.
    pub fn new(api_url: &str, extra_hosts: &[String]) -> Result<Self, ConfigError> {
        let parsed = Url::parse(api_url).map_err(|e| ConfigError::InvalidValue {
            key: "api_url".to_string(),
            reason: format!("'{api_url}' is not a valid URL: {e}"),
        })?;
        let host = parsed.host_str().ok_or_else(|| ConfigError::InvalidValue {
            key: "api_url".to_string(),
            reason: format!("'{api_url}' has no host"),
        })?;
        let api_host = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut discovery_hosts: Vec<String> = Vec::with_capacity(extra_hosts.len() + 1);
        for candidate in std::iter::once(&api_host).chain(extra_hosts.iter()) {
            if !discovery_hosts.contains(candidate) {
                discovery_hosts.push(candidate.clone());
            }
        }

        Ok(Self {
            api_url: api_url.to_string(),
            discovery_hosts,
            memory_limit: None,
        })
    }

    pub fn with_memory_limit(mut self, memory_limit: impl Into<String>) -> Self {
        self.memory_limit = Some(memory_limit.into());
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn discovery_hosts(&self) -> &[String] {
        &self.discovery_hosts
    }

    /// `JOB_ID`, `JOB_TOKEN`, `API_URL` and `DISCOVERY_PROTOCOL_HOSTS`.
    pub fn core_vars(&self, launch: &JobLaunch<'_>) -> Vec<(&'static str, String)> {
        vec![
            (ENV_JOB_ID, launch.job_id().to_string()),
            (ENV_JOB_TOKEN, launch.token().to_string()),
            (ENV_API_URL, self.api_url.clone()),
            (ENV_DISCOVERY_PROTOCOL_HOSTS, self.discovery_hosts.join(",")),
        ]
    }

    /// The core variables plus `MEMORY_LIMIT`.
    pub fn vars(&self, launch: &JobLaunch<'_>) -> Vec<(&'static str, String)> {
        let mut vars = self.core_vars(launch);
        vars.push((
            ENV_MEMORY_LIMIT,
            self.memory_limit.clone().unwrap_or_default(),
        ));
        vars
    }
}
