//! Docker API wrapper using the bollard crate.
//!
//! Only the three calls a job launch needs are exposed: pull, create and
//! start. They sit behind [`ContainerEngine`] so the dispatcher can be driven
//! without a daemon.

use std::fmt;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use bollard::container::{Config, CreateContainerOptions, StartContainerOptions};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::StreamExt;

use crate::error::{ConfigError, DockerError};

/// Seconds bollard waits on a single daemon request.
const DAEMON_TIMEOUT_SECONDS: u64 = 120;

/// Everything needed to create a job container.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Docker image to use.
    pub image: String,
    /// Environment variables in `KEY=value` form.
    pub env: Vec<String>,
    /// Host bind mounts (`host:container[:mode]`).
    pub binds: Vec<String>,
    /// Extra `/etc/hosts` entries (`name:ip`).
    pub extra_hosts: Vec<String>,
    /// Memory limit in bytes, applied as both soft and hard limit.
    pub memory_bytes: Option<i64>,
    /// Remove the container once it exits.
    pub auto_remove: bool,
}

impl fmt::Debug for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Environment values carry the job token.
        let env_keys: Vec<&str> = self
            .env
            .iter()
            .map(|e| e.split_once('=').map_or(e.as_str(), |(k, _)| k))
            .collect();
        f.debug_struct("ContainerSpec")
            .field("image", &self.image)
            .field("env", &env_keys)
            .field("binds", &self.binds)
            .field("extra_hosts", &self.extra_hosts)
            .field("memory_bytes", &self.memory_bytes)
            .field("auto_remove", &self.auto_remove)
            .finish()
    }
}

/// Registry credentials attached to an image pull.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub server_address: Option<String>,
}

impl RegistryAuth {
    /// Builds credentials only when both a username and a password are set.
    pub fn from_parts(
        username: Option<&str>,
        password: Option<&str>,
        image: &str,
    ) -> Option<Self> {
        match (username, password) {
            (Some(username), Some(password)) => Some(Self {
                username: username.to_string(),
                password: password.to_string(),
                server_address: registry_host(image),
            }),
            _ => None,
        }
    }

    fn to_docker_credentials(&self) -> DockerCredentials {
        DockerCredentials {
            username: Some(self.username.clone()),
            password: Some(self.password.clone()),
            serveraddress: self.server_address.clone(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("server_address", &self.server_address)
            .finish()
    }
}

/// Returns the registry host of an image reference, if it names one.
///
/// `registry.example.com/team/image:tag` has a registry host; `ubuntu` and
/// `team/image` resolve to Docker Hub and do not.
pub fn registry_host(image: &str) -> Option<String> {
    let (first, rest) = image.split_once('/')?;
    if rest.is_empty() {
        return None;
    }
    if first.contains('.') || first.contains(':') || first == "localhost" {
        Some(first.to_string())
    } else {
        None
    }
}

/// The container engine operations used to launch a job.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Pulls an image, attaching registry credentials when given.
    async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<(), DockerError>;

    /// Creates a container and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DockerError>;

    /// Starts a created container.
    async fn start_container(&self, id: &str) -> Result<(), DockerError>;
}

/// [`ContainerEngine`] backed by a Docker daemon.
pub struct BollardEngine {
    docker: Docker,
}

impl BollardEngine {
    /// Connects to a Docker daemon.
    ///
    /// `host` may be `unix://<socket>`, `tcp://<addr>` / `http://<addr>`, or
    /// `local` for the platform default socket.
    pub fn connect(host: &str) -> Result<Self, ConfigError> {
        let connection_error = |e: bollard::errors::Error| ConfigError::DockerConnection {
            host: host.to_string(),
            reason: e.to_string(),
        };

        let docker = if host.starts_with("unix://") {
            Docker::connect_with_unix(host, DAEMON_TIMEOUT_SECONDS, API_DEFAULT_VERSION)
                .map_err(connection_error)?
        } else if host.starts_with("tcp://") || host.starts_with("http://") {
            Docker::connect_with_http(host, DAEMON_TIMEOUT_SECONDS, API_DEFAULT_VERSION)
                .map_err(connection_error)?
        } else if host == "local" {
            Docker::connect_with_local_defaults().map_err(connection_error)?
        } else {
            return Err(ConfigError::InvalidValue {
                key: "host".to_string(),
                reason: format!(
                    "unsupported docker host '{host}': expected unix://, tcp://, http:// or 'local'"
                ),
            });
        };

        Ok(Self { docker })
    }

    /// Creates an engine from an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerEngine for BollardEngine {
    async fn pull_image(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<(), DockerError> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream =
            self.docker
                .create_image(Some(options), None, auth.map(RegistryAuth::to_docker_credentials));

        while let Some(result) = stream.next().await {
            result.map_err(|e| DockerError::PullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DockerError> {
        let host_config = HostConfig {
            memory: spec.memory_bytes,
            memory_reservation: spec.memory_bytes,
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            extra_hosts: if spec.extra_hosts.is_empty() {
                None
            } else {
                Some(spec.extra_hosts.clone())
            },
            auto_remove: Some(spec.auto_remove),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            host_config: Some(host_config),
            attach_stdin: Some(false),
            attach_stdout: Some(false),
            attach_stderr: Some(false),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, container_config)
            .await
            .map_err(|e| DockerError::CreateFailed(e.to_string()))?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DockerError::StartFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_auth_requires_both_parts() {
        assert!(RegistryAuth::from_parts(Some("user"), None, "img").is_none());
        assert!(RegistryAuth::from_parts(None, Some("pass"), "img").is_none());
        assert!(RegistryAuth::from_parts(Some("user"), Some("pass"), "img").is_some());
    }

    #[test]
    fn test_docker_credentials() {
        let auth =
            RegistryAuth::from_parts(Some("user"), Some("p@ss"), "registry.example.com/job:1")
                .unwrap();
        let credentials = auth.to_docker_credentials();

        assert_eq!(credentials.username.as_deref(), Some("user"));
        assert_eq!(credentials.password.as_deref(), Some("p@ss"));
        assert_eq!(credentials.serveraddress.as_deref(), Some("registry.example.com"));
        assert_eq!(credentials.auth, None);

        let hub = RegistryAuth::from_parts(Some("user"), Some("p@ss"), "team/job:1").unwrap();
        assert_eq!(hub.to_docker_credentials().serveraddress, None);
    }

    #[test]
    fn test_registry_auth_debug_redacts_password() {
        let auth = RegistryAuth::from_parts(Some("user"), Some("hunter2"), "img").unwrap();
        assert!(!format!("{auth:?}").contains("hunter2"));
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(
            registry_host("registry.example.com/team/image:tag").as_deref(),
            Some("registry.example.com")
        );
        assert_eq!(registry_host("localhost:5000/image").as_deref(), Some("localhost:5000"));
        assert_eq!(registry_host("team/image"), None);
        assert_eq!(registry_host("ubuntu:22.04"), None);
    }

    #[test]
    fn test_container_spec_debug_hides_env_values() {
        let spec = ContainerSpec {
            image: "job-executor".to_string(),
            env: vec!["JOB_TOKEN=secret".to_string()],
            ..Default::default()
        };
        let rendered = format!("{spec:?}");
        assert!(rendered.contains("JOB_TOKEN"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_connect_rejects_unknown_scheme() {
        let err = BollardEngine::connect("ssh://docker.example.com").err().unwrap();
        assert!(err.to_string().contains("unsupported docker host"));
    }
}
