//! Docker dispatcher.
//!
//! Launches each job as a container on a Docker engine: optionally pulls the
//! image, creates the container with the job environment, and starts it.
//!
//! # Plugin data
//!
//! Required: `host`, `image`, `api_url`.
//! Optional: `local_image`, `registry_username`, `registry_password`,
//! `bind_path`, `extra_hosts`, `memory_limit`, `extra_service_discovery_hosts`.

pub mod engine;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{parse_ram_bytes, PluginData};
use crate::dispatcher::{JobDispatcher, JobEnvironment, JobLaunch};
use crate::error::{ConfigError, DispatchError};

pub use engine::{BollardEngine, ContainerEngine, ContainerSpec, RegistryAuth};

const REQUIRED_KEYS: &[&str] = &["host", "image", "api_url"];

/// Dispatches jobs as Docker containers.
pub struct DockerDispatcher {
    engine: Arc<dyn ContainerEngine>,
    image: String,
    local_image: bool,
    registry_auth: Option<RegistryAuth>,
    binds: Vec<String>,
    extra_hosts: Vec<String>,
    memory_bytes: Option<i64>,
    environment: JobEnvironment,
}

impl DockerDispatcher {
    /// Validates plugin data and connects to the configured Docker host.
    pub fn new(data: &PluginData) -> Result<Self, ConfigError> {
        data.require(REQUIRED_KEYS)?;
        let engine = BollardEngine::connect(data.get_required("host")?)?;
        Self::with_engine(data, Arc::new(engine))
    }

    /// Validates plugin data and uses the given engine.
    pub fn with_engine(
        data: &PluginData,
        engine: Arc<dyn ContainerEngine>,
    ) -> Result<Self, ConfigError> {
        data.require(REQUIRED_KEYS)?;

        let image = data.get_required("image")?.to_string();
        let memory_limit = data.get("memory_limit");
        let memory_bytes = memory_limit
            .map(|v| parse_ram_bytes("memory_limit", v))
            .transpose()?
            .filter(|bytes| *bytes > 0);

        let mut environment = JobEnvironment::new(
            data.get_required("api_url")?,
            &data.get_list("extra_service_discovery_hosts"),
        )?;
        if let Some(limit) = memory_limit {
            environment = environment.with_memory_limit(limit);
        }

        Ok(Self {
            engine,
            registry_auth: RegistryAuth::from_parts(
                data.get("registry_username"),
                data.get("registry_password"),
                &image,
            ),
            image,
            local_image: data.get_bool("local_image")?,
            binds: data.get_list("bind_path"),
            extra_hosts: data.get_list("extra_hosts"),
            memory_bytes,
            environment,
        })
    }

    fn container_spec(&self, launch: &JobLaunch<'_>) -> ContainerSpec {
        ContainerSpec {
            image: self.image.clone(),
            env: self
                .environment
                .vars(launch)
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
            binds: self.binds.clone(),
            extra_hosts: self.extra_hosts.clone(),
            memory_bytes: self.memory_bytes,
            auto_remove: true,
        }
    }
}

#[async_trait]
impl JobDispatcher for DockerDispatcher {
    async fn dispatch_job(&self, job_id: &str, token: &str) -> Result<String, DispatchError> {
        let launch = JobLaunch::new(job_id, token)?;
        let docker_error = |source| DispatchError::Docker {
            job_id: job_id.to_string(),
            source,
        };

        if self.local_image {
            debug!(job_id = %job_id, image = %self.image, "Using local image, skipping pull");
        } else {
            debug!(job_id = %job_id, image = %self.image, "Pulling job image");
            self.engine
                .pull_image(&self.image, self.registry_auth.as_ref())
                .await
                .map_err(docker_error)?;
        }

        let spec = self.container_spec(&launch);
        let container_id = self
            .engine
            .create_container(&spec)
            .await
            .map_err(docker_error)?;
        self.engine
            .start_container(&container_id)
            .await
            .map_err(docker_error)?;

        info!(job_id = %job_id, external_id = %container_id, "Dispatched job to docker");
        Ok(container_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DockerError;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Pull {
            image: String,
            auth: Option<RegistryAuth>,
        },
        Create(ContainerSpec),
        Start(String),
    }

    #[derive(Default)]
    struct MockEngine {
        calls: Mutex<Vec<Call>>,
        fail_pull: bool,
    }

    impl MockEngine {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().expect("lock not poisoned").clone()
        }
    }

    #[async_trait]
    impl ContainerEngine for MockEngine {
        async fn pull_image(
            &self,
            image: &str,
            auth: Option<&RegistryAuth>,
        ) -> Result<(), DockerError> {
            self.calls.lock().expect("lock not poisoned").push(Call::Pull {
                image: image.to_string(),
                auth: auth.cloned(),
            });
            if self.fail_pull {
                return Err(DockerError::PullFailed {
                    image: image.to_string(),
                    reason: "manifest unknown".to_string(),
                });
            }
            Ok(())
        }

        async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DockerError> {
            self.calls
                .lock()
                .expect("lock not poisoned")
                .push(Call::Create(spec.clone()));
            Ok("c0ffee".to_string())
        }

        async fn start_container(&self, id: &str) -> Result<(), DockerError> {
            self.calls
                .lock()
                .expect("lock not poisoned")
                .push(Call::Start(id.to_string()));
            Ok(())
        }
    }

    fn plugin_data() -> PluginData {
        PluginData::new()
            .with("host", "unix:///var/run/docker.sock")
            .with("image", "tharsis/job-executor:latest")
            .with("api_url", "http://localhost:8000")
    }

    fn dispatcher(data: &PluginData) -> (DockerDispatcher, Arc<MockEngine>) {
        let engine = Arc::new(MockEngine::default());
        let dispatcher = DockerDispatcher::with_engine(data, engine.clone()).unwrap();
        (dispatcher, engine)
    }

    #[test]
    fn test_missing_required_keys() {
        for key in REQUIRED_KEYS {
            let mut data = plugin_data();
            data.insert(*key, "");
            let err = DockerDispatcher::new(&data).err().unwrap();
            assert!(
                matches!(err, ConfigError::MissingKeys { ref keys } if keys == &vec![key.to_string()]),
                "unexpected error for {key}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_pulls_before_create() {
        let (dispatcher, engine) = dispatcher(&plugin_data());
        let id = dispatcher.dispatch_job("abc12345", "token").await.unwrap();
        assert_eq!(id, "c0ffee");

        let calls = engine.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[0],
            Call::Pull {
                image: "tharsis/job-executor:latest".to_string(),
                auth: None,
            }
        );
        assert!(matches!(calls[1], Call::Create(_)));
        assert_eq!(calls[2], Call::Start("c0ffee".to_string()));
    }

    #[tokio::test]
    async fn test_local_image_skips_pull() {
        let (dispatcher, engine) = dispatcher(&plugin_data().with("local_image", "true"));
        dispatcher.dispatch_job("abc12345", "token").await.unwrap();

        let calls = engine.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::Pull { .. })));
        assert!(matches!(calls[0], Call::Create(_)));
    }

    #[tokio::test]
    async fn test_registry_credentials_attached() {
        let (dispatcher, engine) = dispatcher(
            &plugin_data()
                .with("registry_username", "robot")
                .with("registry_password", "s3cret"),
        );
        dispatcher.dispatch_job("abc12345", "token").await.unwrap();

        let Call::Pull { auth, .. } = &engine.calls()[0] else {
            panic!("expected pull first");
        };
        let auth = auth.as_ref().expect("auth attached");
        assert_eq!(auth.username, "robot");
        assert_eq!(auth.password, "s3cret");
        assert_eq!(auth.server_address, None);
    }

    #[tokio::test]
    async fn test_registry_credentials_need_both_values() {
        for (key, value) in [("registry_username", "robot"), ("registry_password", "s3cret")] {
            let (dispatcher, engine) = dispatcher(&plugin_data().with(key, value));
            dispatcher.dispatch_job("abc12345", "token").await.unwrap();

            assert!(matches!(&engine.calls()[0], Call::Pull { auth: None, .. }), "{key}");
        }
    }

    #[tokio::test]
    async fn test_container_spec() {
        let (dispatcher, engine) = dispatcher(
            &plugin_data()
                .with("memory_limit", "2g")
                .with("bind_path", "/var/run/docker.sock:/var/run/docker.sock")
                .with("extra_hosts", "api.local:10.0.0.5")
                .with("extra_service_discovery_hosts", "registry.local"),
        );
        dispatcher.dispatch_job("abc12345", "token").await.unwrap();

        let calls = engine.calls();
        let Call::Create(spec) = &calls[1] else {
            panic!("expected create after pull");
        };
        assert_eq!(spec.image, "tharsis/job-executor:latest");
        assert_eq!(spec.memory_bytes, Some(2 * 1024 * 1024 * 1024));
        assert_eq!(spec.binds, vec!["/var/run/docker.sock:/var/run/docker.sock"]);
        assert_eq!(spec.extra_hosts, vec!["api.local:10.0.0.5"]);
        assert!(spec.auto_remove);
        assert_eq!(
            spec.env,
            vec![
                "JOB_ID=abc12345",
                "JOB_TOKEN=token",
                "API_URL=http://localhost:8000",
                "DISCOVERY_PROTOCOL_HOSTS=localhost:8000,registry.local",
                "MEMORY_LIMIT=2g",
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_memory_limit_is_unlimited() {
        let (dispatcher, engine) = dispatcher(&plugin_data().with("memory_limit", "0"));
        dispatcher.dispatch_job("abc12345", "token").await.unwrap();

        let calls = engine.calls();
        let Call::Create(spec) = &calls[1] else {
            panic!("expected create after pull");
        };
        assert_eq!(spec.memory_bytes, None);
    }

    #[test]
    fn test_invalid_memory_limit() {
        let engine = Arc::new(MockEngine::default());
        let err = DockerDispatcher::with_engine(&plugin_data().with("memory_limit", "lots"), engine)
            .err()
            .unwrap();
        assert!(err.to_string().contains("memory_limit"));
    }

    #[tokio::test]
    async fn test_pull_failure_carries_job_id() {
        let engine = Arc::new(MockEngine {
            fail_pull: true,
            ..Default::default()
        });
        let dispatcher = DockerDispatcher::with_engine(&plugin_data(), engine.clone()).unwrap();

        let err = dispatcher.dispatch_job("abc12345", "token").await.unwrap_err();
        assert!(err.to_string().contains("abc12345"));
        assert_eq!(engine.calls().len(), 1);
    }
}
