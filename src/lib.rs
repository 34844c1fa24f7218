//! job-dispatcher: launches Terraform jobs on a compute backend.
//!
//! A [`JobDispatcher`] is built once from a [`DispatcherConfig`] with
//! [`new_job_dispatcher`] and then launches one job per
//! [`JobDispatcher::dispatch_job`] call on Kubernetes, Docker, ECS or an
//! in-process executor.

pub mod aws;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod docker;
pub mod ecs;
pub mod error;
pub mod kubernetes;
pub mod local;

pub use config::{DispatcherConfig, DispatcherType, PluginData};
pub use dispatcher::{new_job_dispatcher, DispatcherDeps, JobDispatcher};
pub use error::{AwsError, ConfigError, CredentialError, DispatchError, DockerError, KubeApiError};
