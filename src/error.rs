//! Error types for job dispatch operations.
//!
//! Errors are grouped by the phase in which they occur:
//! - Construction-time configuration validation (fatal at startup)
//! - Connection credential acquisition for the cluster backend
//! - Minimal AWS API clients (signing, credentials, HTTP)
//! - Kubernetes and Docker API calls
//! - Job submission to a compute substrate

use thiserror::Error;

/// Errors raised while constructing a dispatcher from plugin data.
///
/// Every variant is fatal: a dispatcher that fails construction can never
/// dispatch a job.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required plugin data keys: {}", .keys.join(", "))]
    MissingKeys { keys: Vec<String> },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to decode base64 value of '{key}': {source}")]
    InvalidBase64 {
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid launch type '{0}': must be one of 'ec2' or 'fargate'")]
    InvalidLaunchType(String),

    #[error("malformed node selector pair '{0}': expected key=value")]
    MalformedNodeSelector(String),

    #[error("unknown dispatcher type '{0}': must be one of 'kubernetes', 'docker', 'ecs' or 'local'")]
    UnknownDispatcherType(String),

    #[error("unknown kubernetes auth type '{0}'")]
    UnknownAuthType(String),

    #[error("{0}")]
    MissingDependency(&'static str),

    #[error("failed to connect to docker host '{host}': {reason}")]
    DockerConnection { host: String, reason: String },

    #[error("failed to initialize AWS client: {0}")]
    AwsClient(#[from] AwsError),

    #[error("failed to describe EKS cluster '{cluster}': {source}")]
    ClusterLookup {
        cluster: String,
        #[source]
        source: AwsError,
    },

    #[error("EKS cluster '{0}' did not report a certificate authority")]
    MissingClusterCa(String),

    #[error("EKS cluster '{0}' did not report an API endpoint")]
    MissingClusterEndpoint(String),

    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors raised while producing a connection descriptor for the cluster API.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("in-cluster configuration unavailable: {0}")]
    InClusterUnavailable(String),

    #[error("failed to load kubeconfig '{path}': {reason}")]
    KubeConfig { path: String, reason: String },

    #[error("failed to get identity token for kubernetes host '{host}': {reason}")]
    IdentityToken { host: String, reason: String },

    #[error("failed to generate EKS token for cluster '{cluster}': {source}")]
    TokenSigning {
        cluster: String,
        #[source]
        source: AwsError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the AWS request signer and the minimal service clients.
#[derive(Debug, Error)]
pub enum AwsError {
    #[error("no AWS credentials found: {0}")]
    MissingCredentials(String),

    #[error("invalid AWS endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("AWS API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse AWS response: {0}")]
    ParseError(String),
}

/// Errors raised by the Kubernetes API client.
#[derive(Debug, Error)]
pub enum KubeApiError {
    #[error("invalid TLS material: {0}")]
    Tls(String),

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("API server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse API server response: {0}")]
    ParseError(String),
}

/// Errors raised by the Docker engine.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Failed to pull image '{image}': {reason}")]
    PullFailed { image: String, reason: String },

    #[error("Failed to create container: {0}")]
    CreateFailed(String),

    #[error("Failed to start container '{id}': {reason}")]
    StartFailed { id: String, reason: String },
}

/// Errors raised while dispatching a single job.
///
/// All submission-side variants carry the job identifier.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid job launch: {0}")]
    InvalidJob(String),

    #[error("failed to get kubernetes connection for job {job_id}: {source}")]
    Connection {
        job_id: String,
        #[source]
        source: CredentialError,
    },

    #[error("failed to create kubernetes job for job {job_id}: {source}")]
    KubernetesSubmit {
        job_id: String,
        #[source]
        source: KubeApiError,
    },

    #[error("failed to launch container for job {job_id}: {source}")]
    Docker {
        job_id: String,
        #[source]
        source: DockerError,
    },

    #[error("failed to run ECS task for job {job_id}: {source}")]
    TaskSubmit {
        job_id: String,
        #[source]
        source: AwsError,
    },

    #[error("no ECS tasks were created for job {0}")]
    NoTasksCreated(String),

    /// A per-task failure reported by ECS, formatted as `reason[; detail]`.
    #[error("failed to run task: {message}")]
    TaskFailure { job_id: String, message: String },
}
