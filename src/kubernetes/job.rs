//! `batch/v1` Job descriptors.
//!
//! Only the fields the dispatcher sets are modelled. Every launch produces a
//! single-container Job that the cluster never retries and deletes as soon as
//! it finishes.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::config::{kube_quantity_value, parse_kube_quantity, split_list, PluginData};
use crate::dispatcher::launch::ENV_JOB_TOKEN;
use crate::dispatcher::{JobEnvironment, JobLaunch};
use crate::error::ConfigError;

/// Annotation carrying the dispatched job id.
pub const JOB_ID_ANNOTATION: &str = "job-dispatcher/job-id";

/// Name of the single container in every Job.
pub const CONTAINER_NAME: &str = "main";

const GENERATE_NAME_PREFIX_LEN: usize = 40;
const DROPPED_CAPABILITIES: &[&str] = &["NET_RAW"];

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub metadata: ObjectMeta,
    pub spec: JobSpec,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub backoff_limit: i32,
    pub ttl_seconds_after_finished: i32,
    pub template: PodTemplateSpec,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PodTemplateSpec {
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<Container>,
    pub restart_policy: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: &'static str,
    pub image: String,
    pub env: Vec<EnvVar>,
    pub resources: ResourceRequirements,
    pub security_context: SecurityContext,
}

#[derive(Clone, Serialize, PartialEq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl fmt::Debug for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = if self.name == ENV_JOB_TOKEN {
            "<redacted>"
        } else {
            self.value.as_str()
        };
        write!(f, "{}={}", self.name, value)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResourceRequirements {
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    pub allow_privilege_escalation: bool,
    pub capabilities: Capabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Capabilities {
    pub drop: Vec<String>,
}

/// Optional overrides of the container's user, group and non-root policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityOverrides {
    pub run_as_user: Option<i64>,
    pub run_as_group: Option<i64>,
    pub run_as_non_root: Option<bool>,
}

impl SecurityOverrides {
    pub fn from_plugin_data(data: &PluginData) -> Result<Self, ConfigError> {
        Ok(Self {
            run_as_user: parse_id(data, "security_context_run_as_user")?,
            run_as_group: parse_id(data, "security_context_run_as_group")?,
            run_as_non_root: data.get_opt_bool("security_context_run_as_non_root")?,
        })
    }
}

fn parse_id(data: &PluginData, key: &str) -> Result<Option<i64>, ConfigError> {
    match data.get_parsed::<i64>(key)? {
        Some(id) if id < 0 => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("must be a non-negative integer, got {id}"),
        }),
        id => Ok(id),
    }
}

/// Parses `key=value,key=value` into a node selector.
pub fn parse_node_selector(value: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    split_list(value)
        .into_iter()
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => {
                Ok((k.trim().to_string(), v.trim().to_string()))
            }
            _ => Err(ConfigError::MalformedNodeSelector(pair)),
        })
        .collect()
}

/// Derives `generateName` from a job id: `job-<id prefix>-`.
///
/// The id is lowercased and anything outside `[a-z0-9-]` becomes `-`, so the
/// result is always a valid DNS-1123 name prefix.
pub fn generate_name(job_id: &str) -> String {
    let sanitized: String = job_id
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .take(GENERATE_NAME_PREFIX_LEN)
        .collect();
    let sanitized = sanitized.trim_matches('-');

    if sanitized.is_empty() {
        "job-".to_string()
    } else {
        format!("job-{sanitized}-")
    }
}

/// Static Job settings validated once at construction.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub namespace: String,
    pub image: String,
    pub memory_request: String,
    pub memory_limit: String,
    pub security: SecurityOverrides,
    pub node_selector: BTreeMap<String, String>,
    pub environment: JobEnvironment,
}

impl JobTemplate {
    /// Reads the cluster backend's job settings. Required keys must already
    /// have been checked.
    pub fn from_plugin_data(data: &PluginData) -> Result<Self, ConfigError> {
        let memory_request =
            parse_kube_quantity("memory_request", data.get_required("memory_request")?)?;
        let memory_limit = parse_kube_quantity("memory_limit", data.get_required("memory_limit")?)?;
        if kube_quantity_value(&memory_request) > kube_quantity_value(&memory_limit) {
            return Err(ConfigError::InvalidValue {
                key: "memory_request".to_string(),
                reason: format!("'{memory_request}' exceeds memory_limit '{memory_limit}'"),
            });
        }

        Ok(Self {
            namespace: data.get_or("namespace", "default").to_string(),
            image: data.get_required("image")?.to_string(),
            security: SecurityOverrides::from_plugin_data(data)?,
            node_selector: data
                .get("node_selector")
                .map(parse_node_selector)
                .transpose()?
                .unwrap_or_default(),
            environment: JobEnvironment::new(
                data.get_required("api_url")?,
                &data.get_list("extra_service_discovery_hosts"),
            )?
            .with_memory_limit(memory_limit.clone()),
            memory_request,
            memory_limit,
        })
    }

    /// Builds the Job for one launch.
    pub fn build(&self, launch: &JobLaunch<'_>) -> Job {
        let env = self
            .environment
            .vars(launch)
            .into_iter()
            .map(|(name, value)| EnvVar {
                name: name.to_string(),
                value,
            })
            .collect();

        let container = Container {
            name: CONTAINER_NAME,
            image: self.image.clone(),
            env,
            resources: ResourceRequirements {
                requests: BTreeMap::from([("memory".to_string(), self.memory_request.clone())]),
                limits: BTreeMap::from([("memory".to_string(), self.memory_limit.clone())]),
            },
            security_context: SecurityContext {
                allow_privilege_escalation: false,
                capabilities: Capabilities {
                    drop: DROPPED_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
                },
                run_as_user: self.security.run_as_user,
                run_as_group: self.security.run_as_group,
                run_as_non_root: self.security.run_as_non_root,
            },
        };

        Job {
            api_version: "batch/v1",
            kind: "Job",
            metadata: ObjectMeta {
                generate_name: Some(generate_name(launch.job_id())),
                namespace: Some(self.namespace.clone()),
                annotations: BTreeMap::from([(
                    JOB_ID_ANNOTATION.to_string(),
                    launch.job_id().to_string(),
                )]),
            },
            spec: JobSpec {
                backoff_limit: 0,
                ttl_seconds_after_finished: 0,
                template: PodTemplateSpec {
                    spec: PodSpec {
                        containers: vec![container],
                        restart_policy: "Never",
                        node_selector: self.node_selector.clone(),
                    },
                },
            },
        }
    }
}
