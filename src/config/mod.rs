//! Dispatcher configuration.
//!
//! A dispatcher is configured by a backend type plus a flat [`PluginData`]
//! map. Configuration can be assembled in code or loaded from a YAML file:
//!
//! ```yaml
//! type: kubernetes
//! data:
//!   api_url: https://tharsis.example.com
//!   auth_type: in_cluster
//!   image: tharsis/job-executor:latest
//!   memory_request: 512Mi
//!   memory_limit: 2Gi
//! ```

pub mod plugin_data;
pub mod quantity;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;

pub use plugin_data::{split_list, PluginData};
pub use quantity::{kube_quantity_value, parse_kube_quantity, parse_ram_bytes};

/// Plugin data key that may carry the dispatcher type when it is not given
/// separately.
pub const DISPATCHER_TYPE_KEY: &str = "dispatcher_type";

/// The compute substrate a dispatcher launches jobs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherType {
    /// Kubernetes batch jobs.
    Kubernetes,
    /// Containers on a Docker engine.
    Docker,
    /// AWS ECS tasks.
    Ecs,
    /// In-process executor for local development.
    Local,
}

impl DispatcherType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kubernetes => "kubernetes",
            Self::Docker => "docker",
            Self::Ecs => "ecs",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for DispatcherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DispatcherType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kubernetes" => Ok(Self::Kubernetes),
            "docker" => Ok(Self::Docker),
            "ecs" => Ok(Self::Ecs),
            "local" => Ok(Self::Local),
            other => Err(ConfigError::UnknownDispatcherType(other.to_string())),
        }
    }
}

/// Complete configuration for constructing one dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub dispatcher_type: DispatcherType,
    pub plugin_data: PluginData,
}

#[derive(Debug, Deserialize)]
struct RawDispatcherConfig {
    #[serde(rename = "type")]
    dispatcher_type: Option<String>,
    #[serde(default)]
    data: BTreeMap<String, serde_yaml::Value>,
}

impl DispatcherConfig {
    pub fn new(dispatcher_type: DispatcherType, plugin_data: PluginData) -> Self {
        Self {
            dispatcher_type,
            plugin_data,
        }
    }

    /// Builds a configuration whose type is read from the `dispatcher_type` key.
    pub fn from_plugin_data(plugin_data: PluginData) -> Result<Self, ConfigError> {
        plugin_data.require(&[DISPATCHER_TYPE_KEY])?;
        let dispatcher_type = plugin_data.get_required(DISPATCHER_TYPE_KEY)?.parse()?;
        Ok(Self::new(dispatcher_type, plugin_data))
    }

    /// Loads a configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parses a configuration from YAML text.
    ///
    /// Scalar values in `data` are stringified so numeric and boolean YAML
    /// values can be written naturally.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let raw: RawDispatcherConfig = serde_yaml::from_str(content)?;

        let mut plugin_data = PluginData::new();
        for (key, value) in raw.data {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Null => String::new(),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key,
                        reason: "plugin data values must be scalars".to_string(),
                    })
                }
            };
            plugin_data.insert(key, value);
        }

        match raw.dispatcher_type {
            Some(t) => Ok(Self::new(t.parse()?, plugin_data)),
            None => Self::from_plugin_data(plugin_data),
        }
    }

    /// Applies `key=value` overrides on top of the loaded plugin data.
    pub fn with_overrides<'a>(
        mut self,
        overrides: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ConfigError> {
        for entry in overrides {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: entry.to_string(),
                    reason: "override must be of the form key=value".to_string(),
                })?;
            self.plugin_data.insert(key.trim(), value.trim());
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_type_parse() {
        assert_eq!("Kubernetes".parse::<DispatcherType>().unwrap(), DispatcherType::Kubernetes);
        assert_eq!("ecs".parse::<DispatcherType>().unwrap(), DispatcherType::Ecs);
        assert!(matches!(
            "nomad".parse::<DispatcherType>(),
            Err(ConfigError::UnknownDispatcherType(_))
        ));
    }

    #[test]
    fn test_from_yaml_stringifies_scalars() {
        let config = DispatcherConfig::from_yaml(
            r#"
type: docker
data:
  host: unix:///var/run/docker.sock
  image: tharsis/job-executor
  api_url: http://localhost:8000
  local_image: true
  security_context_run_as_user: 1000
"#,
        )
        .unwrap();

        assert_eq!(config.dispatcher_type, DispatcherType::Docker);
        assert_eq!(config.plugin_data.get("local_image"), Some("true"));
        assert_eq!(
            config.plugin_data.get("security_context_run_as_user"),
            Some("1000")
        );
    }

    #[test]
    fn test_from_yaml_type_in_data() {
        let config = DispatcherConfig::from_yaml(
            r#"
data:
  dispatcher_type: local
  api_url: http://localhost:8000
"#,
        )
        .unwrap();
        assert_eq!(config.dispatcher_type, DispatcherType::Local);
    }

    #[test]
    fn test_from_yaml_missing_type() {
        let err = DispatcherConfig::from_yaml("data: {}").unwrap_err();
        assert!(err.to_string().contains("dispatcher_type"));
    }

    #[test]
    fn test_overrides() {
        let config = DispatcherConfig::new(DispatcherType::Local, PluginData::new())
            .with_overrides(["api_url=http://localhost:8000", "namespace = jobs"])
            .unwrap();
        assert_eq!(config.plugin_data.get("api_url"), Some("http://localhost:8000"));
        assert_eq!(config.plugin_data.get("namespace"), Some("jobs"));

        let err = DispatcherConfig::new(DispatcherType::Local, PluginData::new())
            .with_overrides(["novalue"])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatcher.yaml");
        std::fs::write(&path, "type: local\ndata:\n  api_url: http://localhost:8000\n").unwrap();

        let config = DispatcherConfig::from_file(&path).unwrap();
        assert_eq!(config.dispatcher_type, DispatcherType::Local);

        let err = DispatcherConfig::from_file(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
