//! Service binding discovery
//!
//! Cloud Foundry hands bound services to the app through the `VCAP_SERVICES`
//! environment variable: a JSON object mapping a service label to the list
//! of bindings for that label.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Name of the environment variable carrying the bindings
pub const VCAP_SERVICES: &str = "VCAP_SERVICES";

/// Service binding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// The bindings document is not valid JSON of the expected shape
    #[error("Malformed VCAP_SERVICES: {0}")]
    Malformed(String),

    /// A required credential is absent
    #[error("Service {service} has no credential '{key}'")]
    MissingCredential { service: String, key: String },

    /// A credential is present but has the wrong type
    #[error("Credential '{key}' of service {service} is not a valid {expected}")]
    InvalidCredential {
        service: String,
        key: String,
        expected: &'static str,
    },

    /// A volume service binding without a mount
    #[error("Service {0} has no volume mount")]
    MissingVolumeMount(String),
}

/// A volume mount of a volume service binding
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VolumeMount {
    /// Directory the share is mounted at inside the container
    pub container_dir: String,

    #[serde(default)]
    pub mode: Option<String>,
}

/// One bound service instance
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Binding {
    pub name: String,

    #[serde(default)]
    pub label: String,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub credentials: Map<String, Value>,

    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
}

impl Binding {
    /// Raw credential value
    pub fn credential(&self, key: &str) -> Option<&Value> {
        self.credentials.get(key)
    }

    /// Required string credential
    pub fn credential_str(&self, key: &str) -> Result<&str, BindingError> {
        match self.credential(key) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(self.invalid(key, "string")),
            None => Err(self.missing(key)),
        }
    }

    /// Optional string credential; empty strings count as absent
    pub fn optional_str(&self, key: &str) -> Option<&str> {
        self.credential(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Required port-like credential, given either as a number or a string
    pub fn credential_u16(&self, key: &str) -> Result<u16, BindingError> {
        let parsed = match self.credential(key) {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
                .and_then(|n| u16::try_from(n).ok()),
            Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
            Some(_) => None,
            None => return Err(self.missing(key)),
        };
        parsed.ok_or_else(|| self.invalid(key, "port number"))
    }

    /// Optional boolean credential, `default` when absent
    pub fn credential_bool(&self, key: &str, default: bool) -> Result<bool, BindingError> {
        match self.credential(key) {
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(self.invalid(key, "boolean")),
            },
            Some(Value::Null) | None => Ok(default),
            Some(_) => Err(self.invalid(key, "boolean")),
        }
    }

    /// The binding's first volume mount
    pub fn first_mount(&self) -> Result<&VolumeMount, BindingError> {
        self.volume_mounts
            .first()
            .ok_or_else(|| BindingError::MissingVolumeMount(self.name.clone()))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn missing(&self, key: &str) -> BindingError {
        BindingError::MissingCredential {
            service: self.name.clone(),
            key: key.to_string(),
        }
    }

    fn invalid(&self, key: &str, expected: &'static str) -> BindingError {
        BindingError::InvalidCredential {
            service: self.name.clone(),
            key: key.to_string(),
            expected,
        }
    }
}

/// All bound services, grouped by label
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceBindings {
    services: BTreeMap<String, Vec<Binding>>,
}

impl ServiceBindings {
    /// No bindings at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a `VCAP_SERVICES` document.
    ///
    /// Blank input means nothing is bound.
    pub fn parse(json: &str) -> Result<Self, BindingError> {
        if json.trim().is_empty() {
            return Ok(Self::empty());
        }
        let mut services: BTreeMap<String, Vec<Binding>> =
            serde_json::from_str(json).map_err(|e| BindingError::Malformed(e.to_string()))?;

        // Older brokers omit the label on the binding itself
        for (label, bindings) in services.iter_mut() {
            for binding in bindings.iter_mut().filter(|b| b.label.is_empty()) {
                binding.label = label.clone();
            }
        }
        Ok(Self { services })
    }

    /// Parse the bindings from the process environment
    pub fn from_env() -> Result<Self, BindingError> {
        match std::env::var(VCAP_SERVICES) {
            Ok(json) => Self::parse(&json),
            Err(_) => Ok(Self::empty()),
        }
    }

    /// First binding with the given label
    pub fn with_label(&self, label: &str) -> Option<&Binding> {
        self.services.get(label).and_then(|b| b.first())
    }

    /// First binding carrying the given tag, in label order
    pub fn with_tag(&self, tag: &str) -> Option<&Binding> {
        self.services.values().flatten().find(|b| b.has_tag(tag))
    }

    /// Labels of every bound service
    pub fn labels(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.services.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
