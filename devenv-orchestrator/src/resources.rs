use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};

/// Resource hints supplied by a caller; gaps are filled from configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub vcpus: Option<i64>,
    pub memory_mb: Option<i64>,
    pub disk_gb: Option<i64>,
}

/// Concrete allocation for one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub vcpus: i64,
    pub memory_mb: i64,
    pub disk_gb: i64,
}

impl ResourceRequest {
    pub fn resolve(&self, config: &OrchestratorConfig) -> Result<ResourceSpec> {
        let spec = ResourceSpec {
            vcpus: self.vcpus.unwrap_or(config.default_vcpus),
            memory_mb: self.memory_mb.unwrap_or(config.default_memory_mb),
            disk_gb: self.disk_gb.unwrap_or(config.default_disk_gb),
        };

        if spec.vcpus <= 0 || spec.memory_mb <= 0 || spec.disk_gb <= 0 {
            return Err(OrchestratorError::InvalidInput(format!(
                "resources must be positive (vcpus={}, memory_mb={}, disk_gb={})",
                spec.vcpus, spec.memory_mb, spec.disk_gb
            )));
        }

        Ok(spec)
    }
}

impl From<ResourceSpec> for ResourceRequest {
    fn from(spec: ResourceSpec) -> Self {
        Self {
            vcpus: Some(spec.vcpus),
            memory_mb: Some(spec.memory_mb),
            disk_gb: Some(spec.disk_gb),
        }
    }
}
