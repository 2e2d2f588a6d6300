use serde::Deserialize;

/// Tunables for resource defaults and per-user quota ceilings.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_vcpus")]
    pub default_vcpus: i64,

    #[serde(default = "default_memory_mb")]
    pub default_memory_mb: i64,

    #[serde(default = "default_disk_gb")]
    pub default_disk_gb: i64,

    #[serde(default = "default_duration_hours")]
    pub default_duration_hours: i64,

    #[serde(default = "max_duration_hours")]
    pub max_duration_hours: i64,

    #[serde(default)]
    pub quota: QuotaDefaults,
}

/// Ceilings applied to a user the first time their quota is checked.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuotaDefaults {
    #[serde(default = "quota_max_environments")]
    pub max_concurrent_environments: i64,

    #[serde(default = "quota_max_vcpus")]
    pub max_vcpus_per_environment: i64,

    #[serde(default = "quota_max_memory_mb")]
    pub max_memory_mb_per_environment: i64,

    #[serde(default = "quota_max_disk_gb")]
    pub max_disk_gb_per_environment: i64,
}

fn env_or(key: &str, fallback: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(fallback)
}

fn default_vcpus() -> i64 {
    env_or("DEVENV_DEFAULT_VCPUS", 2)
}

fn default_memory_mb() -> i64 {
    env_or("DEVENV_DEFAULT_MEMORY_MB", 4096)
}

fn default_disk_gb() -> i64 {
    env_or("DEVENV_DEFAULT_DISK_GB", 20)
}

fn default_duration_hours() -> i64 {
    env_or("DEVENV_DEFAULT_DURATION_HOURS", 24)
}

fn max_duration_hours() -> i64 {
    env_or("DEVENV_MAX_DURATION_HOURS", 168) // one week
}

fn quota_max_environments() -> i64 {
    env_or("DEVENV_QUOTA_MAX_ENVIRONMENTS", 3)
}

fn quota_max_vcpus() -> i64 {
    env_or("DEVENV_QUOTA_MAX_VCPUS", 8)
}

fn quota_max_memory_mb() -> i64 {
    env_or("DEVENV_QUOTA_MAX_MEMORY_MB", 16384)
}

fn quota_max_disk_gb() -> i64 {
    env_or("DEVENV_QUOTA_MAX_DISK_GB", 100)
}

impl Default for QuotaDefaults {
    fn default() -> Self {
        Self {
            max_concurrent_environments: quota_max_environments(),
            max_vcpus_per_environment: quota_max_vcpus(),
            max_memory_mb_per_environment: quota_max_memory_mb(),
            max_disk_gb_per_environment: quota_max_disk_gb(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_vcpus: default_vcpus(),
            default_memory_mb: default_memory_mb(),
            default_disk_gb: default_disk_gb(),
            default_duration_hours: default_duration_hours(),
            max_duration_hours: max_duration_hours(),
            quota: QuotaDefaults::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        Self::default()
    }
}
