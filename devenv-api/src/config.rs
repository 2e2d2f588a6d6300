use devenv_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

fn default_bind_addr() -> String {
    std::env::var("DEVENV_API_BIND").unwrap_or_else(|_| "0.0.0.0:3131".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("DEVENV_API_DB_PATH") {
        return PathBuf::from(path);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".devenv")
        .join("api")
        .join("devenv.db")
}

fn default_reaper_interval() -> u64 {
    std::env::var("DEVENV_REAPER_INTERVAL")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(300) // 5 minutes
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            reaper_interval_secs: default_reaper_interval(),
            orchestrator: OrchestratorConfig::from_env(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}
