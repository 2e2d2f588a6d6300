use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::from_millis;
use crate::resources::{ResourceRequest, ResourceSpec};
use crate::state::EnvironmentState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    pub user_id: String,
    pub slug: String,
    pub state: EnvironmentState,
    pub state_message: Option<String>,
    pub host_id: Option<String>,
    pub capacity_reserved: bool,
    pub resources: ResourceSpec,
    pub network: NetworkInfo,
    pub access_token: String,
    pub repository_url: Option<String>,
    pub init_script: Option<String>,
    pub env_vars: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub destroyed_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

/// Access details reported by the worker once the VM is reachable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub ip_address: Option<String>,
    pub ssh_port: Option<i64>,
    pub vscode_port: Option<i64>,
    pub ws_endpoint: Option<String>,
}

/// Public view of an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentDetails {
    pub id: String,
    pub slug: String,
    pub state: EnvironmentState,
    pub ip_address: Option<String>,
    pub ssh_port: Option<i64>,
    pub vscode_port: Option<i64>,
    pub ws_endpoint: Option<String>,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl From<&Environment> for EnvironmentDetails {
    fn from(env: &Environment) -> Self {
        Self {
            id: env.id.clone(),
            slug: env.slug.clone(),
            state: env.state,
            ip_address: env.network.ip_address.clone(),
            ssh_port: env.network.ssh_port,
            vscode_port: env.network.vscode_port,
            ws_endpoint: env.network.ws_endpoint.clone(),
            access_token: env.access_token.clone(),
            expires_at: env.expires_at,
            created_at: env.created_at,
        }
    }
}

impl From<Environment> for EnvironmentDetails {
    fn from(env: Environment) -> Self {
        EnvironmentDetails::from(&env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEnvironmentRequest {
    pub user_id: String,
    #[serde(default)]
    pub resources: ResourceRequest,
    pub duration_hours: Option<i64>,
    pub repository_url: Option<String>,
    pub init_script: Option<String>,
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

/// Optional data accompanying a state transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionMetadata {
    /// Human-readable note stored as the environment's state message.
    pub message: Option<String>,
    pub network: Option<NetworkInfo>,
    /// Merged into the audit entry.
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl TransitionMetadata {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

const ADJECTIVES: &[&str] = &[
    "amber", "brisk", "calm", "dusty", "eager", "fuzzy", "gentle", "hollow", "icy", "jolly",
    "keen", "lucky", "misty", "nimble", "olive", "proud", "quiet", "rapid", "sunny", "tidy",
];

const NOUNS: &[&str] = &[
    "badger", "cedar", "delta", "ember", "falcon", "glacier", "harbor", "island", "juniper",
    "kestrel", "lagoon", "meadow", "nebula", "otter", "pebble", "quartz", "river", "summit",
    "tundra", "willow",
];

/// Public identifier of the form `adjective-noun-xxxx`.
pub(crate) fn generate_slug() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let suffix: u16 = rng.random();
    format!("{}-{}-{:04x}", adjective, noun, suffix)
}

/// 32 random bytes, hex encoded.
pub(crate) fn generate_access_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(sqlx::FromRow)]
pub(crate) struct EnvironmentRow {
    id: String,
    user_id: String,
    slug: String,
    state: EnvironmentState,
    state_message: Option<String>,
    host_id: Option<String>,
    capacity_reserved: bool,
    vcpus: i64,
    memory_mb: i64,
    disk_gb: i64,
    ip_address: Option<String>,
    ssh_port: Option<i64>,
    vscode_port: Option<i64>,
    ws_endpoint: Option<String>,
    access_token: String,
    repository_url: Option<String>,
    init_script: Option<String>,
    env_vars: Option<String>,
    created_at: i64,
    updated_at: i64,
    expires_at: i64,
    started_at: Option<i64>,
    stopped_at: Option<i64>,
    destroyed_at: Option<i64>,
    last_activity_at: Option<i64>,
}

impl From<EnvironmentRow> for Environment {
    fn from(row: EnvironmentRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            slug: row.slug,
            state: row.state,
            state_message: row.state_message,
            host_id: row.host_id,
            capacity_reserved: row.capacity_reserved,
            resources: ResourceSpec {
                vcpus: row.vcpus,
                memory_mb: row.memory_mb,
                disk_gb: row.disk_gb,
            },
            network: NetworkInfo {
                ip_address: row.ip_address,
                ssh_port: row.ssh_port,
                vscode_port: row.vscode_port,
                ws_endpoint: row.ws_endpoint,
            },
            access_token: row.access_token,
            repository_url: row.repository_url,
            init_script: row.init_script,
            env_vars: row
                .env_vars
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default(),
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
            expires_at: from_millis(row.expires_at),
            started_at: row.started_at.map(from_millis),
            stopped_at: row.stopped_at.map(from_millis),
            destroyed_at: row.destroyed_at.map(from_millis),
            last_activity_at: row.last_activity_at.map(from_millis),
        }
    }
}
