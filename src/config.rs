//! Configuration types for doc-export

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

/// Export behavior configuration (concurrency, chunking, retries)
///
/// Groups settings related to how export jobs are admitted, rendered, and
/// retried. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ExportConfig {
    /// Directory where finished export artifacts are written (default: "./exports")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum concurrently executing exports (default: 3)
    ///
    /// Exports beyond this limit wait for a slot; the wait is bounded by
    /// `admission_timeout`.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_exports: usize,

    /// How long a task may wait for an export slot before being rejected
    /// (default: 30 seconds)
    ///
    /// Rejection does not fail the task; it stays Pending and can be
    /// started again later.
    #[serde(default = "default_admission_timeout", with = "duration_serde")]
    pub admission_timeout: Duration,

    /// Chunk size in bytes for streaming rendered output (default: 64 KiB)
    ///
    /// Must be between 1 KiB and 1 MiB; values outside that range are
    /// rejected before any rendering starts.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum times a failed export may be retried (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_concurrent_exports: default_max_concurrent(),
            admission_timeout: default_admission_timeout(),
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
        }
    }
}

/// Data storage and state management configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// Database path (default: "./doc-export.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:8790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Optional API key for authentication
    ///
    /// When set, HTTP requests must carry it in the `X-Api-Key` header and
    /// WebSocket connections in the `api_key` query parameter.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Main configuration for ExportPipeline
///
/// Fields are organized into logical sub-configs:
/// - [`export`](ExportConfig) — concurrency, chunking, retries
/// - [`persistence`](PersistenceConfig) — database location
/// - [`server`](ApiConfig) — REST/WebSocket API settings
///
/// The export sub-config is flattened so the serialized format stays flat
/// (no nesting) for embedding applications with simple config files.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Export behavior settings (concurrency, chunking, retries)
    #[serde(flatten)]
    pub export: ExportConfig,

    /// Data storage and state management
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// REST/WebSocket API settings
    #[serde(default)]
    pub api: ApiConfig,
}

// Convenience accessors — allow call sites to use `config.output_dir()` etc.
// without reaching through the sub-config structs.
impl Config {
    /// Directory where finished export artifacts are written
    pub fn output_dir(&self) -> &PathBuf {
        &self.export.output_dir
    }

    /// Maximum concurrently executing exports
    pub fn max_concurrent_exports(&self) -> usize {
        self.export.max_concurrent_exports
    }

    /// Bound on the wait for an export slot
    pub fn admission_timeout(&self) -> Duration {
        self.export.admission_timeout
    }
}

// Default value functions
fn default_output_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_admission_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_database_path() -> PathBuf {
    PathBuf::from("doc-export.db")
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8790))
}

fn default_true() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
