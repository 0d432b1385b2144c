//! Configuration for the chat gateway.
//!
//! Every setting has a default; `from_env` overrides them from
//! `CHAT_GATEWAY_*` environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::conversation::errors::{GatewayError, GatewayResult};
use crate::storage::ObjectBackendConfig;
use crate::storage::sqlite_kv::{SqliteKvStore, is_valid_table_name};

/// Prefix of every environment variable read by [`GatewayConfig::from_env`].
pub const ENV_PREFIX: &str = "CHAT_GATEWAY_";

/// Port bound when `CHAT_GATEWAY_PORT` is unset.
pub const DEFAULT_PORT: u16 = 8000;

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP listener settings.
    pub server: ServerConfig,
    /// Key-value store settings.
    pub kv: KvConfig,
    /// Object store settings.
    pub objects: ObjectConfig,
    /// Behavior of appends to a conversation that does not exist.
    pub append_mode: AppendMode,
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    pub host: IpAddr,
    /// Bind port.
    pub port: u16,
    /// Largest accepted request body, in bytes.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_upload_bytes: 25 * 1024 * 1024, // 25 MB
        }
    }
}

impl ServerConfig {
    /// Socket address to bind.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Key-value backend selection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum KvBackend {
    /// Process memory; contents are lost on exit.
    Memory,
    /// `SQLite` database file.
    Sqlite {
        /// Database path.
        path: PathBuf,
    },
}

/// Key-value store settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvConfig {
    /// Backend.
    pub backend: KvBackend,
    /// Table holding conversation and metadata records.
    pub table: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            backend: KvBackend::Sqlite {
                path: PathBuf::from("chat_gateway.db"),
            },
            table: SqliteKvStore::DEFAULT_TABLE.to_string(),
        }
    }
}

/// Object store settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectConfig {
    /// Backend.
    pub backend: ObjectBackendConfig,
    /// Bucket receiving uploaded files.
    pub bucket: String,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            backend: ObjectBackendConfig::default(),
            bucket: "chat-app-documents".to_string(),
        }
    }
}

/// What an append does when the conversation record is missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppendMode {
    /// Reject the append with a not-found error.
    #[default]
    RequireExisting,
    /// Create a bare record holding only the new message.
    Upsert,
}

impl AppendMode {
    fn parse(raw: &str) -> GatewayResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "require-existing" | "require_existing" | "strict" => Ok(Self::RequireExisting),
            "upsert" => Ok(Self::Upsert),
            other => Err(GatewayError::InvalidConfig(format!(
                "unknown append mode '{other}'; expected require-existing or upsert"
            ))),
        }
    }
}

impl GatewayConfig {
    /// Load from the process environment.
    ///
    /// # Errors
    /// Returns an error if a variable holds an unparsable value or validation fails.
    pub fn from_env() -> GatewayResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using `lookup` to resolve variable names (including the prefix).
    ///
    /// # Errors
    /// Returns an error if a variable holds an unparsable value or validation fails.
    pub fn from_lookup<F>(lookup: F) -> GatewayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}")).filter(|v| !v.trim().is_empty())
        };
        let mut config = Self::default();

        if let Some(host) = var("HOST") {
            config.server.host = parse_value("HOST", &host)?;
        }
        if let Some(port) = var("PORT") {
            config.server.port = parse_value("PORT", &port)?;
        }
        if let Some(max) = var("MAX_UPLOAD_BYTES") {
            config.server.max_upload_bytes = parse_value("MAX_UPLOAD_BYTES", &max)?;
        }

        if let Some(table) = var("TABLE") {
            config.kv.table = table;
        }
        let sqlite_path = var("SQLITE_PATH");
        config.kv.backend = match var("KV_BACKEND").as_deref().map(str::to_ascii_lowercase) {
            None => match sqlite_path {
                Some(path) => KvBackend::Sqlite {
                    path: PathBuf::from(path),
                },
                None => config.kv.backend,
            },
            Some(name) if name == "memory" => KvBackend::Memory,
            Some(name) if name == "sqlite" => KvBackend::Sqlite {
                path: sqlite_path.map_or_else(|| PathBuf::from("chat_gateway.db"), PathBuf::from),
            },
            Some(other) => {
                return Err(GatewayError::InvalidConfig(format!(
                    "unknown key-value backend '{other}'; expected memory or sqlite"
                )));
            }
        };

        if let Some(bucket) = var("BUCKET") {
            config.objects.bucket = bucket;
        }
        config.objects.backend = match var("OBJECT_BACKEND").as_deref().map(str::to_ascii_lowercase)
        {
            None => match var("FS_ROOT") {
                Some(root) => ObjectBackendConfig::Fs {
                    root: PathBuf::from(root),
                },
                None => config.objects.backend,
            },
            Some(name) if name == "fs" => ObjectBackendConfig::Fs {
                root: var("FS_ROOT").map_or_else(|| PathBuf::from("./uploads"), PathBuf::from),
            },
            Some(name) if name == "s3" => ObjectBackendConfig::S3 {
                region: var("S3_REGION").unwrap_or_else(|| "us-west-2".to_string()),
                endpoint: var("S3_ENDPOINT"),
                access_key_id: var("S3_ACCESS_KEY_ID"),
                secret_access_key: var("S3_SECRET_ACCESS_KEY"),
            },
            Some(name) if name == "memory" => ObjectBackendConfig::Memory,
            Some(other) => {
                return Err(GatewayError::InvalidConfig(format!(
                    "unknown object backend '{other}'; expected fs, s3 or memory"
                )));
            }
        };

        if let Some(mode) = var("APPEND_MODE") {
            config.append_mode = AppendMode::parse(&mode)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidConfig`] naming the first offending setting.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.server.port == 0 {
            return Err(GatewayError::InvalidConfig(
                "server.port must be > 0".to_string(),
            ));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(GatewayError::InvalidConfig(
                "server.max_upload_bytes must be > 0".to_string(),
            ));
        }

        if !is_valid_table_name(&self.kv.table) {
            return Err(GatewayError::InvalidConfig(format!(
                "kv.table '{}' may only contain letters, digits, '_' and '-'",
                self.kv.table
            )));
        }

        if self.objects.bucket.is_empty() || self.objects.bucket.contains('/') {
            return Err(GatewayError::InvalidConfig(
                "objects.bucket must be non-empty and must not contain '/'".to_string(),
            ));
        }

        if let ObjectBackendConfig::S3 { region, .. } = &self.objects.backend {
            if region.is_empty() {
                return Err(GatewayError::InvalidConfig(
                    "objects.backend.region must be set for s3".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(suffix: &str, raw: &str) -> GatewayResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| {
        GatewayError::InvalidConfig(format!("{ENV_PREFIX}{suffix}='{raw}': {e}"))
    })
}
