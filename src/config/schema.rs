//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the registry.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Placeholder written over secrets by [`RegistryConfig::sanitized`].
pub const REDACTED: &str = "******";

/// Driver parameter keys that carry credentials.
const SECRET_DRIVER_KEYS: &[&str] = &["accesskey", "secretkey", "sessiontoken"];

/// Root configuration for the registry.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Listener, TLS, auth and request-policy settings.
    pub http: HttpConfig,

    /// Default storage plus optional sub-path stores.
    pub storage: StorageConfig,

    /// Log level and sinks.
    pub log: LogConfig,

    /// Optional extension settings. `None` disables every extension hook.
    pub extensions: Option<ExtensionsConfig>,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HttpConfig {
    /// Host or IP to bind.
    pub address: String,

    /// TCP port to bind. `0` picks an ephemeral port.
    pub port: u16,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Password-based authentication.
    pub auth: Option<AuthConfig>,

    /// Allow anonymous read access to every repository.
    pub allow_read_access: bool,

    /// Value of `Access-Control-Allow-Origin`; empty means `*`.
    pub allow_origin: String,

    /// Optional request rate limits.
    pub rate_limit: Option<RateLimitConfig>,

    /// Repository access-control rules. Hot-reloadable.
    pub access_control: Option<AccessControlConfig>,

    /// Upper bound on the in-flight request drain at shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 5000,
            tls: None,
            auth: None,
            allow_read_access: false,
            allow_origin: String::new(),
            rate_limit: None,
            access_control: None,
            shutdown_grace_secs: 10,
        }
    }
}

impl HttpConfig {
    /// True when password-based authentication is configured.
    pub fn has_password_auth(&self) -> bool {
        self.auth
            .as_ref()
            .and_then(|auth| auth.htpasswd_path.as_ref())
            .is_some_and(|path| !path.as_os_str().is_empty())
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert: Option<PathBuf>,

    /// Path to private key file (PEM).
    pub key: Option<PathBuf>,

    /// Path to the trusted client CA bundle (PEM).
    pub ca_cert: Option<PathBuf>,
}

/// Password authentication settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Path to an htpasswd file.
    pub htpasswd_path: Option<PathBuf>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Global requests per second.
    pub rate: Option<u32>,

    /// Per-method limits, applied after the global limit.
    pub methods: Vec<MethodRateLimit>,
}

/// A rate limit for one HTTP method.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MethodRateLimit {
    /// HTTP method name (e.g. `GET`).
    pub method: String,

    /// Requests per second for this method.
    pub rate: u32,
}

/// Repository access-control rules.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AccessControlConfig {
    /// Repository pattern -> policy group.
    pub repositories: BTreeMap<String, PolicyGroup>,

    /// Policy granted on every repository, checked before repository rules.
    pub admin_policy: Option<Policy>,
}

/// Policies attached to one repository pattern.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct PolicyGroup {
    /// Per-user grants.
    pub policies: Vec<Policy>,

    /// Actions granted to every authenticated user.
    pub default_policy: Vec<String>,

    /// Actions granted to anonymous clients.
    pub anonymous_policy: Vec<String>,
}

/// A set of users and the actions they may perform.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct Policy {
    pub users: Vec<String>,
    pub actions: Vec<String>,
}

/// Storage declaration for the default store.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Store settings shared with sub-paths.
    #[serde(flatten)]
    pub store: StoreConfig,

    /// Route name -> sub-path store.
    pub sub_paths: BTreeMap<String, StoreConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            sub_paths: BTreeMap::new(),
        }
    }
}

/// Declaration of a single store (default or sub-path).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Local root. For remote stores this is the local caching root.
    pub root_directory: Option<PathBuf>,

    /// Deduplicate identical blobs.
    pub dedupe: bool,

    /// Enable garbage collection.
    pub gc: bool,

    /// Minimum age of an abandoned upload before GC removes it.
    pub gc_delay_secs: u64,

    /// Period of background GC. `0` disables the periodic task.
    pub gc_interval_secs: u64,

    /// Commit manifests to the store.
    pub commit: bool,

    /// Remote driver parameters. Must carry a `name` key.
    pub storage_driver: Option<toml::Table>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_directory: None,
            dedupe: true,
            gc: true,
            gc_delay_secs: 3600,
            gc_interval_secs: 0,
            commit: false,
            storage_driver: None,
        }
    }
}

impl StoreConfig {
    /// Name of the configured remote driver, if any.
    pub fn driver_name(&self) -> Option<String> {
        self.storage_driver.as_ref().map(|params| match params.get("name") {
            Some(toml::Value::String(name)) => name.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Optional log file; stdout when unset.
    pub output: Option<PathBuf>,

    /// Optional audit log file.
    pub audit: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: None,
            audit: None,
        }
    }
}

/// Optional extension settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ExtensionsConfig {
    pub metrics: Option<MetricsConfig>,
    pub search: Option<SearchConfig>,
    pub sync: Option<SyncConfig>,
    pub scrub: Option<ScrubConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enable: bool,
    /// Path the metrics route is mounted on.
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable: true,
            path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    pub enable: bool,
    /// Vulnerability database refresh period.
    pub update_interval_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enable: true,
            update_interval_secs: 2 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub enable: bool,
    /// Upstream registries to mirror from.
    pub registries: Vec<SyncRegistry>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enable: true,
            registries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct SyncRegistry {
    pub urls: Vec<String>,
    pub on_demand: bool,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ScrubConfig {
    pub enable: bool,
    pub interval_secs: u64,
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            enable: true,
            interval_secs: 24 * 60 * 60,
        }
    }
}

impl ExtensionsConfig {
    /// Sync settings when present and enabled.
    pub fn active_sync(&self) -> Option<&SyncConfig> {
        self.sync.as_ref().filter(|sync| sync.enable)
    }
}

impl RegistryConfig {
    /// A copy safe to log: credentials and auth file locations are redacted.
    pub fn sanitized(&self) -> RegistryConfig {
        let mut clean = self.clone();

        if let Some(auth) = clean.http.auth.as_mut() {
            if auth.htpasswd_path.is_some() {
                auth.htpasswd_path = Some(PathBuf::from(REDACTED));
            }
        }

        redact_driver(&mut clean.storage.store);
        for store in clean.storage.sub_paths.values_mut() {
            redact_driver(store);
        }

        clean
    }
}

fn redact_driver(store: &mut StoreConfig) {
    if let Some(params) = store.storage_driver.as_mut() {
        for key in SECRET_DRIVER_KEYS {
            if let Some(value) = params.get_mut(*key) {
                *value = toml::Value::String(REDACTED.to_string());
            }
        }
    }
}
