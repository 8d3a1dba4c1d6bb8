//! Configuration resolution for Beskar.
//!
//! The configuration lives in `<dir>/beskar.yaml`. Documents are versioned:
//! the `version` field selects a registered parser, which
//! migrates, defaults, and validates the document into a [`BeskarConfig`].

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use beskar_common::constants::{
    BESKAR_CONFIG_FILE, DEFAULT_CACHE_SIZE, DEFAULT_CATALOG_MAX_ENTRIES, DEFAULT_CONFIG_DIR,
    DEFAULT_LOG_LEVEL, IN_MEMORY_REGISTRY_ROOT, KUBERNETES_SERVICE_HOST_ENV,
};
use beskar_common::{BeskarError, Result};

/// Configuration used when no file exists in the default directory
const DEFAULT_BESKAR_CONFIG: &str = include_str!("../default/beskar.yaml");

/// Prefix of environment variables overriding configuration fields
const ENV_PREFIX: &str = "BESKAR_";

/// Log levels accepted by the registry
const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug"];

/// Where a resolved configuration came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Read from a file on disk
    File(PathBuf),
    /// Built-in default, no file backing
    #[default]
    Embedded,
}

impl ConfigSource {
    pub fn is_in_memory(&self) -> bool {
        matches!(self, Self::Embedded)
    }
}

/// Beskar configuration document
#[derive(Debug, Clone, Deserialize)]
pub struct BeskarConfig {
    /// Schema version, normalized to `major.minor`
    #[serde(skip)]
    pub version: String,

    /// Enable profiling endpoints
    #[serde(default)]
    pub profiling: bool,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub gossip: GossipConfig,

    /// Plugin name -> plugin descriptor
    #[serde(default)]
    pub plugins: BTreeMap<String, Plugin>,

    /// Embedded registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Origin of the document
    #[serde(skip)]
    pub source: ConfigSource,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    /// Cache listen address (host:port)
    #[serde(default)]
    pub addr: String,

    /// Cache size, 64 when zero
    #[serde(default)]
    pub size: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GossipConfig {
    /// Gossip bind address (host:port), empty host binds all interfaces
    #[serde(default)]
    pub addr: String,

    /// Base64 encoded shared secret
    #[serde(default)]
    pub key: String,

    /// Static peer list used outside Kubernetes
    #[serde(default)]
    pub peers: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginMtls {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, rename = "ca-cert")]
    pub ca_cert: String,

    #[serde(default, rename = "ca-key")]
    pub ca_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginBackend {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub mtls: PluginMtls,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Plugin {
    #[serde(default)]
    pub prefix: String,

    #[serde(default)]
    pub mediatype: String,

    #[serde(default)]
    pub backends: Vec<PluginBackend>,
}

/// Registry configuration.
///
/// Only the fields validated here are modelled, everything else is kept
/// verbatim in `extra` and handed to the registry untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub log: RegistryLog,

    /// Deprecated top-level log level, migrated into `log.level`
    #[serde(default)]
    pub loglevel: Option<String>,

    #[serde(default)]
    pub catalog: RegistryCatalog,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryLog {
    #[serde(default)]
    pub level: Option<String>,

    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryCatalog {
    #[serde(default)]
    pub maxentries: i64,
}

/// Storage section: one storage driver plus driver-independent options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StorageConfig(pub BTreeMap<String, Value>);

impl StorageConfig {
    /// Keys that configure storage behaviour rather than name a driver
    const OPTION_KEYS: &'static [&'static str] = &["maintenance", "cache", "delete", "redirect", "tag"];

    /// Names of declared storage drivers
    pub fn types(&self) -> Vec<&str> {
        self.0
            .keys()
            .map(String::as_str)
            .filter(|k| !Self::OPTION_KEYS.contains(k))
            .collect()
    }

    /// The single declared storage driver, if exactly one is declared
    pub fn storage_type(&self) -> Option<&str> {
        match self.types().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Mutable parameters of the declared storage driver
    pub fn parameters_mut(&mut self) -> Option<&mut Mapping> {
        let name = self.storage_type()?.to_string();
        let params = self.0.get_mut(&name)?;
        if !params.is_mapping() {
            *params = Value::Mapping(Mapping::new());
        }
        params.as_mapping_mut()
    }

    /// Parameters of the declared storage driver
    pub fn parameters(&self) -> Option<&Mapping> {
        self.0.get(self.storage_type()?)?.as_mapping()
    }
}

impl BeskarConfig {
    /// Whether the process runs inside a Kubernetes pod
    pub fn run_in_kubernetes(&self) -> bool {
        std::env::var_os(KUBERNETES_SERVICE_HOST_ENV).is_some_and(|v| !v.is_empty())
    }

    /// Look up a plugin by name
    pub fn plugin(&self, name: &str) -> Option<&Plugin> {
        self.plugins.get(name)
    }
}

/// Resolve the configuration from `dir`, or from the default directory when
/// `dir` is `None` or empty.
pub fn resolve(dir: Option<&Path>) -> Result<BeskarConfig> {
    resolve_from(Path::new(DEFAULT_CONFIG_DIR), dir)
}

fn resolve_from(default_dir: &Path, dir: Option<&Path>) -> Result<BeskarConfig> {
    let custom_dir = dir.filter(|d| !d.as_os_str().is_empty());
    let filename = custom_dir.unwrap_or(default_dir).join(BESKAR_CONFIG_FILE);

    let (buffer, source) = match std::fs::read(&filename) {
        Ok(data) => (data, ConfigSource::File(filename)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if custom_dir.is_some() {
                return Err(BeskarError::NotFound {
                    path: filename.display().to_string(),
                });
            }
            tracing::warn!(
                path = %filename.display(),
                "Config file not found, using embedded defaults"
            );
            (DEFAULT_BESKAR_CONFIG.as_bytes().to_vec(), ConfigSource::Embedded)
        }
        Err(e) => return Err(BeskarError::Io(e)),
    };

    let config = parse(&buffer, source)?;

    tracing::info!(
        version = %config.version,
        source = ?config.source,
        storage = ?config.registry.storage.storage_type(),
        "Configuration resolved"
    );

    Ok(config)
}

/// Migration/validation step for one schema version
type ParseFn = fn(Value, &ConfigSource) -> Result<BeskarConfig>;

/// Registered schema versions
const VERSIONED_PARSERS: &[(&str, ParseFn)] = &[("1.0", parse_v1)];

/// Parse a configuration buffer against the registered schema versions,
/// applying `BESKAR_*` environment overrides
pub fn parse(buffer: &[u8], source: ConfigSource) -> Result<BeskarConfig> {
    let vars = std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)));
    parse_with_env(buffer, source, vars)
}

/// Parse a configuration buffer with explicit override variables
pub fn parse_with_env<I>(buffer: &[u8], source: ConfigSource, vars: I) -> Result<BeskarConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut document: Value = serde_yaml::from_slice(buffer)
        .map_err(|e| BeskarError::Schema(format!("malformed configuration: {e}")))?;
    if document.is_null() {
        document = Value::Mapping(Mapping::new());
    }
    apply_env_overrides(&mut document, vars);

    let version = document
        .get("version")
        .ok_or_else(|| BeskarError::Schema("configuration version is missing".to_string()))
        .and_then(normalize_version)?;

    let (_, parse_fn) = VERSIONED_PARSERS
        .iter()
        .find(|(v, _)| *v == version)
        .ok_or_else(|| {
            let supported: Vec<&str> = VERSIONED_PARSERS.iter().map(|(v, _)| *v).collect();
            BeskarError::Schema(format!(
                "unsupported beskar configuration version {version} (supported: {})",
                supported.join(", ")
            ))
        })?;

    let mut config = parse_fn(document, &source)?;
    config.version = version;
    config.source = source;
    Ok(config)
}

/// Overlay `BESKAR_<FIELD>_<SUBFIELD>` variables onto the document.
///
/// Path segments match existing keys case-insensitively, with `-` in keys
/// matching `_`. Missing keys are created lowercased.
fn apply_env_overrides<I>(document: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, raw) in vars {
        let Some(path) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let segments: Vec<&str> = path.split('_').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            continue;
        }
        tracing::debug!(variable = %name, "Applying configuration override from environment");
        set_path(document, &segments, &raw);
    }
}

fn set_path(node: &mut Value, segments: &[&str], raw: &str) {
    if !node.is_mapping() {
        *node = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(map) = node else {
        return;
    };

    // Longest run of segments naming an existing key, so `ca-cert` matches CA_CERT
    let matched = (1..=segments.len()).rev().find_map(|n| {
        let wanted = segments[..n].join("_").to_uppercase();
        map.keys()
            .find(|k| k.as_str().is_some_and(|k| k.to_uppercase().replace('-', "_") == wanted))
            .map(|k| (k.clone(), n))
    });
    let (key, used) = matched.unwrap_or_else(|| (Value::from(segments[0].to_lowercase()), 1));

    let rest = &segments[used..];
    if rest.is_empty() {
        let value = override_value(map.get(&key), raw);
        map.insert(key, value);
        return;
    }
    if !map.contains_key(&key) {
        map.insert(key.clone(), Value::Null);
    }
    if let Some(child) = map.get_mut(&key) {
        set_path(child, rest, raw);
    }
}

/// String fields keep the raw text, anything else is read as YAML
fn override_value(existing: Option<&Value>, raw: &str) -> Value {
    if matches!(existing, Some(Value::String(_))) {
        return Value::String(raw.to_string());
    }
    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Null) | Err(_) => Value::String(raw.to_string()),
        Ok(value) => value,
    }
}

/// Normalize a `major[.minor]` version, given as string or bare YAML number
fn normalize_version(value: &Value) -> Result<String> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(BeskarError::Schema(format!("invalid configuration version: {other:?}")));
        }
    };

    let invalid = || BeskarError::Schema(format!("invalid configuration version: {raw:?}"));
    let (major, minor) = raw.split_once('.').unwrap_or((raw.as_str(), "0"));
    let major: u32 = major.parse().map_err(|_| invalid())?;
    let minor: u32 = minor.parse().map_err(|_| invalid())?;

    Ok(format!("{major}.{minor}"))
}

/// Lowercase and validate a log level, empty meaning unset
fn normalize_log_level(level: Option<String>) -> Result<Option<String>> {
    let Some(level) = level.map(|l| l.trim().to_lowercase()).filter(|l| !l.is_empty()) else {
        return Ok(None);
    };
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(BeskarError::Schema(format!("invalid log level: {level}")));
    }
    Ok(Some(level))
}

fn parse_v1(document: Value, source: &ConfigSource) -> Result<BeskarConfig> {
    let mut v1: BeskarConfig = serde_yaml::from_value(document)
        .map_err(|e| BeskarError::Schema(format!("malformed 1.0 configuration: {e}")))?;

    let registry = &mut v1.registry;

    // Legacy loglevel only ever flows into log.level
    let legacy = normalize_log_level(registry.loglevel.take())?;
    let level = normalize_log_level(registry.log.level.take())?;
    registry.log.level = Some(
        level
            .or(legacy)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
    );

    if registry.catalog.maxentries <= 0 {
        registry.catalog.maxentries = DEFAULT_CATALOG_MAX_ENTRIES;
    }

    match registry.storage.types().as_slice() {
        [] => {
            return Err(BeskarError::Validation(
                "no storage configuration provided".to_string(),
            ));
        }
        [_] => {}
        many => {
            return Err(BeskarError::Validation(format!(
                "must provide exactly one storage type, got: {}",
                many.join(", ")
            )));
        }
    }
    if source.is_in_memory() && registry.storage.storage_type() == Some("filesystem") {
        if let Some(params) = registry.storage.parameters_mut() {
            params.insert(
                Value::from("rootdirectory"),
                Value::from(IN_MEMORY_REGISTRY_ROOT),
            );
        }
    }

    if v1.cache.size == 0 {
        v1.cache.size = DEFAULT_CACHE_SIZE;
    }

    if v1.gossip.key.is_empty() {
        return Err(BeskarError::Validation("gossip key is missing".to_string()));
    }

    Ok(v1)
}
