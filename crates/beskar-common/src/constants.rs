//! Shared constants for Beskar components.

/// Default configuration directory
pub const DEFAULT_CONFIG_DIR: &str = "/etc/beskar";

/// Configuration file name looked up inside the configuration directory
pub const BESKAR_CONFIG_FILE: &str = "beskar.yaml";

/// Root directory forced on the filesystem storage driver when running
/// from the embedded default configuration
pub const IN_MEMORY_REGISTRY_ROOT: &str = "/tmp/beskar-registry";

/// Default cache size when unset
pub const DEFAULT_CACHE_SIZE: u32 = 64;

/// Default catalog max entries when unset or non-positive
pub const DEFAULT_CATALOG_MAX_ENTRIES: i64 = 1000;

/// Default registry log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable set by Kubernetes inside every pod
pub const KUBERNETES_SERVICE_HOST_ENV: &str = "KUBERNETES_SERVICE_HOST";

/// Label selecting the endpoints of gossip-enabled Beskar services
pub const GOSSIP_LABEL_KEY: &str = "go.ciq.dev/beskar-gossip";

/// Service account namespace file mounted in every pod
pub const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Deadline for a single endpoint listing attempt (seconds)
pub const DISCOVERY_ATTEMPT_TIMEOUT_SECS: u64 = 5;

/// Default overall peer discovery budget (seconds)
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 120;

/// Validity of a freshly minted cluster CA (years)
pub const CA_VALIDITY_YEARS: i32 = 10;

/// Common name of the cluster CA
pub const CA_COMMON_NAME: &str = "beskar";
