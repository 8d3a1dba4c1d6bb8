//! Gossip peer discovery.
//!
//! Outside Kubernetes the peer set is the static list from the configuration.
//! Inside Kubernetes the peers are the addresses of the endpoints labelled
//! `go.ciq.dev/beskar-gossip=true` in the pod's namespace, minus this pod.

use k8s_openapi::api::core::v1::Endpoints;
use kube::api::ListParams;
use kube::{Api, Client};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::OnceCell;

use beskar_common::constants::{
    DEFAULT_DISCOVERY_TIMEOUT_SECS, DISCOVERY_ATTEMPT_TIMEOUT_SECS, GOSSIP_LABEL_KEY,
    KUBERNETES_SERVICE_HOST_ENV, NAMESPACE_FILE,
};
use beskar_common::{BeskarError, Result};

use crate::config::BeskarConfig;
use crate::netutil;
use crate::retry::{ExponentialBackoff, retry_notify};

/// How this node finds its peers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Deployment {
    /// Static peer list from the configuration
    Static,
    /// Endpoint discovery through the Kubernetes API
    Kubernetes {
        /// Kubernetes API service host, used to find the pod address
        service_host: String,
    },
}

impl Deployment {
    /// Detect the deployment from the process environment
    pub fn detect(config: &BeskarConfig) -> Self {
        if !config.run_in_kubernetes() {
            return Self::Static;
        }
        match std::env::var(KUBERNETES_SERVICE_HOST_ENV) {
            Ok(service_host) => Self::Kubernetes { service_host },
            Err(_) => Self::Static,
        }
    }

    pub fn is_orchestrated(&self) -> bool {
        matches!(self, Self::Kubernetes { .. })
    }
}

/// Bootstrap knobs
#[derive(Clone, Debug)]
pub struct BootstrapOptions {
    pub deployment: Deployment,
    /// Overall peer discovery budget
    pub discovery_timeout: Duration,
    /// Deadline of a single endpoint listing
    pub attempt_timeout: Duration,
    /// File holding the pod namespace
    pub namespace_file: PathBuf,
}

impl BootstrapOptions {
    pub fn new(deployment: Deployment, discovery_timeout: Duration) -> Self {
        Self {
            deployment,
            discovery_timeout,
            attempt_timeout: Duration::from_secs(DISCOVERY_ATTEMPT_TIMEOUT_SECS),
            namespace_file: PathBuf::from(NAMESPACE_FILE),
        }
    }
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self::new(
            Deployment::Static,
            Duration::from_secs(DEFAULT_DISCOVERY_TIMEOUT_SECS),
        )
    }
}

/// Port exposed by an endpoint subset
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointPort {
    pub port: i32,
    pub protocol: String,
}

/// Addresses sharing a set of ports
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointSubset {
    pub addresses: Vec<String>,
    pub ports: Vec<EndpointPort>,
}

/// Capability to list endpoint subsets matching a label selector
pub trait PeerLister {
    /// Prepare the underlying client. Called once before any listing;
    /// failures here are not retried.
    fn connect(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    fn list_endpoints(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> impl Future<Output = Result<Vec<EndpointSubset>>> + Send;
}

/// Endpoint lister backed by the in-cluster Kubernetes API.
///
/// The client is only created on first use, so static deployments never
/// touch the service account.
#[derive(Default)]
pub struct KubeEndpointLister {
    client: OnceCell<Client>,
}

impl KubeEndpointLister {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<Client> {
        self.client
            .get_or_try_init(|| async {
                let config = kube::Config::incluster().map_err(|e| {
                    BeskarError::Discovery(format!("while getting k8s cluster configuration: {e}"))
                })?;
                Client::try_from(config).map_err(|e| {
                    BeskarError::Discovery(format!("while instantiating k8s client: {e}"))
                })
            })
            .await
            .cloned()
    }
}

impl PeerLister for KubeEndpointLister {
    async fn connect(&self) -> Result<()> {
        self.client().await.map(|_| ())
    }

    async fn list_endpoints(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<EndpointSubset>> {
        let api: Api<Endpoints> = Api::namespaced(self.client().await?, namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| BeskarError::Discovery(format!("while listing endpoints: {e}")))?;

        Ok(list.items.iter().flat_map(convert_endpoints).collect())
    }
}

fn convert_endpoints(ep: &Endpoints) -> Vec<EndpointSubset> {
    ep.subsets
        .iter()
        .flatten()
        .map(|subset| EndpointSubset {
            addresses: subset
                .addresses
                .iter()
                .flatten()
                .map(|a| a.ip.clone())
                .collect(),
            ports: subset
                .ports
                .iter()
                .flatten()
                .map(|p| EndpointPort {
                    port: p.port,
                    // Kubernetes defaults an unset protocol to TCP
                    protocol: p.protocol.clone().unwrap_or_else(|| "TCP".to_string()),
                })
                .collect(),
        })
        .collect()
}

/// Resolve the gossip peers of this node
pub async fn resolve_peers<L: PeerLister>(
    config: &BeskarConfig,
    lister: &L,
    options: &BootstrapOptions,
) -> Result<Vec<String>> {
    let service_host = match &options.deployment {
        Deployment::Static => return Ok(config.gossip.peers.clone()),
        Deployment::Kubernetes { service_host } => service_host,
    };

    let namespace = tokio::fs::read_to_string(&options.namespace_file).await?;
    let namespace = namespace.trim();
    lister.connect().await?;
    let pod_ip = netutil::route_source_address(service_host).await?;
    let selector = format!("{GOSSIP_LABEL_KEY}=true");

    tracing::info!(
        namespace = %namespace,
        pod_ip = %pod_ip,
        selector = %selector,
        timeout = ?options.discovery_timeout,
        "Discovering gossip peers"
    );

    let policy = ExponentialBackoff::with_max_elapsed_time(options.discovery_timeout);
    retry_notify(
        &policy,
        || list_peers(lister, namespace, &selector, &pod_ip, options.attempt_timeout),
        |err, wait| {
            tracing::warn!(error = %err, retry_in = ?wait, "Gossip peer discovery failed");
        },
    )
    .await
}

async fn list_peers<L: PeerLister>(
    lister: &L,
    namespace: &str,
    selector: &str,
    pod_ip: &str,
    deadline: Duration,
) -> Result<Vec<String>> {
    let subsets = tokio::time::timeout(deadline, lister.list_endpoints(namespace, selector))
        .await
        .map_err(|_| BeskarError::Discovery("while listing endpoints: deadline exceeded".into()))??;

    let peers = gossip_peers(&subsets, pod_ip)?;
    tracing::debug!(peers = ?peers, "Gossip peers listed");
    Ok(peers)
}

/// Peers from endpoint subsets: every address except `pod_ip`, joined with
/// the first TCP port found.
fn gossip_peers(subsets: &[EndpointSubset], pod_ip: &str) -> Result<Vec<String>> {
    let gossip_port = subsets
        .iter()
        .flat_map(|s| &s.ports)
        .find(|p| p.protocol == "TCP" && p.port > 0)
        .map(|p| p.port.to_string());

    let addresses: Vec<&str> = subsets
        .iter()
        .flat_map(|s| s.addresses.iter().map(String::as_str))
        .collect();

    let Some(port) = gossip_port else {
        return Err(BeskarError::Discovery("no gossip port found".to_string()));
    };
    if addresses.is_empty() {
        return Err(BeskarError::Discovery("no gossip peer found".to_string()));
    }

    Ok(addresses
        .into_iter()
        .filter(|ip| *ip != pod_ip)
        .map(|ip| netutil::join_host_port(ip, &port))
        .collect())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::{ConfigSource, parse_with_env};
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    fn config(peers: &str) -> BeskarConfig {
        let doc = format!(
            "version: 1.0\ngossip:\n  key: YQ==\n  peers: {peers}\nregistry:\n  storage:\n    inmemory:\n"
        );
        parse_with_env(doc.as_bytes(), ConfigSource::Embedded, Vec::new()).unwrap()
    }

    #[tokio::test]
    async fn test_static_peers_verbatim() {
        let lister = FakeLister::default();
        let options = BootstrapOptions::default();

        let peers = assert_ok!(resolve_peers(&config("[\"b:2\", \"a:1\"]"), &lister, &options).await);
        assert_eq!(peers, vec!["b:2", "a:1"]);

        let peers = assert_ok!(resolve_peers(&config("[]"), &lister, &options).await);
        assert!(peers.is_empty());
        assert_eq!(lister.calls(), 0);
    }

    #[test]
    fn test_gossip_peers_excludes_self() {
        let subsets = vec![
            subset(&["10.0.0.1", "10.0.0.2"], &[(9000, "UDP"), (5102, "TCP")]),
            subset(&["10.0.0.3"], &[(5999, "TCP")]),
        ];

        let peers = assert_ok!(gossip_peers(&subsets, "10.0.0.2"));
        assert_eq!(peers, vec!["10.0.0.1:5102", "10.0.0.3:5102"]);
    }

    #[test]
    fn test_gossip_peers_failures() {
        let err = assert_err!(gossip_peers(&[subset(&["10.0.0.1"], &[(53, "UDP")])], "10.0.0.9"));
        assert_eq!(err.to_string(), "Discovery error: no gossip port found");

        let err = assert_err!(gossip_peers(&[subset(&[], &[(5102, "TCP")])], "10.0.0.9"));
        assert_eq!(err.to_string(), "Discovery error: no gossip peer found");

        let err = assert_err!(gossip_peers(&[], "10.0.0.9"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_only_self_yields_empty_peer_set() {
        let peers = assert_ok!(gossip_peers(&[subset(&["10.0.0.1"], &[(5102, "TCP")])], "10.0.0.1"));
        assert!(peers.is_empty());
    }

    #[test]
    fn test_ipv6_peers_are_bracketed() {
        let peers = assert_ok!(gossip_peers(&[subset(&["fd00::2"], &[(5102, "TCP")])], "fd00::1"));
        assert_eq!(peers, vec!["[fd00::2]:5102"]);
    }

    #[tokio::test]
    async fn test_kubernetes_discovery_retries_until_success() {
        let tmp = tempfile::tempdir().unwrap();
        let options = kube_options(tmp.path(), Duration::from_secs(10));
        let lister = FakeLister::with(vec![
            Err(BeskarError::Discovery("while listing endpoints: connection refused".into())),
            Ok(vec![subset(&["10.0.0.5"], &[])]),
            Ok(vec![subset(&["127.0.0.1", "10.0.0.5"], &[(5102, "TCP")])]),
        ]);

        let peers = assert_ok!(resolve_peers(&config("[\"ignored:1\"]"), &lister, &options).await);
        assert_eq!(peers, vec!["10.0.0.5:5102"]);
        assert_eq!(lister.calls(), 3);

        let queries = lister.queries.lock().unwrap();
        assert_eq!(queries[0], ("beskar".to_string(), "go.ciq.dev/beskar-gossip=true".to_string()));
    }

    #[tokio::test]
    async fn test_kubernetes_discovery_gives_up_with_last_error() {
        let tmp = tempfile::tempdir().unwrap();
        let options = kube_options(tmp.path(), Duration::from_millis(900));
        let lister = FakeLister::with(vec![Ok(vec![subset(&[], &[(5102, "TCP")])])]);

        let err = assert_err!(resolve_peers(&config("[]"), &lister, &options).await);
        assert_eq!(err.to_string(), "Discovery error: orchestrator unavailable");
        assert!(lister.calls() >= 2);
    }

    #[tokio::test]
    async fn test_slow_listing_hits_attempt_deadline() {
        let tmp = tempfile::tempdir().unwrap();
        let mut options = kube_options(tmp.path(), Duration::ZERO);
        options.attempt_timeout = Duration::from_millis(20);
        let lister = FakeLister {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        };

        let err = assert_err!(resolve_peers(&config("[]"), &lister, &options).await);
        assert!(err.to_string().contains("deadline exceeded"));
        assert_eq!(lister.calls(), 1);
    }

    #[tokio::test]
    async fn test_client_setup_failure_is_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let options = kube_options(tmp.path(), Duration::from_secs(60));
        let lister = FakeLister {
            connect_error: Mutex::new(Some(BeskarError::Discovery(
                "while getting k8s cluster configuration: missing token".into(),
            ))),
            ..Default::default()
        };

        let err = assert_err!(resolve_peers(&config("[]"), &lister, &options).await);
        assert!(err.to_string().contains("missing token"));
        assert_eq!(*lister.connects.lock().unwrap(), 1);
        assert_eq!(lister.calls(), 0);
    }

    #[tokio::test]
    async fn test_client_connects_once_across_retries() {
        let tmp = tempfile::tempdir().unwrap();
        let options = kube_options(tmp.path(), Duration::from_secs(10));
        let lister = FakeLister::with(vec![
            Err(BeskarError::Discovery("while listing endpoints: timeout".into())),
            Ok(vec![subset(&["10.0.0.5"], &[(5102, "TCP")])]),
        ]);

        assert_ok!(resolve_peers(&config("[]"), &lister, &options).await);
        assert_eq!(*lister.connects.lock().unwrap(), 1);
        assert_eq!(lister.calls(), 2);
    }

    #[tokio::test]
    async fn test_missing_namespace_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut options = kube_options(tmp.path(), Duration::ZERO);
        options.namespace_file = tmp.path().join("missing");

        let err = assert_err!(resolve_peers(&config("[]"), &FakeLister::default(), &options).await);
        assert!(matches!(err, BeskarError::Io(_)));
    }

    #[test]
    fn test_convert_endpoints_defaults_protocol() {
        use k8s_openapi::api::core::v1::{
            EndpointAddress, EndpointPort as K8sPort, EndpointSubset as K8sSubset,
        };

        let ep = Endpoints {
            subsets: Some(vec![K8sSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "10.0.0.7".to_string(),
                    ..Default::default()
                }]),
                ports: Some(vec![K8sPort {
                    port: 5102,
                    protocol: None,
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            ..Default::default()
        };

        assert_eq!(
            convert_endpoints(&ep),
            vec![subset(&["10.0.0.7"], &[(5102, "TCP")])]
        );
        assert!(convert_endpoints(&Endpoints::default()).is_empty());
    }
}
