use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use lease_elector::config::{parse_duration, ElectorConfig, LockType, PodLabelConfig};
use lease_elector::error::ElectorError;
use lease_elector::hooks::{LogHook, PodLabelHook};
use lease_elector::node::Node;
use lease_elector::shutdown::install_shutdown_handler;
use lease_elector::store::kubernetes::{connect, KubeLockKind};
use lease_elector::store::{KubeLockStore, LockStore, MemoryLockStore};

#[derive(Parser, Debug)]
#[command(name = "lease-elector")]
#[command(version)]
#[command(about = "Leader election sidecar backed by a Kubernetes lock object")]
struct Args {
    /// Address for the HTTP status endpoint, e.g. "0.0.0.0:4040" or ":4040" (optional)
    #[arg(long, env = "ELECTOR_HTTP")]
    http: Option<String>,

    /// Identity of this participant (defaults to the hostname)
    #[arg(long, env = "ELECTOR_ID", default_value = "")]
    id: String,

    /// Path to a kubeconfig file; in-cluster configuration is used when unset
    #[arg(long, env = "ELECTOR_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Lock object type: leases, configmaps or memory
    #[arg(long, env = "ELECTOR_LOCK_TYPE", default_value = "leases")]
    lock_type: String,

    /// Name of the election, used as the lock object name
    #[arg(long, env = "ELECTOR_ELECTION", default_value = "")]
    election: String,

    /// Namespace of the lock object
    #[arg(long, env = "ELECTOR_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Lease duration; renew deadline and retry period are derived from it
    #[arg(long, env = "ELECTOR_TTL", default_value = "10s", value_parser = parse_ttl)]
    ttl: Duration,

    /// Vacate the lock when shutting down while leading
    #[arg(long, env = "ELECTOR_RELEASE_ON_CANCEL", default_value_t = true, action = ArgAction::Set)]
    release_on_cancel: bool,

    /// Label set to "leader" or "standby" on this pod (requires POD_NAME)
    #[arg(long, env = "ELECTOR_POD_LABEL_KEY", default_value = "elector.leader")]
    pod_label_key: String,
}

fn parse_ttl(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

/// Accepts `host:port`, `[v6]:port` and the bare `:port` form.
fn parse_http_address(addr: &str) -> Result<SocketAddr, ElectorError> {
    let addr = addr.trim();
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else if let Some(port) = addr.strip_prefix("localhost:") {
        format!("127.0.0.1:{}", port)
    } else {
        addr.to_string()
    };
    full.parse()
        .map_err(|_| ElectorError::config(format!("invalid http address '{}'", addr)))
}

impl Args {
    fn into_config(self) -> Result<ElectorConfig, ElectorError> {
        let address = self.http.as_deref().map(parse_http_address).transpose()?;
        let lock_type: LockType = self.lock_type.parse()?;

        let pod_label = std::env::var("POD_NAME")
            .ok()
            .filter(|name| !name.trim().is_empty())
            .map(|pod_name| PodLabelConfig {
                pod_name,
                namespace: std::env::var("POD_NAMESPACE")
                    .unwrap_or_else(|_| self.namespace.clone()),
                label_key: self.pod_label_key.clone(),
            });

        Ok(ElectorConfig {
            id: self.id,
            name: self.election,
            namespace: self.namespace,
            lock_type,
            kubeconfig: self.kubeconfig,
            address,
            ttl: self.ttl,
            release_on_cancel: self.release_on_cancel,
            pod_label,
        })
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = args.into_config()?;
    config.check()?;
    config.log();

    let cancel = install_shutdown_handler()?;

    let client = match config.lock_type {
        LockType::Memory => None,
        LockType::Leases | LockType::ConfigMaps => {
            Some(connect(config.kubeconfig.as_deref()).await?)
        }
    };

    let store: Arc<dyn LockStore> = match (config.lock_type, &client) {
        (LockType::Leases, Some(client)) => Arc::new(KubeLockStore::new(
            client.clone(),
            KubeLockKind::Lease,
            config.namespace.clone(),
            config.name.clone(),
        )),
        (LockType::ConfigMaps, Some(client)) => Arc::new(KubeLockStore::new(
            client.clone(),
            KubeLockKind::ConfigMap,
            config.namespace.clone(),
            config.name.clone(),
        )),
        _ => Arc::new(MemoryLockStore::new()),
    };

    let pod_label = config.pod_label.clone();
    let mut node = Node::new(config, store)?.with_hook(Arc::new(LogHook));
    match (pod_label, client) {
        (Some(pod_label), Some(client)) => {
            tracing::info!(
                pod = %pod_label.pod_name,
                label = %pod_label.label_key,
                "Labelling own pod with election role"
            );
            node = node.with_hook(Arc::new(PodLabelHook::new(client, pod_label)));
        }
        (Some(_), None) => {
            tracing::warn!(
                "POD_NAME is set but the memory lock has no cluster access, not labelling pod"
            );
        }
        _ => {}
    }

    node.run(cancel).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting lease-elector");

    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "lease-elector failed");
        return Err(e);
    }
    Ok(())
}
