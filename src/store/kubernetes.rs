use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::election::{LockRecord, ResourceVersion};
use crate::error::{Result, StoreError};
use crate::store::LockStore;

/// Annotation holding the JSON leader record on ConfigMap locks.
pub const LEADER_ANNOTATION: &str = "control-plane.alpha.kubernetes.io/leader";

/// Kubernetes object used as the election lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KubeLockKind {
    /// `coordination.k8s.io/v1` Lease; the record maps onto the lease spec.
    Lease,
    /// ConfigMap carrying the record as JSON in [`LEADER_ANNOTATION`].
    ConfigMap,
}

/// Builds a client from an explicit kubeconfig, or from the in-cluster /
/// default environment when none is given.
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            let config =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
            Ok(Client::try_from(config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}

/// Lock store backed by one named Kubernetes object.
///
/// Conditional writes rely on `metadata.resourceVersion`: the API server
/// rejects a patch carrying a stale version with 409 Conflict.
#[derive(Clone)]
pub struct KubeLockStore {
    client: Client,
    kind: KubeLockKind,
    namespace: String,
    name: String,
}

impl KubeLockStore {
    pub fn new(
        client: Client,
        kind: KubeLockKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn leases(&self) -> Api<Lease> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn config_maps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn metadata(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl LockStore for KubeLockStore {
    async fn fetch(&self) -> std::result::Result<Option<LockRecord>, StoreError> {
        match self.kind {
            KubeLockKind::Lease => match self.leases().get_opt(&self.name).await {
                Ok(Some(lease)) => record_from_lease(&lease).map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(classify(e)),
            },
            KubeLockKind::ConfigMap => match self.config_maps().get_opt(&self.name).await {
                Ok(Some(cm)) => record_from_config_map(&cm).map(Some),
                Ok(None) => Ok(None),
                Err(e) => Err(classify(e)),
            },
        }
    }

    async fn create(
        &self,
        record: &LockRecord,
    ) -> std::result::Result<ResourceVersion, StoreError> {
        let params = PostParams::default();
        let metadata = match self.kind {
            KubeLockKind::Lease => {
                let lease = Lease {
                    metadata: self.metadata(),
                    spec: Some(lease_spec(record)),
                };
                self.leases()
                    .create(&params, &lease)
                    .await
                    .map_err(classify)?
                    .metadata
            }
            KubeLockKind::ConfigMap => {
                let mut metadata = self.metadata();
                metadata.annotations = Some(
                    [(LEADER_ANNOTATION.to_string(), encode_annotation(record)?)]
                        .into_iter()
                        .collect(),
                );
                let cm = ConfigMap {
                    metadata,
                    ..Default::default()
                };
                self.config_maps()
                    .create(&params, &cm)
                    .await
                    .map_err(classify)?
                    .metadata
            }
        };
        tracing::debug!(lock = %self.describe(), holder = %record.holder_identity, "Created lock record");
        version_of(&metadata)
    }

    async fn update(
        &self,
        record: &LockRecord,
        expected: &ResourceVersion,
    ) -> std::result::Result<ResourceVersion, StoreError> {
        // Without a version the patch would be unconditional.
        if expected.is_empty() {
            return Err(StoreError::Conflict);
        }

        let params = PatchParams::default();
        let metadata = match self.kind {
            KubeLockKind::Lease => {
                let patch = json!({
                    "metadata": { "resourceVersion": expected.as_str() },
                    "spec": lease_spec(record),
                });
                self.leases()
                    .patch(&self.name, &params, &Patch::Merge(&patch))
                    .await
                    .map_err(classify)?
                    .metadata
            }
            KubeLockKind::ConfigMap => {
                let encoded = encode_annotation(record)?;
                let patch = json!({
                    "metadata": {
                        "resourceVersion": expected.as_str(),
                        "annotations": { LEADER_ANNOTATION: encoded },
                    },
                });
                self.config_maps()
                    .patch(&self.name, &params, &Patch::Merge(&patch))
                    .await
                    .map_err(classify)?
                    .metadata
            }
        };
        tracing::trace!(lock = %self.describe(), holder = %record.holder_identity, "Updated lock record");
        version_of(&metadata)
    }

    fn describe(&self) -> String {
        let kind = match self.kind {
            KubeLockKind::Lease => "leases",
            KubeLockKind::ConfigMap => "configmaps",
        };
        format!("{}/{}/{}", kind, self.namespace, self.name)
    }
}

/// Maps API failures onto store outcomes; anything but a conflict or a missing
/// object is treated as the store being unavailable.
fn classify(err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict,
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound,
        other => StoreError::unavailable(other.to_string()),
    }
}

fn version_of(metadata: &ObjectMeta) -> std::result::Result<ResourceVersion, StoreError> {
    metadata
        .resource_version
        .clone()
        .map(ResourceVersion::new)
        .ok_or_else(|| StoreError::Malformed("object has no resourceVersion".to_string()))
}

fn to_u32(value: Option<i32>, field: &str) -> std::result::Result<u32, StoreError> {
    u32::try_from(value.unwrap_or(0))
        .map_err(|_| StoreError::Malformed(format!("{} is negative", field)))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn lease_spec(record: &LockRecord) -> LeaseSpec {
    LeaseSpec {
        holder_identity: Some(record.holder_identity.clone()),
        lease_duration_seconds: Some(to_i32(record.lease_duration_seconds)),
        acquire_time: Some(MicroTime(record.acquire_time)),
        renew_time: Some(MicroTime(record.renew_time)),
        lease_transitions: Some(to_i32(record.leader_transitions)),
        ..Default::default()
    }
}

fn record_from_lease(lease: &Lease) -> std::result::Result<LockRecord, StoreError> {
    let version = version_of(&lease.metadata)?;
    let spec = lease.spec.clone().unwrap_or_default();
    Ok(LockRecord {
        holder_identity: spec.holder_identity.unwrap_or_default(),
        lease_duration_seconds: to_u32(spec.lease_duration_seconds, "leaseDurationSeconds")?,
        acquire_time: spec.acquire_time.map(|t| t.0).unwrap_or_default(),
        renew_time: spec.renew_time.map(|t| t.0).unwrap_or_default(),
        leader_transitions: to_u32(spec.lease_transitions, "leaseTransitions")?,
        version,
    })
}

/// Leader record as stored in the ConfigMap annotation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderElectionRecord {
    #[serde(default)]
    holder_identity: String,
    #[serde(default)]
    lease_duration_seconds: i64,
    #[serde(default)]
    acquire_time: DateTime<Utc>,
    #[serde(default)]
    renew_time: DateTime<Utc>,
    #[serde(default)]
    leader_transitions: i64,
}

fn encode_annotation(record: &LockRecord) -> std::result::Result<String, StoreError> {
    let stored = LeaderElectionRecord {
        holder_identity: record.holder_identity.clone(),
        lease_duration_seconds: i64::from(record.lease_duration_seconds),
        acquire_time: record.acquire_time,
        renew_time: record.renew_time,
        leader_transitions: i64::from(record.leader_transitions),
    };
    serde_json::to_string(&stored).map_err(|e| StoreError::Malformed(e.to_string()))
}

fn record_from_config_map(cm: &ConfigMap) -> std::result::Result<LockRecord, StoreError> {
    let version = version_of(&cm.metadata)?;
    let annotation = cm
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(LEADER_ANNOTATION));

    // An existing ConfigMap without the annotation is an unclaimed lock.
    let Some(raw) = annotation else {
        return Ok(LockRecord {
            holder_identity: String::new(),
            lease_duration_seconds: 0,
            acquire_time: DateTime::<Utc>::default(),
            renew_time: DateTime::<Utc>::default(),
            leader_transitions: 0,
            version,
        });
    };

    let stored: LeaderElectionRecord = serde_json::from_str(raw)
        .map_err(|e| StoreError::Malformed(format!("{}: {}", LEADER_ANNOTATION, e)))?;
    Ok(LockRecord {
        holder_identity: stored.holder_identity,
        lease_duration_seconds: u32::try_from(stored.lease_duration_seconds).map_err(|_| {
            StoreError::Malformed("leaseDurationSeconds out of range".to_string())
        })?,
        acquire_time: stored.acquire_time,
        renew_time: stored.renew_time,
        leader_transitions: u32::try_from(stored.leader_transitions)
            .map_err(|_| StoreError::Malformed("leaderTransitions out of range".to_string()))?,
        version,
    })
}
