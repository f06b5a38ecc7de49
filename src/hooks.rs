use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::json;

use crate::config::PodLabelConfig;
use crate::election::LeadershipEvent;
use crate::error::{ElectorError, Result};

/// Kind of leadership change passed to hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    StartedLeading,
    StoppedLeading,
    NewLeader,
}

impl HookEvent {
    /// The hook call for a coordinator event, as `(kind, identity)`.
    ///
    /// A new leader that is this node is covered by `StartedLeading`, and a
    /// vacant lock has no identity to report, so neither produces a call.
    pub fn from_leadership(event: &LeadershipEvent, self_identity: &str) -> Option<(Self, String)> {
        match event {
            LeadershipEvent::StartedLeading => {
                Some((HookEvent::StartedLeading, self_identity.to_string()))
            }
            LeadershipEvent::StoppedLeading => {
                Some((HookEvent::StoppedLeading, self_identity.to_string()))
            }
            LeadershipEvent::NewLeader(t) if !t.self_is_leader && !t.leader.is_empty() => {
                Some((HookEvent::NewLeader, t.leader.clone()))
            }
            LeadershipEvent::NewLeader(_) => None,
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookEvent::StartedLeading => write!(f, "started-leading"),
            HookEvent::StoppedLeading => write!(f, "stopped-leading"),
            HookEvent::NewLeader => write!(f, "new-leader"),
        }
    }
}

/// Side effect run on leadership changes. Failures are logged, never fatal.
#[async_trait]
pub trait LeadershipHook: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_event(&self, event: HookEvent, identity: &str) -> Result<()>;
}

/// Logs every leadership change as a lock event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHook;

#[async_trait]
impl LeadershipHook for LogHook {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn on_event(&self, event: HookEvent, identity: &str) -> Result<()> {
        tracing::info!(event = %event, identity = %identity, "lock event");
        Ok(())
    }
}

pub const LEADER_LABEL_VALUE: &str = "leader";
pub const STANDBY_LABEL_VALUE: &str = "standby";

/// Marks the elector's own pod as `leader` or `standby` through a label.
#[derive(Clone)]
pub struct PodLabelHook {
    pods: Api<Pod>,
    config: PodLabelConfig,
}

impl PodLabelHook {
    pub fn new(client: Client, config: PodLabelConfig) -> Self {
        Self {
            pods: Api::namespaced(client, &config.namespace),
            config,
        }
    }

    /// Label value for this pod after `event`.
    pub fn label_value(event: HookEvent) -> &'static str {
        match event {
            HookEvent::StartedLeading => LEADER_LABEL_VALUE,
            HookEvent::StoppedLeading | HookEvent::NewLeader => STANDBY_LABEL_VALUE,
        }
    }
}

#[async_trait]
impl LeadershipHook for PodLabelHook {
    fn name(&self) -> &'static str {
        "pod-label"
    }

    async fn on_event(&self, event: HookEvent, _identity: &str) -> Result<()> {
        let value = Self::label_value(event);
        let labels = BTreeMap::from([(self.config.label_key.clone(), value.to_string())]);
        let patch = json!({ "metadata": { "labels": labels } });

        self.pods
            .patch(
                &self.config.pod_name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| {
                ElectorError::Hook(format!("labelling pod {}: {}", self.config.pod_name, e))
            })?;

        tracing::debug!(pod = %self.config.pod_name, label = %self.config.label_key, value, "Labelled pod");
        Ok(())
    }
}
