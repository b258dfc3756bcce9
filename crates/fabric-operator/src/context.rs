use std::{sync::Arc, time::Duration};

use crate::{
    client::Client,
    cluster::{EventPublisher, PodLister, SecretOwnerWriter, SiblingLister, StatusClient},
    crd::ManagedResource,
    queue::UpdateQueue,
    reconcile::Offering,
    store::SpecStateStore,
};

pub const DEFAULT_STATUS_PATCH_RETRIES: usize = 2;
pub const DEFAULT_TRANSIENT_REQUEUE_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_RESTART_CONFIG_MAP: &str = "operator-restart-config";
pub const DEFAULT_POD_LABEL_KEY: &str = "app";

/// Tunables shared by the predicates and the reconciler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// How often a conflicting status patch is retried on a fresh copy.
    pub status_patch_retries: usize,

    /// Requeue delay after a transient offering error.
    pub transient_requeue_delay: Duration,

    /// Name of the config map used to coordinate node restarts.
    pub restart_config_map: String,

    /// Label key selecting the pods of a resource, the value is its name.
    pub pod_label_key: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            status_patch_retries: DEFAULT_STATUS_PATCH_RETRIES,
            transient_requeue_delay: DEFAULT_TRANSIENT_REQUEUE_DELAY,
            restart_config_map: DEFAULT_RESTART_CONFIG_MAP.to_owned(),
            pod_label_key: DEFAULT_POD_LABEL_KEY.to_owned(),
        }
    }
}

impl ControllerConfig {
    pub fn pod_selector(&self, resource_name: &str) -> String {
        format!("{key}={resource_name}", key = self.pod_label_key)
    }
}

/// Everything a controller for the managed kind `R` needs.
///
/// One context is shared between the predicates and the reconciler of a
/// kind, which is how updates detected by the former reach the latter.
pub struct Context<R: ManagedResource> {
    pub queue: Arc<UpdateQueue>,
    pub store: Arc<dyn SpecStateStore<R>>,
    pub siblings: Arc<dyn SiblingLister>,
    pub statuses: Arc<dyn StatusClient<R>>,
    pub pods: Arc<dyn PodLister>,
    pub secrets: Arc<dyn SecretOwnerWriter>,
    pub events: Arc<dyn EventPublisher>,
    pub offering: Arc<dyn Offering<R>>,
    pub config: ControllerConfig,
}

impl<R: ManagedResource> Context<R> {
    /// Builds a context talking to the cluster through `client`.
    pub fn new(client: &Client, offering: Arc<dyn Offering<R>>, config: ControllerConfig) -> Self {
        let client = Arc::new(client.clone());

        Self {
            queue: Arc::new(UpdateQueue::new()),
            store: client.clone(),
            siblings: client.clone(),
            statuses: client.clone(),
            pods: client.clone(),
            secrets: client.clone(),
            events: client,
            offering,
            config,
        }
    }
}
