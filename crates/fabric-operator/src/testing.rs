//! In-memory fakes of the cluster collaborators.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use k8s_openapi::{
    api::core::v1::{ContainerStatus, ObjectReference, Pod, PodStatus, Secret},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{
    Resource,
    runtime::events::{Event, EventType},
};
use snafu::ResultExt;

use crate::{
    cluster::{
        self, EventPublisher, ListResourcesSnafu, PodLister, ResourceIdentity, SecretOwnerWriter,
        SiblingLister, StatusClient, StatusConflictSnafu,
    },
    context::{Context, ControllerConfig},
    crd::{FabricStatus, IBPPeer, ManagedResource, PeerSpec, ResourceKind, StatusType},
    queue::UpdateQueue,
    reconcile::{Offering, OfferingError, OfferingOutcome},
    store::{self, SnapshotNotFoundSnafu, SpecStateStore},
    update::Update,
};

pub fn peer(name: &str, version: &str) -> IBPPeer {
    let mut peer = IBPPeer::new(
        name,
        PeerSpec {
            version: version.to_owned(),
            ..PeerSpec::default()
        },
    );
    peer.metadata.namespace = Some("fabric".to_owned());
    peer.metadata.uid = Some(format!("uid-{name}"));
    peer
}

pub fn with_status(mut peer: IBPPeer, type_: StatusType) -> IBPPeer {
    peer.status = Some(FabricStatus {
        type_: Some(type_),
        ..FabricStatus::default()
    });
    peer
}

pub fn ready_pod() -> Pod {
    Pod {
        status: Some(PodStatus {
            phase: Some("Running".to_owned()),
            container_statuses: Some(vec![ContainerStatus {
                ready: true,
                ..ContainerStatus::default()
            }]),
            ..PodStatus::default()
        }),
        ..Pod::default()
    }
}

struct FakeState<R: ManagedResource> {
    resource: Option<R>,
    resource_version: u64,
    status_patches: usize,
    pending_conflicts: usize,
    siblings: Vec<ResourceIdentity>,
    fail_listing: bool,
    pods: Vec<Pod>,
    snapshots: HashMap<String, R::Spec>,
    owner_writes: Vec<(String, String)>,
    events: Vec<RecordedEvent>,
}

/// The parts of a published event tests look at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub warning: bool,
    pub reason: String,
    pub note: String,
    pub action: String,
}

/// A single namespace holding at most one managed resource.
#[derive(Clone)]
pub struct FakeCluster<R: ManagedResource> {
    state: Arc<Mutex<FakeState<R>>>,
}

impl<R: ManagedResource> Default for FakeCluster<R> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                resource: None,
                resource_version: 1,
                status_patches: 0,
                pending_conflicts: 0,
                siblings: Vec::new(),
                fail_listing: false,
                pods: Vec::new(),
                snapshots: HashMap::new(),
                owner_writes: Vec::new(),
                events: Vec::new(),
            })),
        }
    }
}

impl<R: ManagedResource> FakeCluster<R> {
    pub fn with_resource(mut resource: R) -> Self {
        resource.meta_mut().resource_version = Some("1".to_owned());

        let fake = Self::default();
        fake.lock().resource = Some(resource);
        fake
    }

    fn lock(&self) -> MutexGuard<'_, FakeState<R>> {
        self.state.lock().expect("fake cluster lock is never poisoned")
    }

    pub fn context(&self, offering: Arc<dyn Offering<R>>) -> Context<R> {
        let fake = Arc::new(self.clone());

        Context {
            queue: Arc::new(UpdateQueue::new()),
            store: fake.clone(),
            siblings: fake.clone(),
            statuses: fake.clone(),
            pods: fake.clone(),
            secrets: fake.clone(),
            events: fake,
            offering,
            config: ControllerConfig::default(),
        }
    }

    pub fn current(&self) -> Option<R> {
        self.lock().resource.clone()
    }

    pub fn status_patches(&self) -> usize {
        self.lock().status_patches
    }

    /// Makes the next `count` status patches fail as if someone else wrote
    /// the resource in between.
    pub fn conflict_next_patches(&self, count: usize) {
        self.lock().pending_conflicts = count;
    }

    pub fn add_sibling(&self, kind: ResourceKind, name: &str) {
        self.lock().siblings.push(ResourceIdentity {
            kind,
            name: name.to_owned(),
            namespace: "fabric".to_owned(),
            uid: Some(format!("uid-{name}")),
        });
    }

    pub fn fail_listing(&self) {
        self.lock().fail_listing = true;
    }

    pub fn set_pods(&self, pods: Vec<Pod>) {
        self.lock().pods = pods;
    }

    pub fn save_snapshot(&self, name: &str, spec: R::Spec) {
        self.lock().snapshots.insert(name.to_owned(), spec);
    }

    pub fn snapshot(&self, name: &str) -> Option<R::Spec> {
        self.lock().snapshots.get(name).cloned()
    }

    pub fn owner_writes(&self) -> Vec<(String, String)> {
        self.lock().owner_writes.clone()
    }

    /// Reasons of all published events, oldest first.
    pub fn published_events(&self) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .map(|event| event.reason.clone())
            .collect()
    }

    pub fn recorded_events(&self) -> Vec<RecordedEvent> {
        self.lock().events.clone()
    }
}

fn name_of<R: ManagedResource>(resource: &R) -> String {
    resource.meta().name.clone().unwrap_or_default()
}

#[async_trait]
impl<R: ManagedResource> SiblingLister for FakeCluster<R> {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<ResourceIdentity>, cluster::Error> {
        let state = self.lock();
        if state.fail_listing {
            return Err(kube::Error::Service("listing is disabled".into()))
                .context(ListResourcesSnafu { kind, namespace });
        }

        Ok(state
            .siblings
            .iter()
            .filter(|sibling| sibling.kind == kind && sibling.namespace == namespace)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl<R: ManagedResource> PodLister for FakeCluster<R> {
    async fn list_pods(&self, _: &str, _: &str) -> Result<Vec<Pod>, cluster::Error> {
        Ok(self.lock().pods.clone())
    }
}

#[async_trait]
impl<R: ManagedResource> StatusClient<R> for FakeCluster<R> {
    async fn get(&self, name: &str, _: &str) -> Result<Option<R>, cluster::Error> {
        Ok(self
            .lock()
            .resource
            .clone()
            .filter(|resource| name_of(resource) == name))
    }

    async fn patch_status(&self, resource: &R, status: &FabricStatus) -> Result<R, cluster::Error> {
        let mut state = self.lock();
        let conflict = StatusConflictSnafu {
            kind: R::KIND,
            name: name_of(resource),
        };

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            state.resource_version += 1;
            let version = state.resource_version.to_string();
            if let Some(stored) = state.resource.as_mut() {
                stored.meta_mut().resource_version = Some(version);
            }
            return conflict.fail();
        }

        let Some(stored) = state.resource.as_ref() else {
            return conflict.fail();
        };
        if stored.meta().resource_version != resource.meta().resource_version {
            return conflict.fail();
        }

        let mut value = serde_json::to_value(stored).expect("resource serializes");
        value["status"] = serde_json::to_value(status).expect("status serializes");
        let mut patched: R = serde_json::from_value(value).expect("patched resource parses");

        state.resource_version += 1;
        patched.meta_mut().resource_version = Some(state.resource_version.to_string());
        state.status_patches += 1;
        state.resource = Some(patched.clone());

        Ok(patched)
    }
}

#[async_trait]
impl<R: ManagedResource> SecretOwnerWriter for FakeCluster<R> {
    async fn set_owner(
        &self,
        secret: &Secret,
        owner: OwnerReference,
    ) -> Result<Secret, cluster::Error> {
        self.lock().owner_writes.push((
            secret.metadata.name.clone().unwrap_or_default(),
            owner.name.clone(),
        ));

        let mut secret = secret.clone();
        secret.metadata.owner_references = Some(vec![owner]);
        Ok(secret)
    }
}

#[async_trait]
impl<R: ManagedResource> EventPublisher for FakeCluster<R> {
    async fn publish(&self, object: ObjectReference, event: Event) -> Result<(), cluster::Error> {
        self.lock().events.push(RecordedEvent {
            object: object.name.unwrap_or_default(),
            warning: matches!(event.type_, EventType::Warning),
            reason: event.reason,
            note: event.note.unwrap_or_default(),
            action: event.action,
        });
        Ok(())
    }
}

#[async_trait]
impl<R: ManagedResource> SpecStateStore<R> for FakeCluster<R> {
    async fn save(&self, resource: &R) -> Result<(), store::Error> {
        self.lock()
            .snapshots
            .insert(name_of(resource), resource.node_spec().clone());
        Ok(())
    }

    async fn load(&self, resource: &R) -> Result<R::Spec, store::Error> {
        let name = name_of(resource);
        match self.lock().snapshots.get(&name) {
            Some(spec) => Ok(spec.clone()),
            None => SnapshotNotFoundSnafu {
                kind: R::KIND,
                name,
            }
            .fail(),
        }
    }

    async fn delete(&self, resource: &R) -> Result<(), store::Error> {
        self.lock().snapshots.remove(&name_of(resource));
        Ok(())
    }
}

/// An offering replaying prepared results, succeeding with a default
/// outcome once they are used up.
#[derive(Default)]
pub struct ScriptedOffering {
    results: Mutex<VecDeque<Result<OfferingOutcome, OfferingError>>>,
    seen: Mutex<Vec<Update>>,
}

impl ScriptedOffering {
    pub fn fail_next(&self, error: OfferingError) {
        self.results
            .lock()
            .expect("offering lock is never poisoned")
            .push_back(Err(error));
    }

    pub fn succeed_next(&self, outcome: OfferingOutcome) {
        self.results
            .lock()
            .expect("offering lock is never poisoned")
            .push_back(Ok(outcome));
    }

    pub fn seen_updates(&self) -> Vec<Update> {
        self.seen
            .lock()
            .expect("offering lock is never poisoned")
            .clone()
    }
}

#[async_trait]
impl<R: ManagedResource> Offering<R> for ScriptedOffering {
    async fn reconcile(&self, _: &R, update: &Update) -> Result<OfferingOutcome, OfferingError> {
        self.seen
            .lock()
            .expect("offering lock is never poisoned")
            .push(update.clone());

        self.results
            .lock()
            .expect("offering lock is never poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok(OfferingOutcome::default()))
    }
}
