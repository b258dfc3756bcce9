//! Change detection.
//!
//! Every watched event is turned into a [`WatchedObject`] and passed through
//! [`evaluate`], which runs the predicate for its kind. Predicates diff the
//! old and new state, push the resulting [`Update`](crate::update::Update)
//! onto the queue of the affected managed resource and decide whether a
//! reconciliation is needed.

use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
};

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Secret},
};
use kube::{
    Resource,
    api::ObjectMeta,
    runtime::{
        events::{Event, EventType},
        reflector::ObjectRef,
        watcher,
    },
};
use tracing::{debug, warn};

use crate::{cluster::API_VERSION, context::Context, crd::ManagedResource};

pub mod msp;
pub mod primary;
pub mod secret;

/// What happened to a watched object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change<K> {
    Created(K),
    Updated { old: K, new: K },
    Deleted(K),
}

impl<K> Change<K> {
    /// The latest known state of the object.
    pub fn object(&self) -> &K {
        match self {
            Self::Created(object) | Self::Deleted(object) => object,
            Self::Updated { new, .. } => new,
        }
    }
}

/// A change to any object the controller for `R` watches.
#[derive(Clone, Debug)]
pub enum WatchedObject<R> {
    Primary(Change<R>),
    Secret(Change<Secret>),
    ConfigMap(Change<ConfigMap>),
    Deployment(Change<Deployment>),
}

/// Runs the predicate matching `event` and returns the resources that need
/// to be reconciled because of it.
pub async fn evaluate<R: ManagedResource>(
    ctx: &Context<R>,
    event: WatchedObject<R>,
) -> Vec<ObjectRef<R>> {
    match event {
        WatchedObject::Primary(change) => {
            let reconcile = match &change {
                Change::Created(resource) => primary::create(ctx, resource).await.1,
                Change::Updated { old, new } => primary::update(ctx, old, new).await.1,
                Change::Deleted(resource) => primary::delete(ctx, resource).await,
            };

            if reconcile {
                vec![ObjectRef::from_obj(change.object())]
            } else {
                Vec::new()
            }
        }
        WatchedObject::Secret(change) => {
            let target = match &change {
                Change::Created(secret) => secret::create(ctx, secret).await,
                Change::Updated { old, new } => secret::update(ctx, old, new).await,
                Change::Deleted(_) => None,
            };

            target.into_iter().collect()
        }
        WatchedObject::ConfigMap(change) => {
            let config_map = change.object();
            if is_restart_config(ctx, config_map) {
                restart_targets(ctx, config_map).await
            } else {
                Vec::new()
            }
        }
        WatchedObject::Deployment(change) => {
            // Deployments only ever trigger their owner, they carry no update.
            owners::<R>(&change.object().metadata)
        }
    }
}

/// Returns `true` for the config map coordinating node restarts.
pub fn is_restart_config<R: ManagedResource>(ctx: &Context<R>, config_map: &ConfigMap) -> bool {
    config_map.metadata.name.as_deref() == Some(ctx.config.restart_config_map.as_str())
}

/// Resolves the resources affected by a change of the restart config map:
/// its owners of kind `R`, or every resource of kind `R` in its namespace if
/// it has none.
async fn restart_targets<R: ManagedResource>(
    ctx: &Context<R>,
    config_map: &ConfigMap,
) -> Vec<ObjectRef<R>> {
    let owners = owners::<R>(&config_map.metadata);
    if !owners.is_empty() {
        return owners;
    }

    let Some(namespace) = config_map.metadata.namespace.as_deref() else {
        return Vec::new();
    };

    match ctx.siblings.list(R::KIND, namespace).await {
        Ok(siblings) => siblings
            .into_iter()
            .map(|sibling| ObjectRef::new(&sibling.name).within(namespace))
            .collect(),
        Err(error) => {
            warn!(
                error = &error as &dyn std::error::Error,
                "failed to list resources affected by restart config"
            );
            Vec::new()
        }
    }
}

/// Returns the owners of kind `R` referenced by `meta`.
pub fn owners<R: ManagedResource>(meta: &ObjectMeta) -> Vec<ObjectRef<R>> {
    let kind = R::KIND.to_string();

    meta.owner_references
        .iter()
        .flatten()
        .filter(|owner| owner.kind == kind && owner.api_version == API_VERSION)
        .map(|owner| {
            let reference = ObjectRef::new(&owner.name);
            match meta.namespace.as_deref() {
                Some(namespace) => reference.within(namespace),
                None => reference,
            }
        })
        .collect()
}

/// Publishes a warning event for `resource`, logging failures only.
pub(crate) async fn publish_warning<R: ManagedResource>(
    ctx: &Context<R>,
    resource: &R,
    reason: &str,
    note: String,
) {
    let event = Event {
        type_: EventType::Warning,
        reason: reason.to_owned(),
        note: Some(note),
        action: "Validate".to_owned(),
        secondary: None,
    };

    if let Err(error) = ctx.events.publish(resource.object_ref(&()), event).await {
        warn!(
            error = &error as &dyn std::error::Error,
            "failed to publish warning event"
        );
    }
}

/// Derives create, update and delete [`Change`]s from a raw watch stream.
///
/// The watcher only reports the new state of an object, the tracker keeps
/// the last seen state of every object to diff against.
pub struct ChangeTracker<K: Resource<DynamicType = ()>> {
    state: Mutex<TrackerState<K>>,
}

struct TrackerState<K: Resource<DynamicType = ()>> {
    last_seen: HashMap<ObjectRef<K>, K>,

    /// Objects listed during an ongoing re-list.
    relisted: Option<HashSet<ObjectRef<K>>>,
}

impl<K: Resource<DynamicType = ()>> Default for ChangeTracker<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                last_seen: HashMap::new(),
                relisted: None,
            }),
        }
    }
}

impl<K> ChangeTracker<K>
where
    K: Resource<DynamicType = ()> + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Folds a watcher event into the tracked state and returns the changes
    /// it represents.
    pub fn observe(&self, event: watcher::Event<K>) -> Vec<Change<K>> {
        let mut state = self.lock();

        match event {
            watcher::Event::Init => {
                state.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(object) => {
                let key = ObjectRef::from_obj(&object);
                if let Some(relisted) = state.relisted.as_mut() {
                    relisted.insert(key.clone());
                }
                state.apply(key, object).into_iter().collect()
            }
            watcher::Event::Apply(object) => {
                let key = ObjectRef::from_obj(&object);
                state.apply(key, object).into_iter().collect()
            }
            watcher::Event::Delete(object) => {
                state.last_seen.remove(&ObjectRef::from_obj(&object));
                vec![Change::Deleted(object)]
            }
            watcher::Event::InitDone => {
                let Some(relisted) = state.relisted.take() else {
                    return Vec::new();
                };

                // Objects missing from the re-list were deleted while the
                // watch was down.
                let gone: Vec<ObjectRef<K>> = state
                    .last_seen
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();

                gone.into_iter()
                    .filter_map(|key| state.last_seen.remove(&key))
                    .map(Change::Deleted)
                    .collect()
            }
        }
    }
}

impl<K> TrackerState<K>
where
    K: Resource<DynamicType = ()> + Clone,
{
    fn apply(&mut self, key: ObjectRef<K>, object: K) -> Option<Change<K>> {
        match self.last_seen.insert(key, object.clone()) {
            None => Some(Change::Created(object)),
            Some(old) if old.meta().resource_version == object.meta().resource_version => {
                debug!("ignoring unchanged object");
                None
            }
            Some(old) => Some(Change::Updated { old, new: object }),
        }
    }
}
