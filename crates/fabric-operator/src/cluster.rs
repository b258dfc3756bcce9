//! Narrow interfaces to the cluster.
//!
//! The change tracking engine never talks to Kubernetes directly. Every read
//! or write it needs goes through one of the traits below, which are
//! implemented for the kube-backed [`Client`](crate::client::Client) and by
//! in-memory fakes in tests.

use async_trait::async_trait;
use const_format::concatcp;
use k8s_openapi::{
    api::core::v1::{ObjectReference, Pod, Secret},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::runtime::events::Event;
use snafu::Snafu;

use crate::crd::{FabricStatus, GROUP, ManagedResource, ResourceKind};

/// The `apiVersion` shared by all managed resources.
// Keep in sync with the `#[kube(version)]` attributes in `crate::crd`.
pub const API_VERSION: &str = concatcp!(GROUP, "/v1beta1");

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to list {kind} objects in namespace {namespace:?}"))]
    ListResources {
        source: kube::Error,
        kind: ResourceKind,
        namespace: String,
    },

    #[snafu(display("failed to list pods matching {selector:?} in namespace {namespace:?}"))]
    ListPods {
        source: kube::Error,
        selector: String,
        namespace: String,
    },

    #[snafu(display("failed to get {kind} {name:?}"))]
    GetResource {
        source: kube::Error,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("status of {kind} {name:?} was modified concurrently"))]
    StatusConflict { kind: ResourceKind, name: String },

    #[snafu(display("failed to patch status of {kind} {name:?}"))]
    PatchStatus {
        source: kube::Error,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("failed to set owner reference on secret {secret:?}"))]
    SetSecretOwner { source: kube::Error, secret: String },

    #[snafu(display("failed to publish event"))]
    PublishEvent { source: kube::Error },
}

impl Error {
    /// Returns `true` if the error was caused by a concurrent modification and
    /// the operation may succeed on a fresh copy of the object.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StatusConflict { .. })
    }
}

/// Identity of a managed resource, as returned by [`SiblingLister::list`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: String,
    pub uid: Option<String>,
}

impl ResourceIdentity {
    pub fn of<R: ManagedResource>(resource: &R) -> Self {
        let meta = resource.meta();

        Self {
            kind: R::KIND,
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            uid: meta.uid.clone(),
        }
    }

    /// Builds a controller owner reference pointing at this resource.
    ///
    /// Returns [`None`] if the resource has not been persisted yet (it has no
    /// UID).
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        Some(OwnerReference {
            api_version: API_VERSION.to_owned(),
            kind: self.kind.to_string(),
            name: self.name.clone(),
            uid: self.uid.clone()?,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}

/// Lists managed resources of any kind.
#[async_trait]
pub trait SiblingLister: Send + Sync {
    async fn list(&self, kind: ResourceKind, namespace: &str)
    -> Result<Vec<ResourceIdentity>, Error>;
}

/// Lists the pods backing a managed resource.
#[async_trait]
pub trait PodLister: Send + Sync {
    async fn list_pods(&self, label_selector: &str, namespace: &str) -> Result<Vec<Pod>, Error>;
}

/// Reads managed resources and writes their status.
#[async_trait]
pub trait StatusClient<R: ManagedResource>: Send + Sync {
    /// Fetches the current state of the resource, [`None`] if it is gone.
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<R>, Error>;

    /// Performs a single compare-and-patch of the status sub-resource.
    ///
    /// Must fail with [`Error::StatusConflict`] if `resource` is not the
    /// latest version of the object.
    async fn patch_status(&self, resource: &R, status: &FabricStatus) -> Result<R, Error>;
}

/// Attaches owner references to secrets created outside of the operator.
#[async_trait]
pub trait SecretOwnerWriter: Send + Sync {
    async fn set_owner(&self, secret: &Secret, owner: OwnerReference) -> Result<Secret, Error>;
}

/// Surfaces problems with a resource as Kubernetes events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Records `event` on the object behind `object`.
    async fn publish(&self, object: ObjectReference, event: Event) -> Result<(), Error>;
}
