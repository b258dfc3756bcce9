//! The kube-backed implementation of the collaborator traits in [`crate::cluster`].

use async_trait::async_trait;
use k8s_openapi::{
    NamespaceResourceScope,
    api::core::v1::{ObjectReference, Pod, Secret},
    apimachinery::pkg::apis::meta::v1::OwnerReference,
};
use kube::{
    Api, Resource,
    api::{ListParams, Patch, PatchParams},
    runtime::events::{Event, Recorder, Reporter},
};
use serde_json::json;
use snafu::{ResultExt, Snafu};

use crate::{
    cluster::{
        self, EventPublisher, GetResourceSnafu, ListPodsSnafu, ListResourcesSnafu,
        PatchStatusSnafu, PodLister, PublishEventSnafu, ResourceIdentity, SecretOwnerWriter,
        SetSecretOwnerSnafu, SiblingLister, StatusClient, StatusConflictSnafu,
    },
    crd::{FabricStatus, IBPCA, IBPConsole, IBPOrderer, IBPPeer, ManagedResource, ResourceKind},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create kubernetes client"))]
    CreateKubeClient { source: kube::Error },
}

/// This `Client` can be used to access Kubernetes.
///
/// It wraps an underlying [`kube::Client`] and remembers the field manager
/// all writes are attributed to.
#[derive(Clone)]
pub struct Client {
    client: kube::Client,
    field_manager: String,
}

impl Client {
    pub fn new(client: kube::Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Returns a [`kube::Client`] that can be freely used.
    pub fn as_kube_client(&self) -> kube::Client {
        self.client.clone()
    }

    pub fn field_manager(&self) -> &str {
        &self.field_manager
    }

    pub fn get_all_api<T>(&self) -> Api<T>
    where
        T: Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    pub fn get_namespaced_api<T>(&self, namespace: &str) -> Api<T>
    where
        T: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Server side apply, taking ownership of conflicting fields.
    pub fn apply_patch_params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager).force()
    }

    pub fn merge_patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..PatchParams::default()
        }
    }

    async fn list_identities<R>(&self, namespace: &str) -> Result<Vec<ResourceIdentity>, cluster::Error>
    where
        R: ManagedResource,
    {
        let api: Api<R> = self.get_namespaced_api(namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .context(ListResourcesSnafu {
                kind: R::KIND,
                namespace,
            })?;

        Ok(list.items.iter().map(ResourceIdentity::of).collect())
    }
}

/// Creates a [`Client`] from the in-cluster or kubeconfig configuration.
pub async fn initialize_operator(field_manager: &str) -> Result<Client, Error> {
    let client = kube::Client::try_default()
        .await
        .context(CreateKubeClientSnafu)?;

    Ok(Client::new(client, field_manager))
}

#[async_trait]
impl SiblingLister for Client {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<ResourceIdentity>, cluster::Error> {
        match kind {
            ResourceKind::Ca => self.list_identities::<IBPCA>(namespace).await,
            ResourceKind::Console => self.list_identities::<IBPConsole>(namespace).await,
            ResourceKind::Orderer => self.list_identities::<IBPOrderer>(namespace).await,
            ResourceKind::Peer => self.list_identities::<IBPPeer>(namespace).await,
        }
    }
}

#[async_trait]
impl PodLister for Client {
    async fn list_pods(
        &self,
        label_selector: &str,
        namespace: &str,
    ) -> Result<Vec<Pod>, cluster::Error> {
        let api: Api<Pod> = self.get_namespaced_api(namespace);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .context(ListPodsSnafu {
                selector: label_selector,
                namespace,
            })?;

        Ok(list.items)
    }
}

#[async_trait]
impl<R: ManagedResource> StatusClient<R> for Client {
    async fn get(&self, name: &str, namespace: &str) -> Result<Option<R>, cluster::Error> {
        let api: Api<R> = self.get_namespaced_api(namespace);
        api.get_opt(name).await.context(GetResourceSnafu {
            kind: R::KIND,
            name,
        })
    }

    async fn patch_status(&self, resource: &R, status: &FabricStatus) -> Result<R, cluster::Error> {
        let identity = ResourceIdentity::of(resource);
        let api: Api<R> = self.get_namespaced_api(&identity.namespace);

        // Carrying the resource version turns the merge patch into a
        // compare-and-swap on the server.
        let patch = json!({
            "metadata": { "resourceVersion": resource.meta().resource_version },
            "status": status,
        });

        match api
            .patch_status(&identity.name, &self.merge_patch_params(), &Patch::Merge(&patch))
            .await
        {
            Ok(patched) => Ok(patched),
            Err(kube::Error::Api(ae)) if ae.code == 409 => StatusConflictSnafu {
                kind: R::KIND,
                name: identity.name,
            }
            .fail(),
            Err(source) => Err(source).context(PatchStatusSnafu {
                kind: R::KIND,
                name: identity.name,
            }),
        }
    }
}

#[async_trait]
impl SecretOwnerWriter for Client {
    async fn set_owner(
        &self,
        secret: &Secret,
        owner: OwnerReference,
    ) -> Result<Secret, cluster::Error> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let namespace = secret.metadata.namespace.clone().unwrap_or_default();
        let api: Api<Secret> = self.get_namespaced_api(&namespace);

        let patch = json!({
            "metadata": { "ownerReferences": [owner] },
        });

        api.patch(&name, &self.merge_patch_params(), &Patch::Merge(&patch))
            .await
            .context(SetSecretOwnerSnafu { secret: name })
    }
}

#[async_trait]
impl EventPublisher for Client {
    async fn publish(&self, object: ObjectReference, event: Event) -> Result<(), cluster::Error> {
        let recorder = Recorder::new(
            self.as_kube_client(),
            Reporter {
                controller: self.field_manager.clone(),
                instance: None,
            },
        );

        recorder
            .publish(&event, &object)
            .await
            .context(PublishEventSnafu)
    }
}
