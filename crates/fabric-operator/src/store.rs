//! Persistence of the last reconciled spec of a managed resource.
//!
//! The update queue lives in memory only. To recover the change that was in
//! flight when the operator restarted, every successful reconciliation saves
//! a snapshot of the spec into a `<name>-spec` [`ConfigMap`] next to the
//! resource, which the create predicate diffs against on startup.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    Api,
    api::{DeleteParams, ObjectMeta, Patch},
};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    client::Client,
    cluster::ResourceIdentity,
    crd::{ManagedResource, ResourceKind},
};

/// The key the YAML encoded spec is stored under.
pub const SPEC_KEY: &str = "spec";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("no spec snapshot exists for {kind} {name:?}"))]
    SnapshotNotFound { kind: ResourceKind, name: String },

    #[snafu(display("spec snapshot {config_map:?} has no \"spec\" entry"))]
    MissingSnapshotKey { config_map: String },

    #[snafu(display("failed to read spec snapshot {config_map:?}"))]
    ReadSnapshot {
        source: kube::Error,
        config_map: String,
    },

    #[snafu(display("failed to write spec snapshot {config_map:?}"))]
    WriteSnapshot {
        source: kube::Error,
        config_map: String,
    },

    #[snafu(display("failed to delete spec snapshot {config_map:?}"))]
    DeleteSnapshot {
        source: kube::Error,
        config_map: String,
    },

    #[snafu(display("failed to serialize spec of {kind} {name:?}"))]
    SerializeSpec {
        source: serde_yaml::Error,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("failed to deserialize spec snapshot {config_map:?}"))]
    DeserializeSpec {
        source: serde_yaml::Error,
        config_map: String,
    },
}

/// Saves and restores spec snapshots of managed resources.
#[async_trait]
pub trait SpecStateStore<R: ManagedResource>: Send + Sync {
    async fn save(&self, resource: &R) -> Result<(), Error>;

    async fn load(&self, resource: &R) -> Result<R::Spec, Error>;

    /// Removes the snapshot. A missing snapshot is not an error.
    async fn delete(&self, resource: &R) -> Result<(), Error>;
}

/// Returns the name of the config map holding the snapshot of `resource_name`.
pub fn snapshot_name(resource_name: &str) -> String {
    format!("{resource_name}-spec")
}

/// Renders the snapshot config map of `resource`.
///
/// The config map is owned by the resource, so Kubernetes garbage collects it
/// even if the delete predicate never ran.
pub fn snapshot_config_map<R: ManagedResource>(resource: &R) -> Result<ConfigMap, Error> {
    let identity = ResourceIdentity::of(resource);
    let spec = serde_yaml::to_string(resource.node_spec()).context(SerializeSpecSnafu {
        kind: R::KIND,
        name: identity.name.clone(),
    })?;

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(snapshot_name(&identity.name)),
            namespace: Some(identity.namespace.clone()),
            owner_references: identity.owner_reference().map(|owner| vec![owner]),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(SPEC_KEY.to_owned(), spec)])),
        ..ConfigMap::default()
    })
}

/// Extracts the spec stored in a snapshot config map.
pub fn spec_from_config_map<R: ManagedResource>(config_map: &ConfigMap) -> Result<R::Spec, Error> {
    let name = config_map.metadata.name.clone().unwrap_or_default();
    let spec = config_map
        .data
        .as_ref()
        .and_then(|data| data.get(SPEC_KEY))
        .context(MissingSnapshotKeySnafu {
            config_map: name.clone(),
        })?;

    serde_yaml::from_str(spec).context(DeserializeSpecSnafu { config_map: name })
}

#[async_trait]
impl<R: ManagedResource> SpecStateStore<R> for Client {
    async fn save(&self, resource: &R) -> Result<(), Error> {
        let config_map = snapshot_config_map(resource)?;
        let identity = ResourceIdentity::of(resource);
        let name = snapshot_name(&identity.name);

        let api: Api<ConfigMap> = self.get_namespaced_api(&identity.namespace);
        api.patch(
            &name,
            &self.apply_patch_params(),
            &Patch::Apply(&config_map),
        )
        .await
        .context(WriteSnapshotSnafu { config_map: name })?;

        Ok(())
    }

    async fn load(&self, resource: &R) -> Result<R::Spec, Error> {
        let identity = ResourceIdentity::of(resource);
        let name = snapshot_name(&identity.name);

        let api: Api<ConfigMap> = self.get_namespaced_api(&identity.namespace);
        let config_map = api
            .get_opt(&name)
            .await
            .context(ReadSnapshotSnafu {
                config_map: name.clone(),
            })?
            .context(SnapshotNotFoundSnafu {
                kind: R::KIND,
                name: identity.name,
            })?;

        spec_from_config_map::<R>(&config_map)
    }

    async fn delete(&self, resource: &R) -> Result<(), Error> {
        let identity = ResourceIdentity::of(resource);
        let name = snapshot_name(&identity.name);

        let api: Api<ConfigMap> = self.get_namespaced_api(&identity.namespace);
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(source) => Err(source).context(DeleteSnapshotSnafu { config_map: name }),
        }
    }
}
