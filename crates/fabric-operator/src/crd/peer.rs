use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::{
    ActionSpec, FabricStatus, ManagedResource, MspSpec, NodeSecretSpec, NodeSpec, ResourceKind,
    images_updated,
};

/// A Hyperledger Fabric peer node.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "ibp.com",
    version = "v1beta1",
    kind = "IBPPeer",
    shortname = "peer",
    status = "FabricStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PeerSpec {
    /// The Fabric release the peer runs, e.g. `2.5.1-0`.
    #[serde(default)]
    pub version: String,

    pub images: Option<PeerImages>,

    /// Zone the peer is scheduled into. Immutable once set.
    pub zone: Option<String>,

    /// Region the peer is scheduled into. Immutable once set.
    pub region: Option<String>,

    /// Overrides merged into the generated `core.yaml`.
    #[schemars(schema_with = "crate::crd::raw_object_schema")]
    pub config_override: Option<serde_json::Value>,

    pub secret: Option<NodeSecretSpec>,

    #[serde(default)]
    pub action: ActionSpec,

    #[serde(rename = "disablenodeou")]
    pub disable_node_ou: Option<bool>,

    pub msp_id: Option<String>,
    pub replicas: Option<i32>,
    pub state_db: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerImages {
    pub peer_image: Option<String>,
    pub peer_tag: Option<String>,
    pub peer_init_image: Option<String>,
    pub peer_init_tag: Option<String>,
    pub couchdb_image: Option<String>,
    pub couchdb_tag: Option<String>,
    pub grpcweb_image: Option<String>,
    pub grpcweb_tag: Option<String>,
}

impl NodeSpec for PeerSpec {
    fn fabric_version(&self) -> &str {
        &self.version
    }

    fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    fn config_override(&self) -> Option<&serde_json::Value> {
        self.config_override.as_ref()
    }

    fn images_updated(&self, new: &Self) -> bool {
        images_updated(self.images.as_ref(), new.images.as_ref())
    }

    fn msp(&self) -> Option<&MspSpec> {
        self.secret.as_ref().and_then(|secret| secret.msp.as_ref())
    }

    fn action(&self) -> ActionSpec {
        self.action.clone()
    }

    fn node_ou_disabled(&self) -> bool {
        self.disable_node_ou.unwrap_or_default()
    }
}

impl ManagedResource for IBPPeer {
    type Spec = PeerSpec;

    const KIND: ResourceKind = ResourceKind::Peer;

    fn node_spec(&self) -> &Self::Spec {
        &self.spec
    }

    fn node_status(&self) -> Option<&FabricStatus> {
        self.status.as_ref()
    }
}
