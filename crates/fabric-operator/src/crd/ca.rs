use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::{
    ActionSpec, FabricStatus, ManagedResource, MspSpec, NodeSpec, ResourceKind, RestartAction,
    images_updated,
};

/// A Hyperledger Fabric certificate authority.
///
/// CAs issue the crypto material of the other nodes, so they carry no MSP of
/// their own and only support the restart action.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "ibp.com",
    version = "v1beta1",
    kind = "IBPCA",
    shortname = "ca",
    status = "FabricStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CaSpec {
    #[serde(default)]
    pub version: String,

    pub images: Option<CaImages>,
    pub zone: Option<String>,
    pub region: Option<String>,

    /// Overrides merged into the generated `fabric-ca-server-config.yaml`.
    #[schemars(schema_with = "crate::crd::raw_object_schema")]
    pub config_override: Option<serde_json::Value>,

    #[serde(default)]
    pub action: RestartAction,

    pub replicas: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaImages {
    pub ca_image: Option<String>,
    pub ca_tag: Option<String>,
    pub ca_init_image: Option<String>,
    pub ca_init_tag: Option<String>,
}

impl NodeSpec for CaSpec {
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
        None
    }

    fn action(&self) -> ActionSpec {
        ActionSpec::from(&self.action)
    }

    fn node_ou_disabled(&self) -> bool {
        false
    }
}

impl ManagedResource for IBPCA {
    type Spec = CaSpec;

    const KIND: ResourceKind = ResourceKind::Ca;

    fn node_spec(&self) -> &Self::Spec {
        &self.spec
    }

    fn node_status(&self) -> Option<&FabricStatus> {
        self.status.as_ref()
    }
}
