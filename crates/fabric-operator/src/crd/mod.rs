//! Custom resources managed by the operator and the shared types they are
//! built from.
//!
//! All four kinds ([`IBPPeer`], [`IBPOrderer`], [`IBPCA`] and [`IBPConsole`])
//! implement [`ManagedResource`], which is the only view the change tracking
//! engine has on them. Kind specific details (which images exist, whether the
//! node carries an MSP, ...) are hidden behind [`NodeSpec`].

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use strum::{Display, EnumIter};

mod ca;
mod console;
mod orderer;
mod peer;

pub use ca::*;
pub use console::*;
pub use orderer::*;
pub use peer::*;

/// The API group all managed resources belong to.
pub const GROUP: &str = "ibp.com";

/// The kinds of resources managed by the operator.
///
/// The [`Display`] implementation yields the Kubernetes `kind`.
#[derive(Clone, Copy, Debug, Display, EnumIter, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceKind {
    #[strum(serialize = "IBPCA")]
    Ca,

    #[strum(serialize = "IBPConsole")]
    Console,

    #[strum(serialize = "IBPOrderer")]
    Orderer,

    #[strum(serialize = "IBPPeer")]
    Peer,
}

/// Read access to the parts of a node spec the change detection looks at.
pub trait NodeSpec:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn fabric_version(&self) -> &str;

    fn zone(&self) -> Option<&str>;

    fn region(&self) -> Option<&str>;

    fn config_override(&self) -> Option<&serde_json::Value>;

    /// Returns `true` if the images of `new` must be considered changed
    /// compared to `self`. See [`images_updated`].
    fn images_updated(&self, new: &Self) -> bool;

    fn msp(&self) -> Option<&MspSpec>;

    fn action(&self) -> ActionSpec;

    /// The effective value of the "disable node OU" setting.
    fn node_ou_disabled(&self) -> bool;
}

/// A custom resource reconciled by the operator.
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    type Spec: NodeSpec;

    const KIND: ResourceKind;

    fn node_spec(&self) -> &Self::Spec;

    fn node_status(&self) -> Option<&FabricStatus>;

    /// The type of the persisted status, if the operator ever recorded one.
    fn status_type(&self) -> Option<StatusType> {
        self.node_status().and_then(|status| status.type_)
    }
}

/// Compares two optional image sets.
///
/// Unset new images never count as a change (the operator falls back to its
/// defaults), setting images for the first time always does.
pub fn images_updated<T: PartialEq>(old: Option<&T>, new: Option<&T>) -> bool {
    match (old, new) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(old), Some(new)) => old != new,
    }
}

/// Schema for free-form configuration overrides.
pub(crate) fn raw_object_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true,
    })
}

/// Membership Service Provider material of a node.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MspSpec {
    pub component: Option<MspSpecItem>,
    pub tls: Option<MspSpecItem>,
    pub client_auth: Option<MspSpecItem>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MspSpecItem {
    pub key_store: Option<String>,
    pub sign_certs: Option<String>,

    #[serde(default)]
    pub ca_certs: Vec<String>,

    #[serde(default)]
    pub intermediate_certs: Vec<String>,

    #[serde(default)]
    pub admin_certs: Vec<String>,
}

/// Crypto material references of a node.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSecretSpec {
    pub msp: Option<MspSpec>,
}

/// One-shot actions a user can request on a node.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionSpec {
    pub restart: bool,
    pub reenroll: ReenrollAction,
    pub enroll: EnrollAction,

    #[serde(rename = "upgradedbs")]
    pub upgrade_dbs: bool,
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReenrollAction {
    pub ecert: bool,
    pub ecert_new_key: bool,
    pub tls_cert: bool,
    pub tls_cert_new_key: bool,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnrollAction {
    pub ecert: bool,
    pub tls_cert: bool,
}

/// The restart action, which is the only action consoles and CAs support.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RestartAction {
    pub restart: bool,
}

impl From<&RestartAction> for ActionSpec {
    fn from(action: &RestartAction) -> Self {
        Self {
            restart: action.restart,
            ..Self::default()
        }
    }
}

/// The lifecycle state of a managed resource.
#[derive(Clone, Copy, Debug, Deserialize, Display, JsonSchema, PartialEq, Eq, Serialize)]
pub enum StatusType {
    Deploying,
    Deployed,
    Warning,
    Error,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FabricStatus {
    #[serde(rename = "type")]
    pub type_: Option<StatusType>,

    pub reason: Option<String>,
    pub message: Option<String>,
    pub error_code: Option<i32>,

    /// RFC 3339 timestamp of the last status write.
    pub last_heartbeat_time: Option<String>,

    pub versions: Option<ReconciledVersions>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciledVersions {
    /// The Fabric version of the last successful reconciliation.
    pub reconciled: String,
}
