//! Cross-kind name validation for newly created resources.
//!
//! Peers, orderers, CAs and consoles derive the names of their deployments,
//! services and secrets from the resource name, so two managed resources in
//! the same namespace must never share a name, even across kinds.

use snafu::{ResultExt, Snafu};
use strum::IntoEnumIterator;

use crate::{
    cluster::{self, ResourceIdentity, SiblingLister},
    crd::ResourceKind,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("name {name:?} is already used by an {existing} in namespace {namespace:?}"))]
    NameUsedByOtherKind {
        name: String,
        namespace: String,
        existing: ResourceKind,
    },

    #[snafu(display("found {count} {kind} objects named {name:?} in namespace {namespace:?}"))]
    DuplicateName {
        name: String,
        namespace: String,
        kind: ResourceKind,
        count: usize,
    },

    #[snafu(display("failed to list existing resources"))]
    ListSiblings { source: cluster::Error },
}

impl Error {
    /// Returns `true` if the name itself is invalid, as opposed to the
    /// validation not being able to run.
    pub fn is_violation(&self) -> bool {
        !matches!(self, Self::ListSiblings { .. })
    }
}

/// Checks `candidate` against the `existing` resources of its namespace.
///
/// The candidate itself is usually part of `existing` already, so a single
/// resource of the same kind and name is accepted.
pub fn validate_unique_name(
    candidate: &ResourceIdentity,
    existing: &[ResourceIdentity],
) -> Result<(), Error> {
    let mut same_kind = 0;

    for item in existing.iter().filter(|item| item.name == candidate.name) {
        if item.kind != candidate.kind {
            return NameUsedByOtherKindSnafu {
                name: &candidate.name,
                namespace: &candidate.namespace,
                existing: item.kind,
            }
            .fail();
        }

        same_kind += 1;
    }

    if same_kind > 1 {
        return DuplicateNameSnafu {
            name: &candidate.name,
            namespace: &candidate.namespace,
            kind: candidate.kind,
            count: same_kind,
        }
        .fail();
    }

    Ok(())
}

/// Lists all managed kinds in the namespace of `candidate` and runs
/// [`validate_unique_name`] against them.
pub async fn validate_resource_name(
    lister: &dyn SiblingLister,
    candidate: &ResourceIdentity,
) -> Result<(), Error> {
    let mut existing = Vec::new();
    for kind in ResourceKind::iter() {
        existing.extend(
            lister
                .list(kind, &candidate.namespace)
                .await
                .context(ListSiblingsSnafu)?,
        );
    }

    validate_unique_name(candidate, &existing)
}
