//! The status state machine of managed resources.
//!
//! A resource is `Deploying` until all of its pods run and are ready, after
//! which it is `Deployed`. Offerings may override the computed state (most
//! often with `Warning`), and failed reconciliations record `Error` together
//! with an error code.

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use crate::{
    cluster::{self, StatusClient},
    crd::{FabricStatus, ManagedResource, ReconciledVersions, StatusType},
};

/// Returns `true` if there is at least one pod and every pod is running with
/// all of its containers ready.
pub fn pods_ready(pods: &[Pod]) -> bool {
    !pods.is_empty() && pods.iter().all(pod_ready)
}

fn pod_ready(pod: &Pod) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };

    let running = status.phase.as_deref() == Some("Running");
    let containers_ready = status
        .container_statuses
        .as_ref()
        .is_some_and(|containers| containers.iter().all(|container| container.ready));

    running && containers_ready
}

pub fn status_of_type(type_: StatusType, reason: &str, message: impl Into<String>) -> FabricStatus {
    FabricStatus {
        type_: Some(type_),
        reason: Some(reason.to_owned()),
        message: Some(message.into()),
        ..FabricStatus::default()
    }
}

pub fn error_status(error_code: i32, reason: &str, message: impl Into<String>) -> FabricStatus {
    FabricStatus {
        error_code: Some(error_code),
        ..status_of_type(StatusType::Error, reason, message)
    }
}

/// Decides the status to persist after a successful reconciliation.
///
/// Returns [`None`] if the current status already reflects the outcome and no
/// write is needed.
pub fn next_status(
    current: Option<&FabricStatus>,
    requested: Option<&FabricStatus>,
    pods_ready: bool,
) -> Option<FabricStatus> {
    let current_type = current.and_then(|status| status.type_);

    if let Some(requested) = requested {
        return match current {
            Some(current) if same_state(current, requested) => None,
            _ => Some(requested.clone()),
        };
    }

    if pods_ready {
        match current_type {
            Some(StatusType::Deployed | StatusType::Warning) => None,
            _ => Some(status_of_type(
                StatusType::Deployed,
                "AllPodsRunning",
                "All pods are running and ready",
            )),
        }
    } else {
        match current_type {
            Some(StatusType::Deploying) => None,
            _ => Some(status_of_type(
                StatusType::Deploying,
                "PodsNotReady",
                "Waiting for pods to become ready",
            )),
        }
    }
}

/// Compares the user visible parts of two statuses, ignoring bookkeeping
/// like the heartbeat.
fn same_state(a: &FabricStatus, b: &FabricStatus) -> bool {
    a.type_ == b.type_ && a.reason == b.reason && a.message == b.message && a.error_code == b.error_code
}

/// Stamps `status` with the current time.
pub fn with_heartbeat(mut status: FabricStatus) -> FabricStatus {
    status.last_heartbeat_time = Some(jiff::Timestamp::now().to_string());
    status
}

/// Records `version` as the Fabric version of the last successful
/// reconciliation.
pub fn with_reconciled_version(mut status: FabricStatus, version: &str) -> FabricStatus {
    status.versions = Some(ReconciledVersions {
        reconciled: version.to_owned(),
    });
    status
}

/// Returns `true` if `status` does not record `version` as reconciled yet.
pub fn version_drifted(status: Option<&FabricStatus>, version: &str) -> bool {
    status
        .and_then(|status| status.versions.as_ref())
        .map(|versions| versions.reconciled.as_str())
        != Some(version)
}

/// Writes `status`, retrying on a fresh copy of the resource if it was
/// modified concurrently.
///
/// Only the patch is repeated, never the logic that decided on `status`.
pub async fn patch_with_retry<R: ManagedResource>(
    client: &dyn StatusClient<R>,
    resource: &R,
    status: &FabricStatus,
    retries: usize,
) -> Result<R, cluster::Error> {
    let mut current = resource.clone();
    let mut attempt = 0;

    loop {
        match client.patch_status(&current, status).await {
            Err(error) if error.is_conflict() && attempt < retries => {
                attempt += 1;
                debug!(attempt, "status patch conflicted, retrying on a fresh copy");

                let meta = current.meta();
                let name = meta.name.clone().unwrap_or_default();
                let namespace = meta.namespace.clone().unwrap_or_default();

                match client.get(&name, &namespace).await? {
                    Some(fresh) => current = fresh,
                    None => return Err(error),
                }
            }
            result => return result,
        }
    }
}
