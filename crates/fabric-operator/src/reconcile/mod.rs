//! The reconciliation driver.
//!
//! Every invocation handles exactly one queued [`Update`](crate::update::Update):
//! it is popped, handed to the [`Offering`] and the outcome is folded into the
//! status of the resource. If more updates are pending afterwards, the driver
//! asks to be invoked again right away. An update the offering failed on goes
//! back to the head of the queue.

use std::{sync::Arc, time::Duration};

use kube::{
    core::DynamicObject,
    runtime::{controller::Action, reflector::ObjectRef},
};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info, warn};

use crate::{
    cluster,
    context::Context,
    crd::{ManagedResource, NodeSpec, ResourceKind},
    logging::controller::ReconcilerError,
    status, store,
};

mod offering;

pub use offering::*;

/// Error code recorded when the driver itself, not the offering, fails.
pub const DRIVER_ERROR_CODE: i32 = 1;

#[derive(Debug, Snafu, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object has no name"))]
    ObjectHasNoName,

    #[snafu(display("object has no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to fetch latest state of {kind} {name:?}"))]
    FetchResource {
        source: cluster::Error,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("failed to reconcile {kind} {name:?}"))]
    Offering {
        source: OfferingError,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("failed to list pods of {kind} {name:?}"))]
    ListPods {
        source: cluster::Error,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("failed to update status of {kind} {name:?}"))]
    UpdateStatus {
        source: cluster::Error,
        kind: ResourceKind,
        name: String,
    },

    #[snafu(display("failed to save spec snapshot"))]
    SaveSnapshot { source: store::Error },
}

impl Error {
    /// The error code recorded in the status of the resource.
    pub fn error_code(&self) -> i32 {
        match self {
            Self::Offering { source, .. } => source.code(),
            _ => DRIVER_ERROR_CODE,
        }
    }

    /// Breaking errors are not retried until the resource changes.
    pub fn is_breaking(&self) -> bool {
        match self {
            Self::Offering { source, .. } => source.is_breaking(),
            Self::ObjectHasNoName | Self::ObjectHasNoNamespace => true,
            _ => false,
        }
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

#[tracing::instrument(
    skip_all,
    fields(kind = %R::KIND, name = resource.meta().name.as_deref().unwrap_or_default())
)]
pub async fn reconcile<R: ManagedResource>(
    resource: Arc<R>,
    ctx: Arc<Context<R>>,
) -> Result<Action, Error> {
    let meta = resource.meta();
    let name = meta.name.clone().context(ObjectHasNoNameSnafu)?;
    let namespace = meta.namespace.clone().context(ObjectHasNoNamespaceSnafu)?;

    // The cached object may lag behind the status writes of previous passes.
    let Some(resource) = ctx
        .statuses
        .get(&name, &namespace)
        .await
        .context(FetchResourceSnafu {
            kind: R::KIND,
            name: &name,
        })?
    else {
        debug!("resource is gone, dropping pending updates");
        ctx.queue.discard(&name);
        return Ok(Action::await_change());
    };

    let update = ctx.queue.pop(&name);
    let pending = ctx.queue.len(&name);
    if pending > 0 {
        debug!(%update, pending, next = %ctx.queue.peek_at(&name, 0), "popped update");
    } else {
        debug!(%update, "popped update");
    }

    let outcome = match ctx.offering.reconcile(&resource, &update).await {
        Ok(outcome) => outcome,
        Err(error) => {
            // The update has not been applied, the next attempt starts with it.
            if !update.is_empty() {
                ctx.queue.requeue(&name, update);
            }
            record_error(&ctx, &resource, &error).await;

            return Err(error).context(OfferingSnafu {
                kind: R::KIND,
                name: &name,
            });
        }
    };

    let pods_ready = match outcome.status {
        Some(_) => false,
        None => {
            let pods = ctx
                .pods
                .list_pods(&ctx.config.pod_selector(&name), &namespace)
                .await
                .context(ListPodsSnafu {
                    kind: R::KIND,
                    name: &name,
                })?;
            status::pods_ready(&pods)
        }
    };

    let current = resource.node_status();
    let version = resource.node_spec().fabric_version();
    let next = status::next_status(current, outcome.status.as_ref(), pods_ready).or_else(|| {
        status::version_drifted(current, version).then(|| current.cloned().unwrap_or_default())
    });

    if let Some(next) = next {
        info!(status = ?next.type_, "updating status");

        let next = status::with_heartbeat(status::with_reconciled_version(next, version));
        status::patch_with_retry(
            ctx.statuses.as_ref(),
            &resource,
            &next,
            ctx.config.status_patch_retries,
        )
        .await
        .context(UpdateStatusSnafu {
            kind: R::KIND,
            name: &name,
        })?;
    }

    ctx.store.save(&resource).await.context(SaveSnapshotSnafu)?;

    if !ctx.queue.is_empty(&name) {
        debug!("more updates are pending, requeueing");
        return Ok(Action::requeue(Duration::ZERO));
    }

    Ok(outcome
        .requeue_after
        .map_or_else(Action::await_change, Action::requeue))
}

/// Records a failed offering run in the status of `resource`.
///
/// Failures are logged only, the offering error is what gets reported.
async fn record_error<R: ManagedResource>(ctx: &Context<R>, resource: &R, error: &OfferingError) {
    let mut next = status::error_status(error.code(), "ReconcileFailed", error.to_string());
    next.versions = resource
        .node_status()
        .and_then(|status| status.versions.clone());

    if let Err(status_error) = status::patch_with_retry(
        ctx.statuses.as_ref(),
        resource,
        &status::with_heartbeat(next),
        ctx.config.status_patch_retries,
    )
    .await
    {
        warn!(
            error = &status_error as &dyn std::error::Error,
            "failed to record error status"
        );
    }
}

pub fn error_policy<R: ManagedResource>(
    _resource: Arc<R>,
    error: &Error,
    ctx: Arc<Context<R>>,
) -> Action {
    if error.is_breaking() {
        Action::await_change()
    } else {
        Action::requeue(ctx.config.transient_requeue_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crd::{IBPPeer, StatusType},
        store::SpecStateStore,
        testing::{FakeCluster, ScriptedOffering, peer, ready_pod},
        update::{Update, UpdateFlag},
    };

    fn status_type(fake: &FakeCluster<IBPPeer>) -> Option<StatusType> {
        fake.current().and_then(|peer| peer.status).and_then(|status| status.type_)
    }

    #[tokio::test]
    async fn status_follows_pod_readiness() {
        let fake = Arc::new(FakeCluster::with_resource(peer("org1-peer1", "2.5.4")));
        let ctx = Arc::new(fake.context(Arc::new(ScriptedOffering::default())));
        let object = Arc::new(peer("org1-peer1", "2.5.4"));

        reconcile(object.clone(), ctx.clone())
            .await
            .expect("reconcile must succeed");
        assert_eq!(status_type(&fake), Some(StatusType::Deploying));
        assert_eq!(fake.status_patches(), 1);

        fake.set_pods(vec![ready_pod(), ready_pod()]);
        reconcile(object.clone(), ctx.clone())
            .await
            .expect("reconcile must succeed");
        assert_eq!(status_type(&fake), Some(StatusType::Deployed));
        assert_eq!(fake.status_patches(), 2);

        reconcile(object, ctx).await.expect("reconcile must succeed");
        assert_eq!(status_type(&fake), Some(StatusType::Deployed));
        assert_eq!(fake.status_patches(), 2, "no redundant status patch");

        let status = fake
            .current()
            .and_then(|peer| peer.status)
            .expect("status was written");
        assert_eq!(
            status.versions.map(|versions| versions.reconciled),
            Some("2.5.4".to_owned())
        );
    }

    #[tokio::test]
    async fn requeues_while_updates_are_pending() {
        let fake = Arc::new(FakeCluster::with_resource(peer("org1-peer1", "2.5.4")));
        let offering = Arc::new(ScriptedOffering::default());
        let ctx = Arc::new(fake.context(offering.clone()));
        let object = Arc::new(peer("org1-peer1", "2.5.4"));

        let first = Update::from([UpdateFlag::SpecUpdated]);
        let second = Update::from([UpdateFlag::RestartNeeded]);
        ctx.queue.push("org1-peer1", first.clone());
        ctx.queue.push("org1-peer1", second.clone());

        let action = reconcile(object.clone(), ctx.clone())
            .await
            .expect("reconcile must succeed");
        assert_eq!(action, Action::requeue(Duration::ZERO));

        let action = reconcile(object, ctx.clone())
            .await
            .expect("reconcile must succeed");
        assert_eq!(action, Action::await_change());

        assert_eq!(offering.seen_updates(), [first, second]);
        assert!(ctx.queue.is_empty("org1-peer1"));
    }

    #[tokio::test]
    async fn offering_error_is_recorded_and_propagated() {
        let fake = Arc::new(FakeCluster::with_resource(peer("org1-peer1", "2.5.4")));
        let offering = Arc::new(ScriptedOffering::default());
        offering.fail_next(OfferingError::Transient {
            code: 22,
            message: "enrollment endpoint unreachable".to_owned(),
        });
        let ctx = Arc::new(fake.context(offering));
        fake.set_pods(vec![ready_pod()]);

        let error = reconcile(Arc::new(peer("org1-peer1", "2.5.4")), ctx.clone())
            .await
            .expect_err("offering failed");

        assert_eq!(error.error_code(), 22);
        assert!(!error.is_breaking());

        let status = fake
            .current()
            .and_then(|peer| peer.status)
            .expect("error status was written");
        assert_eq!(status.type_, Some(StatusType::Error));
        assert_eq!(status.error_code, Some(22));
        assert_eq!(
            status.message.as_deref(),
            Some("enrollment endpoint unreachable")
        );
        assert!(
            fake.snapshot("org1-peer1").is_none(),
            "failed pass must not save a snapshot"
        );

        let action = error_policy(Arc::new(peer("org1-peer1", "2.5.4")), &error, ctx);
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn failed_update_is_retried() {
        let fake = Arc::new(FakeCluster::with_resource(peer("org1-peer1", "2.5.4")));
        let offering = Arc::new(ScriptedOffering::default());
        offering.fail_next(OfferingError::Transient {
            code: 22,
            message: "ledger migration timed out".to_owned(),
        });
        let ctx = Arc::new(fake.context(offering.clone()));
        let object = Arc::new(peer("org1-peer1", "2.5.4"));

        let migration = Update::from([UpdateFlag::MigrateToV25]);
        let restart = Update::from([UpdateFlag::RestartNeeded]);
        ctx.queue.push("org1-peer1", migration.clone());
        ctx.queue.push("org1-peer1", restart.clone());

        reconcile(object.clone(), ctx.clone())
            .await
            .expect_err("offering failed");
        assert_eq!(ctx.queue.peek_at("org1-peer1", 0), migration);
        assert_eq!(ctx.queue.len("org1-peer1"), 2);

        reconcile(object.clone(), ctx.clone())
            .await
            .expect("reconcile must succeed");
        reconcile(object, ctx.clone())
            .await
            .expect("reconcile must succeed");

        assert_eq!(
            offering.seen_updates(),
            [migration.clone(), migration, restart]
        );
        assert!(ctx.queue.is_empty("org1-peer1"));
    }

    #[tokio::test]
    async fn breaking_error_waits_for_change() {
        let fake = Arc::new(FakeCluster::with_resource(peer("org1-peer1", "2.5.4")));
        let offering = Arc::new(ScriptedOffering::default());
        offering.fail_next(OfferingError::Breaking {
            code: 5,
            message: "invalid MSP".to_owned(),
        });
        let ctx = Arc::new(fake.context(offering));

        let error = reconcile(Arc::new(peer("org1-peer1", "2.5.4")), ctx.clone())
            .await
            .expect_err("offering failed");

        assert!(error.is_breaking());
        assert_eq!(error.category(), "Offering");
        assert_eq!(
            error_policy(Arc::new(peer("org1-peer1", "2.5.4")), &error, ctx),
            Action::await_change()
        );
    }

    #[tokio::test]
    async fn requested_status_wins() {
        let fake = Arc::new(FakeCluster::with_resource(peer("org1-peer1", "2.5.4")));
        let offering = Arc::new(ScriptedOffering::default());
        offering.succeed_next(OfferingOutcome::with_status(status::status_of_type(
            StatusType::Warning,
            "CertificateExpiring",
            "TLS certificate expires in 3 days",
        )));
        let ctx = Arc::new(fake.context(offering));
        fake.set_pods(vec![ready_pod()]);

        reconcile(Arc::new(peer("org1-peer1", "2.5.4")), ctx)
            .await
            .expect("reconcile must succeed");

        assert_eq!(status_type(&fake), Some(StatusType::Warning));
    }

    #[tokio::test]
    async fn status_conflicts_are_retried() {
        let fake = Arc::new(FakeCluster::with_resource(peer("org1-peer1", "2.5.4")));
        fake.conflict_next_patches(2);
        let ctx = Arc::new(fake.context(Arc::new(ScriptedOffering::default())));

        reconcile(Arc::new(peer("org1-peer1", "2.5.4")), ctx)
            .await
            .expect("two conflicts are within the retry budget");
        assert_eq!(status_type(&fake), Some(StatusType::Deploying));
    }

    #[tokio::test]
    async fn status_conflicts_exhaust_retries() {
        let fake = Arc::new(FakeCluster::with_resource(peer("org1-peer1", "2.5.4")));
        fake.conflict_next_patches(3);
        let ctx = Arc::new(fake.context(Arc::new(ScriptedOffering::default())));

        let error = reconcile(Arc::new(peer("org1-peer1", "2.5.4")), ctx)
            .await
            .expect_err("three conflicts exceed the retry budget");
        assert!(matches!(error, Error::UpdateStatus { .. }));
    }

    #[tokio::test]
    async fn snapshot_is_saved_after_success() {
        let fake = Arc::new(FakeCluster::with_resource(peer("org1-peer1", "2.5.4")));
        let ctx = Arc::new(fake.context(Arc::new(ScriptedOffering::default())));

        reconcile(Arc::new(peer("org1-peer1", "2.5.4")), ctx.clone())
            .await
            .expect("reconcile must succeed");

        let saved = ctx
            .store
            .load(&peer("org1-peer1", "2.5.4"))
            .await
            .expect("snapshot was saved");
        assert_eq!(saved.version, "2.5.4");
    }

    #[tokio::test]
    async fn vanished_resource_is_ignored() {
        let fake = Arc::new(FakeCluster::<IBPPeer>::default());
        let offering = Arc::new(ScriptedOffering::default());
        let ctx = Arc::new(fake.context(offering.clone()));
        ctx.queue
            .push("org1-peer1", Update::from([UpdateFlag::SpecUpdated]));

        let action = reconcile(Arc::new(peer("org1-peer1", "2.5.4")), ctx.clone())
            .await
            .expect("missing resource is not an error");

        assert_eq!(action, Action::await_change());
        assert!(offering.seen_updates().is_empty());
        assert!(ctx.queue.is_empty("org1-peer1"));
    }
}
