//! Predicates for events on the managed resources themselves.

use tracing::{debug, info, warn};

use crate::{
    cluster::ResourceIdentity,
    context::Context,
    crd::{ManagedResource, NodeSpec},
    migration::decide_migration,
    predicate::{msp::msp_updated, publish_warning},
    status,
    update::{Update, UpdateFlag},
    validation,
};

/// Error code recorded when a new resource reuses the name of another one.
pub const NAME_COLLISION_ERROR_CODE: i32 = 2;

/// Builds the [`Update`] describing the transition from `old` to `new`.
///
/// Callers are expected to have checked that the specs differ.
pub fn diff_specs<S: NodeSpec>(old: &S, new: &S) -> Update {
    let mut update = Update::from([UpdateFlag::SpecUpdated]);

    update.set_if(
        UpdateFlag::OverridesUpdated,
        old.config_override() != new.config_override(),
    );
    update.set_if(UpdateFlag::ImagesUpdated, old.images_updated(new));
    update.set_if(
        UpdateFlag::FabricVersionUpdated,
        old.fabric_version() != new.fabric_version(),
    );
    update.set_if(UpdateFlag::MspUpdated, msp_updated(old.msp(), new.msp()));

    decide_migration(old.fabric_version(), new.fabric_version()).apply_to(&mut update);

    let (old_action, new_action) = (old.action(), new.action());
    update.set_if(UpdateFlag::RestartNeeded, new_action.restart);

    let (old_reenroll, new_reenroll) = (&old_action.reenroll, &new_action.reenroll);
    update.set_if(
        UpdateFlag::EcertReenrollNeeded,
        toggled_on(old_reenroll.ecert, new_reenroll.ecert),
    );
    update.set_if(
        UpdateFlag::EcertNewKeyReenroll,
        toggled_on(old_reenroll.ecert_new_key, new_reenroll.ecert_new_key),
    );
    update.set_if(
        UpdateFlag::TlsReenrollNeeded,
        toggled_on(old_reenroll.tls_cert, new_reenroll.tls_cert),
    );
    update.set_if(
        UpdateFlag::TlsCertNewKeyReenroll,
        toggled_on(old_reenroll.tls_cert_new_key, new_reenroll.tls_cert_new_key),
    );

    update.set_if(
        UpdateFlag::NodeOuUpdated,
        old.node_ou_disabled() != new.node_ou_disabled(),
    );

    update.set_if(UpdateFlag::UpgradeDbs, new_action.upgrade_dbs);
    update.set_if(UpdateFlag::EcertEnroll, new_action.enroll.ecert);
    update.set_if(UpdateFlag::TlsCertEnroll, new_action.enroll.tls_cert);

    update
}

// Action flags are reset by the offering once the action ran, which must not
// count as a new request.
fn toggled_on(old: bool, new: bool) -> bool {
    old != new && new
}

/// Describes why moving from `old` to `new` is not allowed, if it isn't.
pub fn placement_violation<S: NodeSpec>(old: &S, new: &S) -> Option<String> {
    if old.zone() != new.zone() {
        return Some(format!(
            "zone cannot be changed from {old:?} to {new:?}",
            old = old.zone().unwrap_or_default(),
            new = new.zone().unwrap_or_default()
        ));
    }

    if old.region() != new.region() {
        return Some(format!(
            "region cannot be changed from {old:?} to {new:?}",
            old = old.region().unwrap_or_default(),
            new = new.region().unwrap_or_default()
        ));
    }

    None
}

/// Handles a modification of a managed resource.
#[tracing::instrument(skip_all, fields(kind = %R::KIND, name = new.meta().name.as_deref().unwrap_or_default()))]
pub async fn update<R: ManagedResource>(ctx: &Context<R>, old: &R, new: &R) -> (Update, bool) {
    let (old_spec, new_spec) = (old.node_spec(), new.node_spec());

    if let Some(violation) = placement_violation(old_spec, new_spec) {
        warn!(%violation, "rejecting update");
        publish_warning(ctx, new, "PlacementChanged", violation).await;
        return (Update::default(), false);
    }

    if old_spec == new_spec {
        return (Update::default(), false);
    }

    let update = diff_specs(old_spec, new_spec);
    debug!(%update, "detected update");

    ctx.queue
        .push(new.meta().name.as_deref().unwrap_or_default(), update.clone());
    (update, true)
}

/// Handles a managed resource showing up, either because it was just created
/// or because the operator (re)started.
#[tracing::instrument(skip_all, fields(kind = %R::KIND, name = resource.meta().name.as_deref().unwrap_or_default()))]
pub async fn create<R: ManagedResource>(ctx: &Context<R>, resource: &R) -> (Update, bool) {
    let identity = ResourceIdentity::of(resource);

    // A recorded status means the operator has seen this resource before.
    // Whatever changed while it was not running is recovered from the last
    // reconciled spec.
    if resource.status_type().is_some() {
        let snapshot = match ctx.store.load(resource).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(
                    error = &error as &dyn std::error::Error,
                    "failed to load spec snapshot, reconciling anyway"
                );
                return (Update::default(), true);
            }
        };

        if &snapshot == resource.node_spec() {
            debug!("spec unchanged since last reconciliation");
            return (Update::default(), false);
        }

        // The snapshot keeps the last accepted placement, so a rejected move
        // stays rejected across restarts.
        if let Some(violation) = placement_violation(&snapshot, resource.node_spec()) {
            warn!(%violation, "rejecting update recovered from spec snapshot");
            publish_warning(ctx, resource, "PlacementChanged", violation).await;
            return (Update::default(), false);
        }

        let update = diff_specs(&snapshot, resource.node_spec());
        info!(%update, "recovered update from spec snapshot");

        ctx.queue.push(&identity.name, update.clone());
        return (update, true);
    }

    match validation::validate_resource_name(ctx.siblings.as_ref(), &identity).await {
        Ok(()) => (Update::default(), true),
        Err(error) if !error.is_violation() => {
            warn!(
                error = &error as &dyn std::error::Error,
                "failed to validate resource name, reconciling anyway"
            );
            (Update::default(), true)
        }
        Err(error) => {
            warn!(
                error = &error as &dyn std::error::Error,
                "rejecting resource"
            );

            let status = status::with_heartbeat(status::error_status(
                NAME_COLLISION_ERROR_CODE,
                "NameCollision",
                error.to_string(),
            ));
            if let Err(status_error) = status::patch_with_retry(
                ctx.statuses.as_ref(),
                resource,
                &status,
                ctx.config.status_patch_retries,
            )
            .await
            {
                warn!(
                    error = &status_error as &dyn std::error::Error,
                    "failed to record error status"
                );
            }

            (Update::default(), false)
        }
    }
}

/// Cleans up after a deleted managed resource. Never triggers a
/// reconciliation.
#[tracing::instrument(skip_all, fields(kind = %R::KIND, name = resource.meta().name.as_deref().unwrap_or_default()))]
pub async fn delete<R: ManagedResource>(ctx: &Context<R>, resource: &R) -> bool {
    let name = resource.meta().name.as_deref().unwrap_or_default();

    let dropped = ctx.queue.discard(name);
    if dropped > 0 {
        debug!(dropped, "dropped pending updates");
    }

    if let Err(error) = ctx.store.delete(resource).await {
        warn!(
            error = &error as &dyn std::error::Error,
            "failed to delete spec snapshot"
        );
    }

    false
}
