//! Reporting of reconciliation results.
//!
//! Every result is logged. Failures of a single resource are also published
//! as a warning event on it, since its owner usually cannot read the
//! operator logs.

use std::error::Error;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    Resource,
    core::DynamicObject,
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
    },
};
use tracing::{error, info, warn};

use crate::{cluster::EventPublisher, logging::events::reconcile_failure_event};

/// A reconciliation error that can be shown to the owner of a resource.
pub trait ReconcilerError: Error {
    /// Short `PascalCase` name of the failure, used as the event reason.
    ///
    /// Usually the name of the error variant, see [`strum::EnumDiscriminants`].
    fn category(&self) -> &'static str;

    /// Another object involved in the failure, if any.
    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

/// Logs the result of one reconciliation and publishes failures of a
/// resource through `events`.
///
/// Meant to consume the stream returned by [`kube::runtime::Controller::run`].
pub async fn report_controller_reconciled<K, ReconcileErr, QueueErr>(
    events: &dyn EventPublisher,
    controller_name: &str,
    result: &Result<(ObjectRef<K>, Action), controller::Error<ReconcileErr, QueueErr>>,
) where
    K: Resource,
    ReconcileErr: ReconcilerError,
    QueueErr: Error,
{
    let failure = match result {
        Ok((object, action)) => {
            info!(controller.name = controller_name, %object, ?action, "reconciled");
            return;
        }
        Err(failure) => failure,
    };

    error!(
        controller.name = controller_name,
        error = failure as &dyn Error,
        "reconciliation failed"
    );

    // Watch and queue errors concern the operator, not a resource.
    let controller::Error::ReconcilerFailed(reconcile_error, object) = failure else {
        return;
    };

    let event = reconcile_failure_event(reconcile_error);
    if let Err(publish_error) = events
        .publish(ObjectReference::from(object.clone()), event)
        .await
    {
        warn!(
            %object,
            error = &publish_error as &dyn Error,
            "failed to publish reconciliation failure"
        );
    }
}
