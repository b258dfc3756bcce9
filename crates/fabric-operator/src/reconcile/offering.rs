use std::time::Duration;

use async_trait::async_trait;
use snafu::Snafu;
use tracing::info;

use crate::{
    crd::{FabricStatus, ManagedResource},
    update::Update,
};

/// Platform specific business logic run for every popped [`Update`].
///
/// Offerings render and apply the Kubernetes objects of a node, rotate its
/// crypto material and run migrations. The driver only sees the outcome.
#[async_trait]
pub trait Offering<R: ManagedResource>: Send + Sync {
    async fn reconcile(&self, resource: &R, update: &Update) -> Result<OfferingOutcome, OfferingError>;
}

/// The result of a successful [`Offering::reconcile`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OfferingOutcome {
    /// Reconcile again after this delay, even if nothing changes.
    pub requeue_after: Option<Duration>,

    /// Status to persist instead of the one derived from pod readiness.
    pub status: Option<FabricStatus>,
}

impl OfferingOutcome {
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
            ..Self::default()
        }
    }

    pub fn with_status(status: FabricStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Debug, Snafu)]
pub enum OfferingError {
    /// Retrying cannot help, the user has to change the resource.
    #[snafu(display("{message}"))]
    Breaking { code: i32, message: String },

    /// A later attempt may succeed.
    #[snafu(display("{message}"))]
    Transient { code: i32, message: String },
}

impl OfferingError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Breaking { code, .. } | Self::Transient { code, .. } => *code,
        }
    }

    pub fn is_breaking(&self) -> bool {
        matches!(self, Self::Breaking { .. })
    }
}

/// An offering without side effects.
///
/// It acknowledges every update, so the status follows the readiness of
/// pods created by some other party.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassiveOffering;

#[async_trait]
impl<R: ManagedResource> Offering<R> for PassiveOffering {
    async fn reconcile(&self, resource: &R, update: &Update) -> Result<OfferingOutcome, OfferingError> {
        if update.needed() {
            info!(
                kind = %R::KIND,
                name = resource.meta().name.as_deref().unwrap_or_default(),
                %update,
                "acknowledging update without side effects"
            );
        }

        Ok(OfferingOutcome::default())
    }
}
