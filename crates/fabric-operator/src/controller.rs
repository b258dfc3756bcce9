//! Wires the predicates and the reconciler into the kube controller runtime.
//!
//! Every managed kind gets its own controller. The primary watch feeds the
//! controller through a reflector, so the reconciler always sees the cached
//! object. Secrets, config maps and deployments are watched once for all
//! kinds, and every change is handed to the predicates of each kind, which
//! decide which of their resources it affects.

use std::{fmt::Debug, pin::pin, sync::Arc};

use async_trait::async_trait;
use futures::{
    Stream, StreamExt,
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    future, stream,
};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Secret},
};
use kube::{
    Api, Resource,
    runtime::{
        Controller, WatchStreamExt,
        reflector::{self, ObjectRef, store::Writer},
        watcher,
    },
};
use serde::de::DeserializeOwned;
use snafu::{ResultExt, Snafu};
use tracing::{debug, info, warn};

use crate::{
    cli::RunArguments,
    client::Client,
    context::{Context, ControllerConfig},
    crd::{IBPCA, IBPConsole, IBPOrderer, IBPPeer, ManagedResource},
    logging::controller::report_controller_reconciled,
    namespace::WatchNamespace,
    predicate::{Change, ChangeTracker, WatchedObject, evaluate, secret},
    reconcile::{self, PassiveOffering},
    utils::signal::{SignalError, SignalWatcher},
};

pub const OPERATOR_NAME: &str = "fabric-operator";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to watch for shutdown signals"))]
    WatchSignal { source: SignalError },
}

/// The name the controller for `R` reports under, e.g. `ibppeer-controller`.
pub fn controller_name<R: ManagedResource>() -> String {
    format!("{}-controller", R::KIND.to_string().to_lowercase())
}

/// Runs the controllers of all managed kinds until `SIGTERM` is received.
pub async fn run_all(client: &Client, run: &RunArguments) -> Result<(), Error> {
    let sigterm = SignalWatcher::sigterm().context(WatchSignalSnafu)?;
    let config = run.controller_config();
    let namespace = &run.watch_namespace;

    info!(?namespace, ?config, "starting controllers");

    let ca = ManagedKind::<IBPCA>::passive(client, &config);
    let console = ManagedKind::<IBPConsole>::passive(client, &config);
    let orderer = ManagedKind::<IBPOrderer>::passive(client, &config);
    let peer = ManagedKind::<IBPPeer>::passive(client, &config);

    let secret_targets = [
        ca.target(WatchedObject::Secret),
        console.target(WatchedObject::Secret),
        orderer.target(WatchedObject::Secret),
        peer.target(WatchedObject::Secret),
    ];
    let config_map_targets = [
        ca.target(WatchedObject::ConfigMap),
        console.target(WatchedObject::ConfigMap),
        orderer.target(WatchedObject::ConfigMap),
        peer.target(WatchedObject::ConfigMap),
    ];
    let deployment_targets = [
        ca.target(WatchedObject::Deployment),
        console.target(WatchedObject::Deployment),
        orderer.target(WatchedObject::Deployment),
        peer.target(WatchedObject::Deployment),
    ];

    let secondary = future::join3(
        watch_secondary(
            namespace.get_api::<Secret>(client),
            secret::without_contents,
            &secret_targets,
            sigterm.handle(),
        ),
        watch_secondary(
            namespace.get_api::<ConfigMap>(client),
            without_config_data,
            &config_map_targets,
            sigterm.handle(),
        ),
        watch_secondary(
            namespace.get_api::<Deployment>(client),
            without_deployment_spec,
            &deployment_targets,
            sigterm.handle(),
        ),
    );

    let controllers = future::join4(
        ca.run(client, namespace, sigterm.handle()),
        console.run(client, namespace, sigterm.handle()),
        orderer.run(client, namespace, sigterm.handle()),
        peer.run(client, namespace, sigterm.handle()),
    );

    future::join(secondary, controllers).await;

    Ok(())
}

/// A managed kind whose controller has not been started yet.
struct ManagedKind<R: ManagedResource> {
    ctx: Arc<Context<R>>,
    triggers: UnboundedSender<ObjectRef<R>>,
    triggered: UnboundedReceiver<ObjectRef<R>>,
}

impl<R: ManagedResource> ManagedKind<R> {
    fn passive(client: &Client, config: &ControllerConfig) -> Self {
        let (triggers, triggered) = mpsc::unbounded();

        Self {
            ctx: Arc::new(Context::new(
                client,
                Arc::new(PassiveOffering),
                config.clone(),
            )),
            triggers,
            triggered,
        }
    }

    /// Routes changes of the secondary kind `K` into the predicates of `R`.
    fn target<K>(&self, wrap: fn(Change<K>) -> WatchedObject<R>) -> Box<dyn SecondaryTarget<K>>
    where
        K: Clone + Send + Sync + 'static,
    {
        Box::new(Target {
            ctx: self.ctx.clone(),
            wrap,
            triggers: self.triggers.clone(),
        })
    }

    async fn run(
        self,
        client: &Client,
        namespace: &WatchNamespace,
        shutdown: impl Future<Output = ()> + Send + Sync + 'static,
    ) {
        run(client, namespace, self.ctx, self.triggered, shutdown).await;
    }
}

/// Receives the changes of a shared secondary watch.
#[async_trait]
trait SecondaryTarget<K>: Send + Sync {
    async fn dispatch(&self, change: &Change<K>);
}

struct Target<R: ManagedResource, K> {
    ctx: Arc<Context<R>>,
    wrap: fn(Change<K>) -> WatchedObject<R>,
    triggers: UnboundedSender<ObjectRef<R>>,
}

#[async_trait]
impl<R, K> SecondaryTarget<K> for Target<R, K>
where
    R: ManagedResource,
    K: Clone + Send + Sync + 'static,
{
    async fn dispatch(&self, change: &Change<K>) {
        for target in evaluate(&self.ctx, (self.wrap)(change.clone())).await {
            // Fails once the controller has shut down.
            if self.triggers.unbounded_send(target).is_err() {
                break;
            }
        }
    }
}

/// Runs the controller for the managed kind `R` until `shutdown` completes.
///
/// Besides changes of `R` itself, the resources yielded by `triggers` are
/// reconciled.
pub async fn run<R: ManagedResource>(
    client: &Client,
    namespace: &WatchNamespace,
    ctx: Arc<Context<R>>,
    triggers: impl Stream<Item = ObjectRef<R>> + Send + 'static,
    shutdown: impl Future<Output = ()> + Send + Sync + 'static,
) {
    let name = controller_name::<R>();
    let events = ctx.events.clone();
    let (reader, writer) = reflector::store();

    let primary = primary_stream(namespace.get_api::<R>(client), writer, ctx.clone());

    Controller::for_stream(primary, reader)
        .reconcile_on(triggers)
        .graceful_shutdown_on(shutdown)
        .run(reconcile::reconcile, reconcile::error_policy, ctx)
        .for_each(|result| {
            let (events, name) = (&events, &name);
            async move { report_controller_reconciled(events.as_ref(), name, &result).await }
        })
        .await;

    info!(controller.name = %name, "controller stopped");
}

/// Watches the managed resources themselves. Yields the objects whose change
/// needs a reconciliation, watch errors are passed on to the controller.
fn primary_stream<R: ManagedResource>(
    api: Api<R>,
    writer: Writer<R>,
    ctx: Arc<Context<R>>,
) -> impl Stream<Item = Result<R, watcher::Error>> + Send + 'static {
    let tracker = Arc::new(ChangeTracker::<R>::new());

    watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .then(move |event| {
            let ctx = ctx.clone();
            let tracker = tracker.clone();

            async move {
                let event = match event {
                    Ok(event) => event,
                    Err(error) => return vec![Err(error)],
                };

                let mut triggered = Vec::new();
                for change in tracker.observe(event) {
                    let object = change.object().clone();
                    if !evaluate(&ctx, WatchedObject::Primary(change)).await.is_empty() {
                        triggered.push(Ok(object));
                    }
                }
                triggered
            }
        })
        .flat_map(stream::iter)
}

/// Watches objects of kind `K` on behalf of all managed kinds until
/// `shutdown` completes.
///
/// Objects pass through `trim` before they are tracked, which drops whatever
/// the predicates do not look at.
async fn watch_secondary<K>(
    api: Api<K>,
    trim: fn(&mut K),
    targets: &[Box<dyn SecondaryTarget<K>>],
    shutdown: impl Future<Output = ()>,
) where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    let kind = K::kind(&());
    let tracker = ChangeTracker::<K>::new();
    let mut events = pin!(
        watcher(api, watcher::Config::default())
            .default_backoff()
            .modify(trim)
            .take_until(shutdown)
    );

    while let Some(event) = events.next().await {
        let changes = match event {
            Ok(event) => tracker.observe(event),
            Err(error) => {
                warn!(
                    %kind,
                    error = &error as &dyn std::error::Error,
                    "secondary watch failed"
                );
                continue;
            }
        };

        for change in changes {
            for target in targets {
                target.dispatch(&change).await;
            }
        }
    }

    debug!(%kind, "secondary watch stopped");
}

fn without_config_data(config_map: &mut ConfigMap) {
    config_map.metadata.managed_fields = None;
    config_map.data = None;
    config_map.binary_data = None;
}

fn without_deployment_spec(deployment: &mut Deployment) {
    deployment.metadata.managed_fields = None;
    deployment.spec = None;
    deployment.status = None;
}
