//! # Kubernetes module
//!
//! This module provides kubernetes helpers, the shared state given to each
//! reconciliation loop and the traits implemented by reconcilers.

use std::{error::Error, fmt::Debug, hash::Hash, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::{CustomResourceExt, Resource, ResourceExt};
use kube::runtime::{
    controller::{self, Action},
    watcher, Controller,
};
use serde::de::DeserializeOwned;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace};

use crate::svc::{cfg::Configuration, k8s::task::Registry};

pub mod client;
pub mod registry;
pub mod resource;
pub mod schema;
pub mod task;

// -----------------------------------------------------------------------------
// State structure

/// contains the kubernetes client, the configuration and the registry of
/// background reconciliation loops, shared with every reconciler
#[derive(Clone)]
pub struct State {
    pub kube: kube::Client,
    pub config: Arc<Configuration>,
    pub tasks: Registry,
}

impl From<(kube::Client, Arc<Configuration>, Registry)> for State {
    fn from((kube, config, tasks): (kube::Client, Arc<Configuration>, Registry)) -> Self {
        Self {
            kube,
            config,
            tasks,
        }
    }
}

impl State {
    pub fn new(kube: kube::Client, config: Arc<Configuration>, tasks: Registry) -> Self {
        Self::from((kube, config, tasks))
    }
}

// -----------------------------------------------------------------------------
// ControllerBuilder trait

/// provides a common way to create a kubernetes controller [`Controller<T>`]
pub trait ControllerBuilder<T>
where
    T: Resource + Clone + Debug,
    <T as Resource>::DynamicType: Eq + Hash,
{
    /// returns a new created kubernetes controller
    fn build(&self, state: State) -> Controller<T>;
}

// -----------------------------------------------------------------------------
// Reconciler trait

/// provides the methods given to a kubernetes controller [`Controller<T>`]
#[async_trait]
pub trait Reconciler<T>
where
    T: ResourceExt + CustomResourceExt + Debug + Clone + Send + Sync + 'static,
{
    type Error: Error + Send + Sync;

    /// create or update third parties from the object, this is part of the
    /// reconcile function
    async fn upsert(ctx: Arc<State>, obj: Arc<T>) -> Result<(), Self::Error>;

    /// delete the object from kubernetes and third parties
    async fn delete(ctx: Arc<State>, obj: Arc<T>) -> Result<(), Self::Error>;

    /// returns a [`Action`] to perform following the given error
    fn retry(_obj: Arc<T>, err: &Self::Error, _ctx: Arc<State>) -> Action {
        // Implements a basic reconciliation which always re-schedule the event
        // 500 ms later
        trace!(
            duration = 500,
            error = %err,
            "Requeue failed reconciliation"
        );
        Action::requeue(Duration::from_millis(500))
    }

    /// process the object and perform actions on kubernetes and the service
    /// broker, returns a [`Action`] to maybe perform another reconciliation
    /// or an error, if something gets wrong
    async fn reconcile(obj: Arc<T>, ctx: Arc<State>) -> Result<Action, Self::Error> {
        let (namespace, name) = resource::namespaced_name(&*obj);
        let api_resource = T::api_resource();

        if resource::deleted(&*obj) {
            info!(
                kind = %api_resource.kind,
                namespace = %namespace,
                name = %name,
                "Received deletion event for custom resource"
            );

            if let Err(err) = Self::delete(ctx, obj.to_owned()).await {
                error!(
                    kind = %api_resource.kind,
                    namespace = %namespace,
                    name = %name,
                    error = %err,
                    "Failed to delete custom resource"
                );
                return Err(err);
            }
        } else {
            info!(
                kind = %api_resource.kind,
                namespace = %namespace,
                name = %name,
                "Received upsertion event for custom resource"
            );

            if let Err(err) = Self::upsert(ctx, obj.to_owned()).await {
                error!(
                    kind = %api_resource.kind,
                    namespace = %namespace,
                    name = %name,
                    error = %err,
                    "Failed to upsert custom resource"
                );
                return Err(err);
            }
        }

        Ok(Action::await_change())
    }
}

// -----------------------------------------------------------------------------
// WatcherError trait

/// group other trait needed to provide a default implementation for
/// [`Watcher<T>`] trait
pub trait WatcherError:
    From<kube::Error> + From<controller::Error<Self, watcher::Error>> + Error
where
    Self: 'static,
{
}

/// Blanket implementation of [`WatcherError`]
impl<T> WatcherError for T
where
    T: From<kube::Error> + From<controller::Error<Self, watcher::Error>> + Error,
    Self: 'static,
{
}

// -----------------------------------------------------------------------------
// Watcher trait

/// provides a watch method that listen to events of kubernetes custom
/// resource using a [`Controller<T>`]
#[async_trait]
pub trait Watcher<T>: ControllerBuilder<T> + Reconciler<T>
where
    T: DeserializeOwned + ResourceExt + CustomResourceExt + Clone + Debug + Send + Sync + 'static,
    <T as Resource>::DynamicType: Unpin + Eq + Hash + Clone + Debug + Send + Sync + Default,
    Self: Send + Sync + 'static,
    <Self as Reconciler<T>>::Error: WatcherError + Send + Sync,
{
    type Error: WatcherError + Send + Sync;

    /// listen for events of the custom resource as generic parameter
    async fn watch(&self, state: State) -> Result<(), <Self as Watcher<T>>::Error> {
        let context = Arc::new(state.to_owned());
        let api_resource = T::api_resource();
        let mut stream = self
            .build(state)
            .run(Self::reconcile, Self::retry, context)
            .boxed();

        loop {
            let instant = Instant::now();

            match stream.try_next().await {
                Ok(None) => {
                    debug!("We have reached the end of the infinite watch stream");
                    return Ok(());
                }
                Ok(Some((obj, _action))) => {
                    info!(
                        kind = %api_resource.kind,
                        namespace = obj.namespace.as_deref().unwrap_or_default(),
                        name = %obj.name,
                        "Successfully reconcile resource"
                    );
                }
                Err(controller::Error::ObjectNotFound(obj_ref)) => {
                    debug!(
                        namespace = obj_ref.namespace.as_deref().unwrap_or_default(),
                        name = %obj_ref.name,
                        "Received an event about an already deleted resource"
                    );
                }
                Err(err) => {
                    error!(
                        kind = %api_resource.kind,
                        error = %err,
                        "Failed to reconcile resource"
                    );
                }
            }

            sleep_until(instant + Duration::from_millis(100)).await;
        }
    }
}

/// Blanket implementation for [`Watcher<T>`]
impl<T, U> Watcher<T> for U
where
    T: DeserializeOwned + ResourceExt + CustomResourceExt + Clone + Debug + Send + Sync + 'static,
    <T as Resource>::DynamicType: Unpin + Eq + Hash + Clone + Debug + Send + Sync + Default,
    U: Reconciler<T> + ControllerBuilder<T>,
    U::Error: WatcherError + Send + Sync,
    Self: Send + Sync + 'static,
{
    type Error = U::Error;
}
