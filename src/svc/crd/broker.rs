//! # Broker module
//!
//! This module provides the broker custom resource and its reconciliation
//! loop, each observed change re-fetches the catalog, registers one resource
//! type per (service, plan) pair and bootstraps a dedicated reconciliation
//! loop for every registered type.

use std::sync::Arc;

use async_trait::async_trait;
use kube::{Api, CustomResource};
use kube::runtime::{controller, watcher, Controller};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::svc::{
    crd::instance,
    k8s::{self, registry, resource, ControllerBuilder, State},
    osb::{self, Api as _},
};

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Clone, Debug)]
#[kube(group = "broker.servicebrokers.cloud")]
#[kube(version = "v1alpha1")]
#[kube(kind = "Broker")]
#[kube(singular = "broker")]
#[kube(plural = "brokers")]
#[kube(namespaced)]
#[kube(derive = "PartialEq")]
pub struct Spec {
    #[serde(rename = "url")]
    pub url: String,
    #[serde(rename = "username")]
    pub username: String,
    #[serde(rename = "password")]
    pub password: String,
}

// -----------------------------------------------------------------------------
// ReconcilerError enum

#[derive(thiserror::Error, Debug)]
pub enum ReconcilerError {
    #[error("failed to reconcile resource, {0}")]
    Reconcile(String),
    #[error("failed to execute request on service broker, {0}")]
    OsbClient(osb::Error),
    #[error("failed to execute request on kubernetes api, {0}")]
    KubeClient(kube::Error),
    #[error("failed to register resource type, {0}")]
    Registry(registry::Error),
}

impl From<osb::Error> for ReconcilerError {
    fn from(err: osb::Error) -> Self {
        Self::OsbClient(err)
    }
}

impl From<kube::Error> for ReconcilerError {
    fn from(err: kube::Error) -> Self {
        Self::KubeClient(err)
    }
}

impl From<registry::Error> for ReconcilerError {
    fn from(err: registry::Error) -> Self {
        Self::Registry(err)
    }
}

impl From<controller::Error<Self, watcher::Error>> for ReconcilerError {
    fn from(err: controller::Error<ReconcilerError, watcher::Error>) -> Self {
        Self::Reconcile(err.to_string())
    }
}

// -----------------------------------------------------------------------------
// Reconciler structure

#[derive(Clone, Default, Debug)]
pub struct Reconciler {}

impl ControllerBuilder<Broker> for Reconciler {
    fn build(&self, state: State) -> Controller<Broker> {
        Controller::new(Api::all(state.kube), watcher::Config::default())
    }
}

#[async_trait]
impl k8s::Reconciler<Broker> for Reconciler {
    type Error = ReconcilerError;

    async fn upsert(ctx: Arc<State>, origin: Arc<Broker>) -> Result<(), ReconcilerError> {
        let State {
            kube,
            config,
            tasks,
        } = ctx.as_ref();
        let (namespace, name) = resource::namespaced_name(&*origin);

        // ---------------------------------------------------------------------
        // Step 1: fetch the catalog advertised by the broker

        info!(
            namespace = %namespace,
            name = %name,
            url = %origin.spec.url,
            "Fetch catalog of service broker"
        );
        let client = osb::Client::new(
            &origin.spec.url,
            &origin.spec.username,
            &origin.spec.password,
        )?;
        let catalog = client.catalog().await?;
        let broker: Arc<dyn osb::Api> = Arc::new(client);

        // ---------------------------------------------------------------------
        // Step 2: register one resource type per (service, plan) pair and
        // bootstrap its reconciliation loop. The first failure aborts the
        // whole pass, remaining pairs are processed again on the next event.

        for service in &catalog.services {
            for plan in &service.plans {
                let identity = registry::ensure(kube.to_owned(), service, plan).await?;
                let key = identity.qualified_name();

                let context = Arc::new(instance::Context {
                    kube: kube.to_owned(),
                    osb: broker.to_owned(),
                    binding: instance::ServicePlanBinding::new(
                        service.to_owned(),
                        plan.to_owned(),
                        identity.to_owned(),
                    ),
                    config: config.to_owned(),
                });

                let kind = identity.kind.to_owned();
                let spawned = tasks.spawn(&key, async move {
                    if let Err(err) = instance::Reconciler::watch(context).await {
                        error!(
                            kind = %kind,
                            error = %err,
                            "Could not reconcile instances of dynamic custom resource"
                        );
                    }
                });

                if spawned {
                    info!(
                        kind = %identity.kind,
                        service = %service.name,
                        plan = %plan.name,
                        "Start to listen for events of dynamic custom resource"
                    );
                } else {
                    debug!(
                        kind = %identity.kind,
                        "Reconciliation loop is already running"
                    );
                }
            }
        }

        Ok(())
    }

    async fn delete(_ctx: Arc<State>, origin: Arc<Broker>) -> Result<(), ReconcilerError> {
        let (namespace, name) = resource::namespaced_name(&*origin);

        // Registered resource types and their reconciliation loops outlive
        // the broker, teardown is not handled.
        info!(
            namespace = %namespace,
            name = %name,
            "Broker deleted, registered resource types are left untouched"
        );

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use kube::CustomResourceExt;

    use super::{Broker, Spec};

    #[test]
    fn custom_resource_definition_is_namespaced_under_the_broker_group() {
        let crd = Broker::crd();

        assert_eq!(
            Some("brokers.broker.servicebrokers.cloud".to_string()),
            crd.metadata.name
        );
        assert_eq!("Namespaced", crd.spec.scope);
        assert_eq!("Broker", crd.spec.names.kind);
    }

    #[test]
    fn spec_serializes_with_cleartext_credentials() {
        let spec = Spec {
            url: "http://broker.example.com".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
        };

        let value = serde_json::to_value(&spec).expect("spec to serialize");
        assert_eq!("http://broker.example.com", value["url"]);
        assert_eq!("user", value["username"]);
        assert_eq!("pass", value["password"]);
    }
}
