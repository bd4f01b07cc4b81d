//! # Instance module
//!
//! This module provides the reconciliation loop bound to one dynamically
//! registered resource type, driving each instance of the type through the
//! provisioning state machine against the service broker.

use std::{sync::Arc, time::Duration};

use futures::{StreamExt, TryStreamExt};
use kube::{
    api::{DynamicObject, Patch, PatchParams},
    core::ApiResource,
    Api, ResourceExt,
};
use kube::runtime::{
    controller::{self, Action},
    watcher, Controller,
};
use serde_json::json;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace};

use crate::svc::{
    cfg::{Configuration, Provisioning},
    k8s::{registry::TypeIdentity, resource},
    osb::{
        self,
        catalog::{Plan, Service},
        provision::ProvisionRequest,
    },
};

// -----------------------------------------------------------------------------
// ServicePlanBinding structure

/// association between a catalog (service, plan) pair and the resource type
/// registered for it, immutable once constructed and owned by one
/// reconciliation loop for its entire lifetime
#[derive(PartialEq, Clone, Debug)]
pub struct ServicePlanBinding {
    pub service: Service,
    pub plan: Plan,
    pub identity: TypeIdentity,
}

impl ServicePlanBinding {
    pub fn new(service: Service, plan: Plan, identity: TypeIdentity) -> Self {
        Self {
            service,
            plan,
            identity,
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        self.identity.api_resource()
    }
}

// -----------------------------------------------------------------------------
// Context structure

/// context given to the reconciliation loop of one resource type
pub struct Context {
    pub kube: kube::Client,
    pub osb: Arc<dyn osb::Api>,
    pub binding: ServicePlanBinding,
    pub config: Arc<Configuration>,
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

impl From<controller::Error<Self, watcher::Error>> for ReconcilerError {
    fn from(err: controller::Error<ReconcilerError, watcher::Error>) -> Self {
        Self::Reconcile(err.to_string())
    }
}

// -----------------------------------------------------------------------------
// helpers

/// returns whether the instance carries the persisted provisioning marker,
/// the marker is the sole guard against provisioning the same instance twice
pub fn provisioned(obj: &DynamicObject) -> bool {
    obj.data
        .pointer("/status/provisioned")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

/// fire the provisioning call for the given instance when it has not been
/// provisioned yet, returns the generated broker-side instance identifier or
/// None when there was nothing to do.
///
/// A fresh identifier is generated on every attempt, so a retry after a
/// failure that occurred once the broker had already provisioned leaks a
/// duplicate on the broker side, a known gap of the provisioning protocol
/// used here.
pub async fn provision(
    osb: &dyn osb::Api,
    binding: &ServicePlanBinding,
    provisioning: &Provisioning,
    obj: &DynamicObject,
) -> Result<Option<String>, ReconcilerError> {
    if resource::deleted(obj) {
        debug!(
            kind = %binding.identity.kind,
            name = %obj.name_any(),
            "Skip deleted instance, deprovisioning is not handled"
        );
        return Ok(None);
    }

    if provisioned(obj) {
        debug!(
            kind = %binding.identity.kind,
            name = %obj.name_any(),
            "Instance is already provisioned"
        );
        return Ok(None);
    }

    let request = ProvisionRequest::new(&binding.service.id, &binding.plan.id, provisioning);
    let instance_id = request.instance_id.to_owned();

    info!(
        kind = %binding.identity.kind,
        name = %obj.name_any(),
        service = %binding.service.id,
        plan = %binding.plan.id,
        instance = %instance_id,
        "Provision instance on service broker"
    );

    osb.provision(&request).await?;
    Ok(Some(instance_id))
}

// -----------------------------------------------------------------------------
// Reconciler structure

#[derive(Clone, Default, Debug)]
pub struct Reconciler {}

impl Reconciler {
    /// process one event for an instance of the bound resource type
    pub async fn reconcile(
        obj: Arc<DynamicObject>,
        ctx: Arc<Context>,
    ) -> Result<Action, ReconcilerError> {
        let name = obj.name_any();

        let instance_id = match provision(
            ctx.osb.as_ref(),
            &ctx.binding,
            &ctx.config.provisioning,
            &obj,
        )
        .await?
        {
            Some(instance_id) => instance_id,
            None => {
                return Ok(Action::await_change());
            }
        };

        // Persist the provisioning marker. A failure here must surface,
        // swallowing it would leave the broker provisioned while the next
        // event provisions a second instance.
        let api: Api<DynamicObject> =
            Api::all_with(ctx.kube.to_owned(), &ctx.binding.api_resource());

        api.patch_status(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&json!({"status": {"provisioned": true}})),
        )
        .await
        .map_err(ReconcilerError::KubeClient)?;

        info!(
            kind = %ctx.binding.identity.kind,
            name = %name,
            instance = %instance_id,
            "Instance is provisioned"
        );

        Ok(Action::await_change())
    }

    /// returns a [`Action`] to perform following the given error
    pub fn retry(_obj: Arc<DynamicObject>, err: &ReconcilerError, _ctx: Arc<Context>) -> Action {
        trace!(
            duration = 500,
            error = %err,
            "Requeue failed reconciliation"
        );
        Action::requeue(Duration::from_millis(500))
    }

    /// listen for events of instances of the bound resource type, runs until
    /// the surrounding task is aborted
    pub async fn watch(ctx: Arc<Context>) -> Result<(), ReconcilerError> {
        let api_resource = ctx.binding.api_resource();
        let api: Api<DynamicObject> = Api::all_with(ctx.kube.to_owned(), &api_resource);
        let mut stream = Controller::new_with(api, watcher::Config::default(), api_resource.to_owned())
            .run(Self::reconcile, Self::retry, ctx)
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
                        name = %obj.name,
                        "Successfully reconcile resource"
                    );
                }
                Err(controller::Error::ObjectNotFound(obj_ref)) => {
                    debug!(
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

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use std::sync::{Mutex, PoisonError};

    use async_trait::async_trait;
    use kube::api::DynamicObject;
    use serde_json::json;

    use crate::svc::{
        cfg::Provisioning,
        k8s::registry::{self, TypeIdentity},
        osb::{
            self,
            catalog::{Catalog, Plan, Service},
            provision::{ProvisionRequest, ProvisionResponse},
        },
    };

    use super::{provision, provisioned, ServicePlanBinding};

    // -------------------------------------------------------------------------
    // Mock service broker

    #[derive(Default)]
    struct MockApi {
        fail: bool,
        provisions: Mutex<Vec<ProvisionRequest>>,
    }

    impl MockApi {
        fn provisions(&self) -> Vec<ProvisionRequest> {
            self.provisions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .to_owned()
        }
    }

    #[async_trait]
    impl osb::Api for MockApi {
        async fn catalog(&self) -> Result<Catalog, osb::Error> {
            Ok(Catalog::default())
        }

        async fn provision(
            &self,
            request: &ProvisionRequest,
        ) -> Result<ProvisionResponse, osb::Error> {
            if self.fail {
                return Err(osb::Error::Response(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    "boom".to_string(),
                ));
            }

            self.provisions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.to_owned());

            Ok(ProvisionResponse::default())
        }
    }

    // -------------------------------------------------------------------------
    // helpers

    fn binding() -> ServicePlanBinding {
        let service = Service {
            id: "s1".to_string(),
            name: "db".to_string(),
            description: None,
            plans: vec![],
        };
        let plan = Plan {
            id: "p1".to_string(),
            name: "small".to_string(),
            description: None,
            schemas: None,
        };
        let identity = registry::identity(&service, &plan);

        ServicePlanBinding::new(service, plan, identity)
    }

    fn provisioning() -> Provisioning {
        Provisioning {
            organization: "org".to_string(),
            space: "space".to_string(),
        }
    }

    fn instance(identity: &TypeIdentity, data: serde_json::Value) -> DynamicObject {
        let mut obj = DynamicObject::new("example", &identity.api_resource());

        obj.data = data;
        obj
    }

    // -------------------------------------------------------------------------
    // provisioned marker

    #[test]
    fn instance_without_status_is_unprovisioned() {
        let binding = binding();

        assert!(!provisioned(&instance(&binding.identity, json!({}))));
        assert!(!provisioned(&instance(
            &binding.identity,
            json!({"spec": {"size": "10G"}})
        )));
    }

    #[test]
    fn instance_with_false_or_malformed_marker_is_unprovisioned() {
        let binding = binding();

        assert!(!provisioned(&instance(
            &binding.identity,
            json!({"status": {"provisioned": false}})
        )));
        assert!(!provisioned(&instance(
            &binding.identity,
            json!({"status": {"provisioned": "yes"}})
        )));
        assert!(!provisioned(&instance(&binding.identity, json!({"status": {}}))));
    }

    #[test]
    fn instance_with_marker_is_provisioned() {
        let binding = binding();

        assert!(provisioned(&instance(
            &binding.identity,
            json!({"status": {"provisioned": true}})
        )));
    }

    // -------------------------------------------------------------------------
    // provisioning state machine

    #[tokio::test]
    async fn unprovisioned_instance_triggers_one_provisioning_call() {
        let osb = MockApi::default();
        let binding = binding();
        let obj = instance(&binding.identity, json!({}));

        let instance_id = provision(&osb, &binding, &provisioning(), &obj)
            .await
            .expect("provisioning to succeed")
            .expect("an instance identifier to be generated");

        let provisions = osb.provisions();
        assert_eq!(1, provisions.len());
        assert_eq!("s1", provisions[0].service_id);
        assert_eq!("p1", provisions[0].plan_id);
        assert_eq!("org", provisions[0].organization_guid);
        assert_eq!("space", provisions[0].space_guid);
        assert_eq!(instance_id, provisions[0].instance_id);
    }

    #[tokio::test]
    async fn each_attempt_generates_a_fresh_instance_identifier() {
        let osb = MockApi::default();
        let binding = binding();
        let obj = instance(&binding.identity, json!({}));

        let first = provision(&osb, &binding, &provisioning(), &obj)
            .await
            .expect("provisioning to succeed")
            .expect("an instance identifier to be generated");
        let second = provision(&osb, &binding, &provisioning(), &obj)
            .await
            .expect("provisioning to succeed")
            .expect("an instance identifier to be generated");

        assert_ne!(first, second);
        assert_eq!(2, osb.provisions().len());
    }

    #[tokio::test]
    async fn provisioned_instance_never_triggers_a_second_call() {
        let osb = MockApi::default();
        let binding = binding();
        let obj = instance(&binding.identity, json!({"status": {"provisioned": true}}));

        let result = provision(&osb, &binding, &provisioning(), &obj)
            .await
            .expect("reconciliation to succeed");

        assert!(result.is_none());
        assert!(osb.provisions().is_empty());
    }

    #[tokio::test]
    async fn provisioning_failure_propagates() {
        let osb = MockApi {
            fail: true,
            ..Default::default()
        };
        let binding = binding();
        let obj = instance(&binding.identity, json!({}));

        assert!(provision(&osb, &binding, &provisioning(), &obj)
            .await
            .is_err());
        assert!(osb.provisions().is_empty());
    }
}
