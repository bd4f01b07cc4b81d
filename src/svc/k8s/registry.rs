//! # Registry module
//!
//! This module derives a custom resource definition from a (service, plan)
//! pair of the broker catalog and registers it on the cluster, once per pair.

use std::fmt::{self, Display, Formatter};

use k8s_openapi::{
    apiextensions_apiserver::pkg::apis::apiextensions::v1::{
        CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
        CustomResourceDefinitionVersion, CustomResourceSubresourceStatus,
        CustomResourceSubresources, CustomResourceValidation,
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{
    api::PostParams,
    core::GroupVersionKind,
    discovery::ApiResource,
    Api,
};
use tracing::{debug, info};

use crate::svc::{
    k8s::{resource, schema},
    osb::catalog::{Plan, Service},
};

// -----------------------------------------------------------------------------
// Constants

/// group under which every derived custom resource definition is registered
pub const DOMAIN: &str = "servicebrokers.cloud";

pub const VERSION: &str = "v1alpha1";

pub const SCOPE: &str = "Cluster";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to execute request on kubernetes api, {0}")]
    KubeClient(kube::Error),
    #[error("failed to build validation schema, {0}")]
    Schema(schema::Error),
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        Self::KubeClient(err)
    }
}

impl From<schema::Error> for Error {
    fn from(err: schema::Error) -> Self {
        Self::Schema(err)
    }
}

// -----------------------------------------------------------------------------
// TypeIdentity structure

/// identity of a dynamically registered resource type, enough to build a
/// generic handle over instances of the type
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct TypeIdentity {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl TypeIdentity {
    pub fn plural(&self) -> String {
        self.kind.to_lowercase() + "s"
    }

    /// cluster-qualified name under which the definition is registered
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.plural(), self.group)
    }

    /// returns the dynamic type descriptor used to watch instances of the
    /// type through [`kube::core::DynamicObject`]
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);

        ApiResource::from_gvk_with_plural(&gvk, &self.plural())
    }
}

impl Display for TypeIdentity {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

// -----------------------------------------------------------------------------
// helpers

/// derive the kind of the resource type by title-casing the concatenated
/// service and plan names and stripping hyphens, so the plan name is only
/// capitalized when it follows a non-letter. The derivation is deterministic
/// but not collision-free, pairs differing only in hyphen placement, word
/// boundaries or case pattern can normalize to the same kind, and two kinds
/// differing only in case pattern share a lowercased registration name, a
/// limitation inherited from the naming scheme.
pub fn singular(service: &str, plan: &str) -> String {
    titlecase(&format!("{}{}", service, plan)).replace('-', "")
}

/// uppercase every letter that starts the string or follows a non-letter
fn titlecase(s: &str) -> String {
    let mut name = String::with_capacity(s.len());
    let mut boundary = true;

    for c in s.chars() {
        if boundary {
            name.extend(c.to_uppercase());
        } else {
            name.push(c);
        }

        boundary = !c.is_alphabetic();
    }

    name
}

/// returns the identity of the resource type derived from the given
/// (service, plan) pair
pub fn identity(service: &Service, plan: &Plan) -> TypeIdentity {
    TypeIdentity {
        group: DOMAIN.to_string(),
        version: VERSION.to_string(),
        kind: singular(&service.name, &plan.name),
    }
}

/// build the custom resource definition for the given (service, plan) pair,
/// attaching a validation schema only when the plan advertises creation
/// parameters
pub fn definition(service: &Service, plan: &Plan) -> Result<CustomResourceDefinition, Error> {
    let identity = identity(service, plan);

    let schema = match plan.creation_parameters() {
        Some(parameters) => Some(CustomResourceValidation {
            open_api_v3_schema: Some(schema::translate(parameters)?),
        }),
        None => None,
    };

    Ok(CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(identity.qualified_name()),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: identity.group.to_owned(),
            scope: SCOPE.to_string(),
            names: CustomResourceDefinitionNames {
                kind: identity.kind.to_owned(),
                list_kind: Some(format!("{}List", identity.kind)),
                plural: identity.plural(),
                singular: Some(identity.kind.to_lowercase()),
                ..Default::default()
            },
            versions: vec![CustomResourceDefinitionVersion {
                name: identity.version.to_owned(),
                served: true,
                storage: true,
                schema,
                subresources: Some(CustomResourceSubresources {
                    scale: None,
                    status: Some(CustomResourceSubresourceStatus(
                        serde_json::Value::Object(Default::default()),
                    )),
                }),
                ..Default::default()
            }],
            ..Default::default()
        },
        status: None,
    })
}

/// ensure the resource type derived from the given (service, plan) pair is
/// registered on the cluster, get-before-create and a racing concurrent
/// creation of the same definition is swallowed as a success. An already
/// registered definition is left untouched, even when the plan schema
/// changed.
pub async fn ensure(
    client: kube::Client,
    service: &Service,
    plan: &Plan,
) -> Result<TypeIdentity, Error> {
    let definition = definition(service, plan)?;
    let identity = identity(service, plan);
    let name = identity.qualified_name();
    let api: Api<CustomResourceDefinition> = Api::all(client);

    match api.get(&name).await {
        Ok(_) => {
            debug!(
                name = %name,
                "Custom resource definition is already registered"
            );
        }
        Err(err) if resource::is_not_found(&err) => {
            info!(name = %name, "Register custom resource definition");
            match api.create(&PostParams::default(), &definition).await {
                Ok(_) => {}
                Err(err) if resource::is_already_exists(&err) => {
                    debug!(
                        name = %name,
                        "Custom resource definition was registered concurrently"
                    );
                }
                Err(err) => {
                    return Err(Error::KubeClient(err));
                }
            }
        }
        Err(err) => {
            return Err(Error::KubeClient(err));
        }
    }

    Ok(identity)
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::svc::osb::catalog::{Catalog, Plan, Service};

    use super::{definition, identity, singular, DOMAIN};

    fn service(name: &str, plans: Vec<Plan>) -> Service {
        Service {
            id: "s1".to_string(),
            name: name.to_string(),
            description: None,
            plans,
        }
    }

    fn plan(name: &str) -> Plan {
        Plan {
            id: "p1".to_string(),
            name: name.to_string(),
            description: None,
            schemas: None,
        }
    }

    #[test]
    fn singular_titlecases_and_strips_hyphens() {
        assert_eq!("Dbsmall", singular("db", "small"));
        assert_eq!("MyCachedevSmall", singular("my-cache", "dev-small"));
        assert_eq!("RabbitmqsingleNode", singular("rabbitmq", "single-node"));
    }

    #[test]
    fn plan_name_is_only_capitalized_after_a_non_letter() {
        // the plan follows a letter of the service name, its first letter
        // stays lowercase, while a hyphen boundary still capitalizes
        assert_eq!("MyDbnode", singular("my-db", "node"));
        assert_eq!("DbextraSmall", singular("db", "extra-small"));
    }

    #[test]
    fn distinct_pairs_derive_distinct_names() {
        let pairs = [
            ("db", "small"),
            ("db", "large"),
            ("cache", "small"),
            ("my-db", "small"),
            ("db", "extra-small"),
        ];

        for (i, left) in pairs.iter().enumerate() {
            for right in pairs.iter().skip(i + 1) {
                assert_ne!(singular(left.0, left.1), singular(right.0, right.1));
            }
        }
    }

    #[test]
    fn identity_matches_catalog_scenario() {
        let identity = identity(&service("db", vec![plan("small")]), &plan("small"));

        assert_eq!("Dbsmall", identity.kind);
        assert_eq!("dbsmalls", identity.plural());
        assert_eq!(format!("dbsmalls.{}", DOMAIN), identity.qualified_name());
        assert_eq!("v1alpha1", identity.version);
    }

    #[test]
    fn api_resource_uses_the_derived_plural() {
        let identity = identity(&service("db", vec![]), &plan("small"));
        let resource = identity.api_resource();

        assert_eq!("Dbsmall", resource.kind);
        assert_eq!("dbsmalls", resource.plural);
        assert_eq!(DOMAIN, resource.group);
    }

    #[test]
    fn definition_without_plan_schema_has_no_validation() {
        let definition = definition(&service("db", vec![]), &plan("small"))
            .expect("definition to be built");

        assert_eq!(
            Some(format!("dbsmalls.{}", DOMAIN)),
            definition.metadata.name
        );
        assert_eq!("Cluster", definition.spec.scope);
        assert_eq!("Dbsmall", definition.spec.names.kind);
        assert_eq!(Some("DbsmallList".to_string()), definition.spec.names.list_kind);
        assert_eq!("dbsmalls", definition.spec.names.plural);
        assert_eq!(Some("dbsmall".to_string()), definition.spec.names.singular);

        let version = &definition.spec.versions[0];
        assert_eq!("v1alpha1", version.name);
        assert!(version.served);
        assert!(version.storage);
        assert!(version.schema.is_none());
        assert!(version
            .subresources
            .as_ref()
            .and_then(|subresources| subresources.status.as_ref())
            .is_some());
    }

    #[test]
    fn definition_with_plan_schema_nests_it_under_spec() {
        let payload = json!({
            "services": [{
                "id": "s1",
                "name": "db",
                "plans": [{
                    "id": "p1",
                    "name": "small",
                    "schemas": {
                        "service_instance": {
                            "create": {
                                "parameters": {
                                    "$schema": "http://json-schema.org/draft-04/schema",
                                    "type": "object",
                                    "additionalProperties": false,
                                    "properties": {"size": {"type": "string"}}
                                }
                            }
                        }
                    }
                }]
            }]
        });
        let catalog: Catalog = serde_json::from_value(payload).expect("catalog to deserialize");
        let service = &catalog.services[0];

        let definition =
            definition(service, &service.plans[0]).expect("definition to be built");

        let schema = definition.spec.versions[0]
            .schema
            .as_ref()
            .and_then(|validation| validation.open_api_v3_schema.as_ref())
            .expect("definition to carry a validation schema");
        let properties = schema
            .properties
            .as_ref()
            .expect("validation schema to have properties");
        let spec = properties.get("spec").expect("'spec' property to exist");

        assert!(spec.additional_properties.is_none());
        assert!(spec.schema.is_none());
        assert!(spec
            .properties
            .as_ref()
            .map(|properties| properties.contains_key("size"))
            .unwrap_or_default());
    }

    #[test]
    fn definition_with_malformed_plan_schema_is_an_error() {
        let mut plan = plan("small");
        plan.schemas = serde_json::from_value(json!({
            "service_instance": {"create": {"parameters": 42}}
        }))
        .expect("schemas to deserialize");

        assert!(definition(&service("db", vec![]), &plan).is_err());
    }
}
