//! # Schema module
//!
//! This module translates the json schema attached to a broker plan into the
//! validation schema of a custom resource definition.

use std::collections::BTreeMap;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::JSONSchemaProps;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to translate plan parameters into a validation schema, {0}")]
    Translate(serde_json::Error),
}

// -----------------------------------------------------------------------------
// helpers

/// translate the creation parameters schema of a plan into the validation
/// schema of a custom resource, the plan schema is nested under a single
/// `spec` property, the `additionalProperties` flag and the `$schema` uri are
/// stripped as the kubernetes api rejects them.
///
/// A plan schema that cannot be round-tripped through [`JSONSchemaProps`] is
/// malformed broker data and surfaces as an [`Error`] to the caller.
pub fn translate(parameters: &serde_json::Value) -> Result<JSONSchemaProps, Error> {
    let mut props: JSONSchemaProps =
        serde_json::from_value(parameters.to_owned()).map_err(Error::Translate)?;

    props.additional_properties = None;
    props.schema = None;

    Ok(JSONSchemaProps {
        properties: Some(BTreeMap::from([("spec".to_string(), props)])),
        ..Default::default()
    })
}

// -----------------------------------------------------------------------------
// Tests
