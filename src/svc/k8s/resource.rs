//! # Resource module
//!
//! This module provides helpers on kubernetes [`Resource`]

use kube::{Resource, ResourceExt};

// -----------------------------------------------------------------------------
// Helpers functions

/// returns if the resource is considered from kubernetes point of view as
/// deleted
pub fn deleted<T>(obj: &T) -> bool
where
    T: Resource,
{
    obj.meta().deletion_timestamp.is_some()
}

/// returns the namespace and name of the kubernetes resource, the namespace
/// defaults to the empty string for cluster-scoped resources
pub fn namespaced_name<T>(obj: &T) -> (String, String)
where
    T: ResourceExt,
{
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

/// returns whether the given error is a 'NotFound' response from the
/// kubernetes api
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

/// returns whether the given error is an 'AlreadyExists' response from the
/// kubernetes api
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}

// -----------------------------------------------------------------------------
// Tests
