//! # Provision module
//!
//! This module provides the structures exchanged with the service broker when
//! provisioning an instance of a plan.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::svc::cfg::Provisioning;

// -----------------------------------------------------------------------------
// ProvisionRequest structure

/// body of a provisioning request, the instance identifier is part of the
/// request path and generated anew on each attempt, there is no idempotency
/// key tying it to the originating custom resource
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct ProvisionRequest {
    #[serde(skip)]
    pub instance_id: String,
    #[serde(rename = "service_id")]
    pub service_id: String,
    #[serde(rename = "plan_id")]
    pub plan_id: String,
    #[serde(rename = "organization_guid")]
    pub organization_guid: String,
    #[serde(rename = "space_guid")]
    pub space_guid: String,
}

impl ProvisionRequest {
    /// build a request with a freshly generated instance identifier
    pub fn new(service_id: &str, plan_id: &str, provisioning: &Provisioning) -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
            service_id: service_id.to_string(),
            plan_id: plan_id.to_string(),
            organization_guid: provisioning.organization.to_owned(),
            space_guid: provisioning.space.to_owned(),
        }
    }
}

// -----------------------------------------------------------------------------
// ProvisionResponse structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ProvisionResponse {
    #[serde(rename = "dashboard_url", default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    #[serde(rename = "operation", default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

// -----------------------------------------------------------------------------
// Tests
