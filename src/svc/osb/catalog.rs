//! # Catalog module
//!
//! This module provides the structures returned by the catalog endpoint of a
//! service broker, a list of services each offering a list of plans. The
//! catalog is an ephemeral snapshot, it is never persisted by the operator.

use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------------
// Catalog structure

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Catalog {
    #[serde(rename = "services", default)]
    pub services: Vec<Service>,
}

// -----------------------------------------------------------------------------
// Service structure

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Service {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "plans", default)]
    pub plans: Vec<Plan>,
}

// -----------------------------------------------------------------------------
// Plan structure

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
pub struct Plan {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "schemas", default, skip_serializing_if = "Option::is_none")]
    pub schemas: Option<Schemas>,
}

impl Plan {
    /// returns the json schema describing the parameters accepted when an
    /// instance of this plan is created, if the broker advertises one
    pub fn creation_parameters(&self) -> Option<&serde_json::Value> {
        self.schemas
            .as_ref()?
            .service_instance
            .as_ref()?
            .create
            .as_ref()?
            .parameters
            .as_ref()
    }
}

// -----------------------------------------------------------------------------
// Schemas structures

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct Schemas {
    #[serde(
        rename = "service_instance",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_instance: Option<ServiceInstanceSchema>,
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct ServiceInstanceSchema {
    #[serde(rename = "create", default, skip_serializing_if = "Option::is_none")]
    pub create: Option<InputParametersSchema>,
}

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug, Default)]
pub struct InputParametersSchema {
    #[serde(rename = "parameters", default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// -----------------------------------------------------------------------------
// Tests
