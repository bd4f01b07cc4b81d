//! # Service module
//!
//! This module exposes services used across the operator, the configuration,
//! the open service broker client, kubernetes helpers and the custom
//! resources with their reconciliation loops.

pub mod cfg;
pub mod crd;
pub mod k8s;
pub mod osb;
