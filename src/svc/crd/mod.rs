//! # Custom resource definition module
//!
//! This module provides the broker custom resource managed by the operator
//! and the reconciliation loops, the static one watching brokers and the
//! dynamic ones watching instances of the types registered from a catalog.

pub mod broker;
pub mod instance;
