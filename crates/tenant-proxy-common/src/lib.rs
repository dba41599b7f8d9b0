//! Shared types for the tenant proxy
//!
//! Holds the `Tenant` custom resource that describes who owns which
//! cluster-scoped objects, plus telemetry bootstrap shared by binaries.

#![deny(missing_docs)]

pub mod crd;
pub mod telemetry;

/// API group of the tenant proxy custom resources
pub const API_GROUP: &str = "tenantproxy.io";
