//! Custom Resource Definitions for the tenant proxy

mod tenant;

pub use tenant::{OwnerKind, OwnerSpec, RuleSpec, Tenant, TenantSpec};
