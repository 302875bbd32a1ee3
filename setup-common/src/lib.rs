//! Shared types for the edge cluster setup backend
//!
//! Everything in here crosses the wire between the setup wizard UI and the
//! backend, or is needed by both sides to agree on cluster hostnames.

pub mod domains;
pub mod lenient;
pub mod types;
pub mod validation;

pub use domains::ClusterDomains;
pub use types::{
    ChangeDomainRequest, ChangeStaticIpsRequest, ComponentRoute, Host, HostRole, Interface,
    Ipv4Address, Ipv4Config, JsonPatchOp, PatchOp, SecretReference, TlsCertificate,
};
pub use validation::{validate_dns_name, validate_host, HostValidationError};
