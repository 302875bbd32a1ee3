//! Edge cluster setup backend
//!
//! Applies the choices made in the setup wizard to a running cluster: the
//! public domain with its TLS certificates, and static IP settings of the
//! nodes. Every cluster call goes through a retrying transport.

pub mod api;
pub mod certs;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod error;
pub mod health;
pub mod secret;
pub mod static_ips;
pub mod telemetry;
pub mod transport;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use certs::{CertificateBundle, CertificateIssuer, OpensslIssuer};
pub use cluster::ResourceClient;
pub use config::SetupConfig;
pub use domain::{DomainChangeOutcome, DomainMigration};
pub use error::{Result, SetupError, TransportError, TransportErrorKind};
pub use health::HealthState;
pub use static_ips::{StaticIpMigration, StaticIpOutcome};
pub use transport::{ReqwestSender, RetryPolicy, RetryingTransport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_imports() {
        let _ = std::any::type_name::<SetupConfig>();
        let _ = std::any::type_name::<RetryingTransport>();
        let _ = std::any::type_name::<DomainMigration>();
        let _ = std::any::type_name::<StaticIpMigration>();
    }
}
