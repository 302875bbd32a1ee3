use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::lenient;

/// JSON patch operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
}

/// A single RFC 6902 operation, sent as part of an ordered list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPatchOp {
    pub op: PatchOp,
    pub path: String,
    pub value: Value,
}

impl JsonPatchOp {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value,
        }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Replace,
            path: path.into(),
            value,
        }
    }

    /// `replace` when the target field already exists, `add` otherwise
    pub fn upsert(exists: bool, path: impl Into<String>, value: Value) -> Self {
        if exists {
            Self::replace(path, value)
        } else {
            Self::add(path, value)
        }
    }
}

/// Reference to a Secret by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub name: String,
}

/// Entry of the Ingress config `spec.componentRoutes` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRoute {
    pub name: String,
    pub namespace: String,
    pub hostname: String,
    pub serving_cert_key_pair_secret: SecretReference,
}

impl ComponentRoute {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        hostname: impl Into<String>,
        tls_secret_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            hostname: hostname.into(),
            serving_cert_key_pair_secret: SecretReference {
                name: tls_secret_name.into(),
            },
        }
    }

    pub fn tls_secret_name(&self) -> &str {
        &self.serving_cert_key_pair_secret.name
    }
}

/// Key pair supplied by the operator instead of a generated one.
///
/// Both fields hold base64 encoded PEM, as uploaded by the setup UI.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCertificate {
    #[serde(rename = "tls.crt")]
    pub crt: String,
    #[serde(rename = "tls.key")]
    pub key: String,
}

impl std::fmt::Debug for TlsCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsCertificate")
            .field("crt_len", &self.crt.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Body of `POST /changeDomain`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDomainRequest {
    /// New cluster domain suffix, e.g. `edge.example.com`
    #[serde(default, alias = "clusterDomain")]
    pub domain: Option<String>,
    /// Operator provided certificates keyed by the hostname they serve
    #[serde(default)]
    pub custom_certs: HashMap<String, TlsCertificate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    Control,
    #[default]
    Worker,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ipv4Address {
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub ip: String,
    /// Kept wider than a real prefix so out of range values reach validation
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub prefix_length: u32,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub gateway: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipv4Config {
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<bool>,
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub address: Option<Ipv4Address>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub ipv4: Ipv4Config,
}

impl Interface {
    /// Static address of the interface, if one is configured
    pub fn address(&self) -> Option<&Ipv4Address> {
        self.ipv4.address.as_ref()
    }
}

/// A cluster node as edited in the static IP settings page
///
/// Missing or malformed fields deserialize to empty values so that
/// structural problems surface from [`crate::validate_host`] rather than as
/// parse errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub node_name: String,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub hostname: String,
    #[serde(default, deserialize_with = "lenient::or_default", skip_serializing_if = "Option::is_none")]
    pub nncp_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::or_default")]
    pub role: HostRole,
    #[serde(default, deserialize_with = "lenient::list")]
    pub dns: Vec<String>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub interfaces: Vec<Interface>,
}

/// Body of `POST /changeStaticIps`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeStaticIpsRequest {
    #[serde(default, deserialize_with = "lenient::list")]
    pub hosts: Vec<Host>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patch_op_serialization() {
        let op = JsonPatchOp::upsert(false, "/spec/domain", json!("apps.example.com"));
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            json!({"op": "add", "path": "/spec/domain", "value": "apps.example.com"})
        );

        let op = JsonPatchOp::upsert(true, "/spec/domain", json!("apps.example.com"));
        assert_eq!(op.op, PatchOp::Replace);
    }

    #[test]
    fn test_component_route_wire_format() {
        let route = ComponentRoute::new("console", "openshift-console", "console.apps.x.io", "console-secret-abc");
        let value = serde_json::to_value(&route).unwrap();
        assert_eq!(value["servingCertKeyPairSecret"]["name"], "console-secret-abc");
        assert_eq!(route.tls_secret_name(), "console-secret-abc");
    }

    #[test]
    fn test_change_domain_request_accepts_cluster_domain_alias() {
        let request: ChangeDomainRequest =
            serde_json::from_value(json!({"clusterDomain": "edge.example.com"})).unwrap();
        assert_eq!(request.domain.as_deref(), Some("edge.example.com"));
        assert!(request.custom_certs.is_empty());
    }

    #[test]
    fn test_host_deserializes_with_missing_fields() {
        let host: Host = serde_json::from_value(json!({
            "nodeName": "master-0",
            "interfaces": [{"name": "eth0", "ipv4": {"address": {"ip": "192.168.7.10", "prefixLength": 24, "gateway": "192.168.7.1"}}}]
        }))
        .unwrap();

        assert_eq!(host.node_name, "master-0");
        assert!(host.dns.is_empty());
        assert_eq!(host.role, HostRole::Worker);
        assert_eq!(host.interfaces[0].address().map(|a| a.prefix_length), Some(24));
    }

    #[test]
    fn test_malformed_host_fields_reach_validation() {
        let request: ChangeStaticIpsRequest = serde_json::from_value(json!({"hosts": [
            {
                "nodeName": "master-0",
                "dns": ["192.168.7.1"],
                "interfaces": [{"name": "eth0", "ipv4": {"address": {"ip": "192.168.7.10", "prefixLength": 24, "gateway": "192.168.7.1"}}}]
            },
            {
                "nodeName": "worker-1",
                "role": "storage",
                "dns": ["192.168.7.1"],
                "interfaces": [{"name": "eth0", "ipv4": {"address": {"ip": "192.168.7.11", "prefixLength": 300, "gateway": "192.168.7.1"}}}]
            },
            {"nodeName": "worker-2", "dns": null},
            "garbage"
        ]}))
        .unwrap();

        assert_eq!(request.hosts.len(), 4);
        assert_eq!(crate::validate_host(&request.hosts[0]), Ok(()));
        assert_eq!(request.hosts[1].role, HostRole::Worker);
        assert!(matches!(
            crate::validate_host(&request.hosts[1]),
            Err(crate::HostValidationError::InvalidPrefix { prefix: 300, .. })
        ));
        assert!(matches!(
            crate::validate_host(&request.hosts[2]),
            Err(crate::HostValidationError::MissingDns(_))
        ));
        assert_eq!(
            crate::validate_host(&request.hosts[3]),
            Err(crate::HostValidationError::MissingNodeName)
        );
    }

    #[test]
    fn test_tls_certificate_debug_hides_key() {
        let cert = TlsCertificate {
            crt: "-----BEGIN CERTIFICATE-----".to_string(),
            key: "super-secret-key".to_string(),
        };
        let output = format!("{:?}", cert);
        assert!(!output.contains("super-secret-key"));
    }
}
