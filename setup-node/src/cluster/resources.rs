//! Partial models of the cluster resources touched by the setup backend.
//! Only the fields read or written here are modelled.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use setup_common::domains::ingress_domain_from_console_host;
use setup_common::domains::CONSOLE_ROUTE_PREFIX;
use setup_common::ComponentRoute;
use std::collections::BTreeMap;

use crate::certs::PemEncoding;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
}

impl ObjectMeta {
    pub fn name_or_default(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

/// `items` of a list response
#[derive(Debug, Clone, Deserialize)]
pub struct List<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// `ingresses.config.openshift.io/cluster`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngressConfig {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<IngressSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_routes: Option<Vec<ComponentRoute>>,
}

/// Domain and component routes currently stored in the Ingress config
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterDomainState {
    pub ingress_domain: Option<String>,
    pub component_routes: Vec<ComponentRoute>,
}

impl ClusterDomainState {
    /// Use `spec.domain`, falling back to the console component route hostname
    pub fn from_ingress(ingress: &IngressConfig) -> Self {
        let spec = ingress.spec.clone().unwrap_or_default();
        let component_routes = spec.component_routes.unwrap_or_default();

        let ingress_domain = spec.domain.filter(|d| !d.is_empty()).or_else(|| {
            component_routes
                .iter()
                .filter(|route| route.hostname.starts_with(CONSOLE_ROUTE_PREFIX))
                .find_map(|route| ingress_domain_from_console_host(&route.hostname))
                .map(str::to_string)
        });

        Self {
            ingress_domain,
            component_routes,
        }
    }
}

/// `routes.route.openshift.io`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<RouteSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Route {
    pub fn host(&self) -> Option<&str> {
        self.spec.as_ref().and_then(|s| s.host.as_deref())
    }
}

/// `kubernetes.io/tls` Secret as created from a certificate bundle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSecret {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub metadata: ObjectMeta,
    #[serde(rename = "type")]
    pub secret_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<&'static str, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_data: Option<BTreeMap<&'static str, String>>,
}

impl TlsSecret {
    /// Base64 input goes to `data` untouched, plain PEM to `stringData`
    pub fn new(namespace: &str, name_prefix: &str, cert: String, key: String, encoding: PemEncoding) -> Self {
        let mut pair = BTreeMap::new();
        pair.insert("tls.crt", cert);
        pair.insert("tls.key", key);
        let (data, string_data) = match encoding {
            PemEncoding::Base64 => (Some(pair), None),
            PemEncoding::Plain => (None, Some(pair)),
        };

        Self {
            api_version: "v1",
            kind: "Secret",
            metadata: ObjectMeta {
                generate_name: Some(name_prefix.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            secret_type: "kubernetes.io/tls",
            data,
            string_data,
        }
    }
}

/// `oauthclients.oauth.openshift.io`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthClient {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, rename = "redirectURIs")]
    pub redirect_uris: Option<Vec<String>>,
}

/// `nodenetworkconfigurationpolicies.nmstate.io`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkConfigurationPolicy {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: NncpSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NncpSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    pub desired_state: DesiredState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    pub interfaces: Vec<NncpInterface>,
    #[serde(rename = "dns-resolver", default, skip_serializing_if = "Option::is_none")]
    pub dns_resolver: Option<DnsResolver>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<RouteConfigList>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NncpInterface {
    pub name: String,
    pub state: String,
    pub ipv4: NncpIpv4,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NncpIpv4 {
    pub address: Vec<NncpAddress>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NncpAddress {
    pub ip: String,
    #[serde(rename = "prefix-length")]
    pub prefix_length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsResolver {
    pub config: DnsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsConfig {
    pub server: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfigList {
    pub config: Vec<NnRouteConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NnRouteConfig {
    pub destination: String,
    pub metric: u32,
    #[serde(rename = "next-hop-address")]
    pub next_hop_address: String,
    #[serde(rename = "next-hop-interface")]
    pub next_hop_interface: String,
}

/// `message` of a Kubernetes `Status` body, if any
pub fn status_message(body: Option<&Value>) -> String {
    body.and_then(|b| b.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_domain_state_prefers_spec_domain() {
        let ingress: IngressConfig = serde_json::from_value(json!({
            "metadata": {"name": "cluster"},
            "spec": {
                "domain": "apps.old.io",
                "componentRoutes": [{
                    "name": "console",
                    "namespace": "openshift-console",
                    "hostname": "console-openshift-console.apps.other.io",
                    "servingCertKeyPairSecret": {"name": "console-secret-x"}
                }]
            }
        }))
        .unwrap();

        let state = ClusterDomainState::from_ingress(&ingress);
        assert_eq!(state.ingress_domain.as_deref(), Some("apps.old.io"));
        assert_eq!(state.component_routes.len(), 1);
    }

    #[test]
    fn test_domain_state_falls_back_to_console_route() {
        let ingress: IngressConfig = serde_json::from_value(json!({
            "spec": {
                "componentRoutes": [{
                    "name": "console",
                    "namespace": "openshift-console",
                    "hostname": "console-openshift-console.apps.old.io",
                    "servingCertKeyPairSecret": {"name": "console-secret-x"}
                }]
            }
        }))
        .unwrap();

        let state = ClusterDomainState::from_ingress(&ingress);
        assert_eq!(state.ingress_domain.as_deref(), Some("apps.old.io"));
    }

    #[test]
    fn test_domain_state_without_spec() {
        let state = ClusterDomainState::from_ingress(&IngressConfig::default());
        assert_eq!(state, ClusterDomainState::default());
    }

    #[test]
    fn test_tls_secret_shape() {
        let secret = TlsSecret::new("openshift-config", "api-secret-", "CERT".into(), "KEY".into(), PemEncoding::Plain);
        let value = serde_json::to_value(&secret).unwrap();
        assert_eq!(value["type"], "kubernetes.io/tls");
        assert_eq!(value["metadata"]["generateName"], "api-secret-");
        assert_eq!(value["stringData"]["tls.key"], "KEY");
        assert!(value.get("data").is_none());
    }

    #[test]
    fn test_tls_secret_keeps_base64_in_data() {
        let secret = TlsSecret::new(
            "openshift-config",
            "console-secret-",
            "LS0tLS1CRUdJTg==".into(),
            "LS0tLS1LRVk=".into(),
            PemEncoding::Base64,
        );
        let value = serde_json::to_value(&secret).unwrap();
        assert_eq!(value["data"]["tls.crt"], "LS0tLS1CRUdJTg==");
        assert_eq!(value["data"]["tls.key"], "LS0tLS1LRVk=");
        assert!(value.get("stringData").is_none());
    }

    #[test]
    fn test_status_message() {
        let body = json!({"kind": "Status", "message": "forbidden"});
        assert_eq!(status_message(Some(&body)), "forbidden");
        assert_eq!(status_message(None), "");
    }
}
