use metrics::counter;
use serde_json::json;
use setup_common::{validate_host, Host, JsonPatchOp};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::cluster::resources::{
    DesiredState, DnsConfig, DnsResolver, NncpAddress, NncpInterface, NncpIpv4, NncpSpec, NnRouteConfig,
    NodeNetworkConfigurationPolicy, ObjectMeta, RouteConfigList,
};
use crate::cluster::{PatchBody, ResourceClient, ResourceKind, ResourceRef};
use crate::error::{Result, SetupError};

const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";
const DEFAULT_ROUTE_DESTINATION: &str = "0.0.0.0/0";
const DEFAULT_ROUTE_METRIC: u32 = 1000;

/// Node selector written over existing policies on patch. It matches no node,
/// so a patched policy stops applying until the selector is restored.
pub const NODE_SELECTOR_PLACEHOLDER: &str = "no-node-matches-this-placeholder";

/// Hosts handled by one successful request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticIpOutcome {
    pub patched: usize,
    pub created: usize,
}

/// nmstate desired state for the interfaces, routes and DNS of `host`
pub fn desired_state(host: &Host) -> DesiredState {
    let interfaces = host
        .interfaces
        .iter()
        .filter_map(|iface| {
            let address = iface.address()?;
            Some(NncpInterface {
                name: iface.name.clone(),
                state: "up".to_string(),
                ipv4: NncpIpv4 {
                    address: vec![NncpAddress {
                        ip: address.ip.clone(),
                        prefix_length: address.prefix_length,
                    }],
                    enabled: true,
                },
            })
        })
        .collect();

    let routes = host
        .interfaces
        .iter()
        .map(|iface| NnRouteConfig {
            destination: DEFAULT_ROUTE_DESTINATION.to_string(),
            metric: DEFAULT_ROUTE_METRIC,
            next_hop_address: iface.address().map(|a| a.gateway.clone()).unwrap_or_default(),
            next_hop_interface: iface.name.clone(),
        })
        .collect();

    let dns_resolver = (!host.dns.is_empty()).then(|| DnsResolver {
        config: DnsConfig {
            server: host.dns.clone(),
        },
    });

    DesiredState {
        interfaces,
        dns_resolver,
        routes: Some(RouteConfigList { config: routes }),
    }
}

/// New policy bound to `host.node_name` through the hostname label
pub fn policy_template(host: &Host) -> NodeNetworkConfigurationPolicy {
    let mut node_selector = BTreeMap::new();
    node_selector.insert(HOSTNAME_LABEL.to_string(), host.node_name.clone());

    NodeNetworkConfigurationPolicy {
        api_version: "nmstate.io/v1".to_string(),
        kind: "NodeNetworkConfigurationPolicy".to_string(),
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", host.node_name)),
            ..Default::default()
        },
        spec: NncpSpec {
            node_selector: Some(node_selector),
            desired_state: desired_state(host),
        },
    }
}

/// Applies static IP settings host by host.
///
/// The batch stops at the first failing host; hosts before it keep their
/// changes.
pub struct StaticIpMigration {
    client: Arc<ResourceClient>,
}

impl StaticIpMigration {
    pub fn new(client: Arc<ResourceClient>) -> Self {
        Self { client }
    }

    #[instrument(skip_all, fields(run_id = %Uuid::new_v4(), hosts = hosts.len()))]
    pub async fn change_static_ips(&self, token: &str, hosts: &[Host]) -> Result<StaticIpOutcome> {
        if hosts.is_empty() {
            return Err(SetupError::InvalidInput("No hosts provided".to_string()));
        }

        let mut outcome = StaticIpOutcome::default();
        for host in hosts {
            validate_host(host).map_err(|e| {
                error!(node = %host.node_name, error = %e, "Incorrect host, aborting batch");
                SetupError::InvalidInput(format!("Incorrect host {}: {}", host.node_name, e))
            })?;

            match host.nncp_name.as_deref().filter(|n| !n.is_empty()) {
                Some(nncp_name) => {
                    self.patch_policy(token, host, nncp_name).await?;
                    counter!("setup_static_ip_hosts_total", 1, "action" => "patched");
                    outcome.patched += 1;
                }
                None => {
                    self.create_policy(token, host).await?;
                    counter!("setup_static_ip_hosts_total", 1, "action" => "created");
                    outcome.created += 1;
                }
            }
        }

        info!(patched = outcome.patched, created = outcome.created, "Static IPs applied");
        Ok(outcome)
    }

    async fn patch_policy(&self, token: &str, host: &Host, nncp_name: &str) -> Result<()> {
        let target = ResourceRef::cluster(ResourceKind::NodeNetworkConfigurationPolicy, nncp_name);
        let state = serde_json::to_value(desired_state(host))?;
        let patch = PatchBody::Json(vec![
            // overwrites the existing selector, see NODE_SELECTOR_PLACEHOLDER
            JsonPatchOp::replace(
                "/spec/nodeSelector",
                json!({ HOSTNAME_LABEL: NODE_SELECTOR_PLACEHOLDER }),
            ),
            JsonPatchOp::replace("/spec/desiredState", state),
        ]);

        debug!(node = %host.node_name, nncp = %nncp_name, "Patching NodeNetworkConfigurationPolicy");
        let failure = match self.client.patch(token, &target, &patch).await {
            Ok(result) if result.is_success() => return Ok(()),
            Ok(result) => (result.status_code, result.message()),
            Err(e) => (e.status_code(), e.to_string()),
        };

        error!(nncp = %nncp_name, status = failure.0, message = %failure.1, "Failed to patch NodeNetworkConfigurationPolicy");
        Err(SetupError::PatchFailed {
            resource: format!("NodeNetworkConfigurationPolicy \"{}\"", nncp_name),
            status: failure.0,
            message: failure.1,
        })
    }

    async fn create_policy(&self, token: &str, host: &Host) -> Result<()> {
        let collection = ResourceRef::collection(ResourceKind::NodeNetworkConfigurationPolicy, None);
        let policy = policy_template(host);

        debug!(node = %host.node_name, "Creating NodeNetworkConfigurationPolicy");
        let result = self.client.post(token, &collection, &policy).await?;
        if !result.is_success() {
            error!(node = %host.node_name, status = result.status_code, message = %result.message(), "Failed to create NodeNetworkConfigurationPolicy");
            return Err(SetupError::CreateFailed {
                resource: format!("NodeNetworkConfigurationPolicy for {}", host.node_name),
                status: result.status_code,
                message: result.message(),
            });
        }

        info!(
            node = %host.node_name,
            nncp = result.object_name().unwrap_or_default(),
            "NodeNetworkConfigurationPolicy created"
        );
        Ok(())
    }
}
