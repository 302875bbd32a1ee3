//! Hostname layout of an OpenShift cluster for a given base domain

/// Route prefix of the setup UI itself
pub const SETUP_UI_ROUTE_PREFIX: &str = "edge-cluster-setup";
/// Route prefix of the OAuth server
pub const OAUTH_ROUTE_PREFIX: &str = "oauth-openshift";
/// Route prefix of the web console
pub const CONSOLE_ROUTE_PREFIX: &str = "console-openshift-console";

pub fn api_domain(suffix: &str) -> String {
    format!("api.{suffix}")
}

pub fn ingress_domain(suffix: &str) -> String {
    format!("apps.{suffix}")
}

/// All hostnames derived from one cluster domain suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDomains {
    pub suffix: String,
    pub api: String,
    pub ingress: String,
    pub console: String,
    pub oauth: String,
    pub setup_ui: String,
}

impl ClusterDomains {
    pub fn for_suffix(suffix: &str) -> Self {
        let ingress = ingress_domain(suffix);
        Self {
            suffix: suffix.to_string(),
            api: api_domain(suffix),
            console: format!("{CONSOLE_ROUTE_PREFIX}.{ingress}"),
            oauth: format!("{OAUTH_ROUTE_PREFIX}.{ingress}"),
            setup_ui: format!("{SETUP_UI_ROUTE_PREFIX}.{ingress}"),
            ingress,
        }
    }
}

/// Recover the ingress domain from a console route hostname
///
/// `console-openshift-console.apps.example.com` yields `apps.example.com`.
pub fn ingress_domain_from_console_host(hostname: &str) -> Option<&str> {
    hostname
        .strip_prefix(CONSOLE_ROUTE_PREFIX)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|rest| !rest.is_empty())
}

/// Move `host` from the old ingress domain to the new one
///
/// Returns `None` when the host does not live under `old_ingress` (on a label
/// boundary) or when nothing would change.
pub fn rehost(host: &str, old_ingress: &str, new_ingress: &str) -> Option<String> {
    if old_ingress.is_empty() || old_ingress == new_ingress {
        return None;
    }

    let prefix = if host == old_ingress {
        ""
    } else {
        host.strip_suffix(old_ingress)?.strip_suffix('.')?
    };

    if prefix.is_empty() {
        Some(new_ingress.to_string())
    } else {
        Some(format!("{prefix}.{new_ingress}"))
    }
}
