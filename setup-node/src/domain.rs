//! Cluster domain change.
//!
//! The migration is an ordered list of [`DomainStep`]s run against the
//! cluster API without any transaction. A [`StepPolicy::FailFast`] step
//! aborts the run on error and leaves whatever was already written in place;
//! a [`StepPolicy::BestEffort`] step only logs.

use futures::future::join_all;
use metrics::counter;
use serde_json::{json, Value};
use setup_common::domains::SETUP_UI_ROUTE_PREFIX;
use setup_common::{validate_dns_name, ChangeDomainRequest, ClusterDomains, ComponentRoute, JsonPatchOp, TlsCertificate};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::certs::{create_tls_secret, CertificateBundle, CertificateIssuer};
use crate::cluster::resources::{ClusterDomainState, IngressConfig, OAuthClient, Route};
use crate::cluster::{PatchBody, ResourceClient, ResourceKind, ResourceRef};
use crate::config::DomainConfig;
use crate::error::{Result, SetupError};

const CLUSTER: &str = "cluster";
const CONSOLE_NAMESPACE: &str = "openshift-console";
const OAUTH_NAMESPACE: &str = "openshift-authentication";
const API_SECRET_PREFIX: &str = "api-secret-";

/// What happens to the migration when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    FailFast,
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainStep {
    ValidateInput,
    ReadIngress,
    IssueApiCertificate,
    IssueComponentCertificates,
    RehostRoutes,
    PatchIngress,
    PatchApiServer,
    RefreshSetupUi,
}

impl DomainStep {
    /// Execution order of a domain change
    pub const ORDER: [DomainStep; 8] = [
        DomainStep::ValidateInput,
        DomainStep::ReadIngress,
        DomainStep::IssueApiCertificate,
        DomainStep::IssueComponentCertificates,
        DomainStep::RehostRoutes,
        DomainStep::PatchIngress,
        DomainStep::PatchApiServer,
        DomainStep::RefreshSetupUi,
    ];

    pub fn policy(&self) -> StepPolicy {
        match self {
            DomainStep::RehostRoutes | DomainStep::RefreshSetupUi => StepPolicy::BestEffort,
            _ => StepPolicy::FailFast,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainStep::ValidateInput => "validate-input",
            DomainStep::ReadIngress => "read-ingress",
            DomainStep::IssueApiCertificate => "issue-api-certificate",
            DomainStep::IssueComponentCertificates => "issue-component-certificates",
            DomainStep::RehostRoutes => "rehost-routes",
            DomainStep::PatchIngress => "patch-ingress",
            DomainStep::PatchApiServer => "patch-apiserver",
            DomainStep::RefreshSetupUi => "refresh-setup-ui",
        }
    }
}

/// Result of a successful domain change request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainChangeOutcome {
    /// The Ingress config already carries the requested domain
    Unchanged,
    Migrated {
        routes_rehosted: usize,
        routes_failed: usize,
    },
}

enum Flow {
    Continue,
    Finished,
}

/// Ingress component route rewritten by the migration
struct ComponentTarget {
    name: &'static str,
    namespace: String,
    hostname: String,
    secret_prefix: &'static str,
}

/// State threaded through the steps of one run
struct MigrationContext<'a> {
    token: &'a str,
    requested: Option<&'a str>,
    custom_certs: &'a HashMap<String, TlsCertificate>,
    domains: Option<ClusterDomains>,
    ingress: IngressConfig,
    old_ingress_domain: Option<String>,
    component_routes: Vec<ComponentRoute>,
    api_server_patch: Option<Value>,
    routes_rehosted: usize,
    routes_failed: usize,
}

impl MigrationContext<'_> {
    fn domains(&self) -> Result<&ClusterDomains> {
        self.domains
            .as_ref()
            .ok_or_else(|| SetupError::Other("Cluster domains not derived yet".to_string()))
    }
}

/// Update-or-append `route` by name
pub fn upsert_component_route(mut routes: Vec<ComponentRoute>, route: ComponentRoute) -> Vec<ComponentRoute> {
    match routes.iter_mut().find(|r| r.name == route.name) {
        Some(existing) => {
            existing.hostname = route.hostname;
            existing.serving_cert_key_pair_secret = route.serving_cert_key_pair_secret;
        }
        None => routes.push(route),
    }
    routes
}

/// JSON patch setting `spec.domain` and `spec.componentRoutes` of the Ingress config
pub fn ingress_patch(ingress: &IngressConfig, domain: &str, routes: &[ComponentRoute]) -> Vec<JsonPatchOp> {
    match &ingress.spec {
        None => vec![JsonPatchOp::add(
            "/spec",
            json!({ "domain": domain, "componentRoutes": routes }),
        )],
        Some(spec) => vec![
            JsonPatchOp::upsert(spec.domain.is_some(), "/spec/domain", json!(domain)),
            JsonPatchOp::upsert(
                spec.component_routes.is_some(),
                "/spec/componentRoutes",
                json!(routes),
            ),
        ],
    }
}

/// Merge patch pointing the API server at a single named certificate.
///
/// Replaces any `namedCertificates` already configured.
pub fn api_server_patch(api_domain: &str, secret_name: &str) -> Value {
    json!({
        "spec": {
            "servingCerts": {
                "namedCertificates": [{
                    "names": [api_domain],
                    "servingCertificate": { "name": secret_name }
                }]
            }
        }
    })
}

/// Orchestrates the change of the cluster's public domain
pub struct DomainMigration {
    client: Arc<ResourceClient>,
    issuer: Arc<dyn CertificateIssuer>,
    config: DomainConfig,
    secret_namespace: String,
}

impl DomainMigration {
    pub fn new(
        client: Arc<ResourceClient>,
        issuer: Arc<dyn CertificateIssuer>,
        config: DomainConfig,
        secret_namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            issuer,
            config,
            secret_namespace: secret_namespace.into(),
        }
    }

    /// Run the full migration for `request.domain`
    #[instrument(skip_all, fields(run_id = %Uuid::new_v4(), domain = tracing::field::Empty))]
    pub async fn change_domain(&self, token: &str, request: &ChangeDomainRequest) -> Result<DomainChangeOutcome> {
        let mut ctx = MigrationContext {
            token,
            requested: request.domain.as_deref(),
            custom_certs: &request.custom_certs,
            domains: None,
            ingress: IngressConfig::default(),
            old_ingress_domain: None,
            component_routes: Vec::new(),
            api_server_patch: None,
            routes_rehosted: 0,
            routes_failed: 0,
        };

        for step in DomainStep::ORDER {
            debug!(step = step.name(), "Running domain change step");
            match self.run_step(step, &mut ctx).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finished) => {
                    counter!("setup_domain_changes_total", 1, "outcome" => "unchanged");
                    return Ok(DomainChangeOutcome::Unchanged);
                }
                Err(e) if step.policy() == StepPolicy::BestEffort => {
                    warn!(step = step.name(), error = %e, "Best-effort step failed, continuing");
                }
                Err(e) => {
                    error!(step = step.name(), error = %e, "Domain change aborted");
                    counter!("setup_domain_changes_total", 1, "outcome" => "failed");
                    return Err(e);
                }
            }
        }

        counter!("setup_domain_changes_total", 1, "outcome" => "migrated");
        info!(
            routes_rehosted = ctx.routes_rehosted,
            routes_failed = ctx.routes_failed,
            "Cluster domain changed"
        );
        Ok(DomainChangeOutcome::Migrated {
            routes_rehosted: ctx.routes_rehosted,
            routes_failed: ctx.routes_failed,
        })
    }

    async fn run_step(&self, step: DomainStep, ctx: &mut MigrationContext<'_>) -> Result<Flow> {
        match step {
            DomainStep::ValidateInput => self.validate_input(ctx),
            DomainStep::ReadIngress => self.read_ingress(ctx).await,
            DomainStep::IssueApiCertificate => self.issue_api_certificate(ctx).await,
            DomainStep::IssueComponentCertificates => self.issue_component_certificates(ctx).await,
            DomainStep::RehostRoutes => self.rehost_routes(ctx).await,
            DomainStep::PatchIngress => self.patch_ingress(ctx).await,
            DomainStep::PatchApiServer => self.patch_api_server(ctx).await,
            DomainStep::RefreshSetupUi => self.refresh_setup_ui(ctx).await,
        }
    }

    fn validate_input(&self, ctx: &mut MigrationContext<'_>) -> Result<Flow> {
        let suffix = match ctx.requested {
            Some(suffix) if validate_dns_name(suffix) => suffix,
            Some(suffix) => {
                return Err(SetupError::InvalidInput(format!("Invalid domain: {}", suffix)));
            }
            None => return Err(SetupError::InvalidInput("Missing domain".to_string())),
        };

        Span::current().record("domain", suffix);
        ctx.domains = Some(ClusterDomains::for_suffix(suffix));
        Ok(Flow::Continue)
    }

    async fn read_ingress(&self, ctx: &mut MigrationContext<'_>) -> Result<Flow> {
        let ingress: IngressConfig = self
            .client
            .get(ctx.token, &ResourceRef::cluster(ResourceKind::IngressConfig, CLUSTER))
            .await?;
        let state = ClusterDomainState::from_ingress(&ingress);
        let new_ingress = &ctx.domains()?.ingress;

        if state.ingress_domain.as_deref() == Some(new_ingress.as_str()) {
            info!(ingress_domain = %new_ingress, "Domain unchanged, nothing to persist");
            return Ok(Flow::Finished);
        }

        debug!(
            from = state.ingress_domain.as_deref().unwrap_or_default(),
            to = %new_ingress,
            "Changing ingress domain"
        );
        ctx.old_ingress_domain = state.ingress_domain;
        ctx.component_routes = state.component_routes;
        ctx.ingress = ingress;
        Ok(Flow::Continue)
    }

    /// Custom certificate for `hostname`, or a freshly issued one
    async fn certificate_for(&self, ctx: &MigrationContext<'_>, hostname: &str) -> Result<CertificateBundle> {
        if let Some(custom) = ctx.custom_certs.get(hostname) {
            debug!(hostname = %hostname, "Using provided certificate");
            return Ok(custom.clone().into());
        }

        let issuer = Arc::clone(&self.issuer);
        let hostname = hostname.to_string();
        tokio::task::spawn_blocking(move || issuer.issue(&hostname))
            .await
            .map_err(|e| SetupError::CertificateIssuance(format!("Issuer task failed: {}", e)))?
    }

    async fn create_secret_for(&self, ctx: &MigrationContext<'_>, hostname: &str, prefix: &str) -> Result<String> {
        let bundle = self.certificate_for(ctx, hostname).await?;
        create_tls_secret(&self.client, ctx.token, &self.secret_namespace, prefix, bundle).await
    }

    async fn issue_api_certificate(&self, ctx: &mut MigrationContext<'_>) -> Result<Flow> {
        let api_domain = ctx.domains()?.api.clone();
        let secret_name = self.create_secret_for(ctx, &api_domain, API_SECRET_PREFIX).await?;
        ctx.api_server_patch = Some(api_server_patch(&api_domain, &secret_name));
        Ok(Flow::Continue)
    }

    fn component_targets(&self, domains: &ClusterDomains) -> [ComponentTarget; 3] {
        [
            ComponentTarget {
                name: "console",
                namespace: CONSOLE_NAMESPACE.to_string(),
                hostname: domains.console.clone(),
                secret_prefix: "console-secret-",
            },
            ComponentTarget {
                name: "oauth-openshift",
                namespace: OAUTH_NAMESPACE.to_string(),
                hostname: domains.oauth.clone(),
                secret_prefix: "oauth-secret-",
            },
            ComponentTarget {
                name: SETUP_UI_ROUTE_PREFIX,
                namespace: self.config.setup_ui_namespace.clone(),
                hostname: domains.setup_ui.clone(),
                secret_prefix: "setup-ui-secret-",
            },
        ]
    }

    async fn issue_component_certificates(&self, ctx: &mut MigrationContext<'_>) -> Result<Flow> {
        let targets = self.component_targets(ctx.domains()?);

        for target in targets {
            let secret_name = self
                .create_secret_for(ctx, &target.hostname, target.secret_prefix)
                .await?;
            let route = ComponentRoute::new(target.name, target.namespace, target.hostname, secret_name);
            ctx.component_routes = upsert_component_route(std::mem::take(&mut ctx.component_routes), route);
        }

        Ok(Flow::Continue)
    }

    async fn rehost_routes(&self, ctx: &mut MigrationContext<'_>) -> Result<Flow> {
        let Some(old_ingress) = ctx.old_ingress_domain.clone() else {
            debug!("No previous ingress domain, skipping route rehost");
            return Ok(Flow::Continue);
        };
        let new_ingress = ctx.domains()?.ingress.clone();

        let routes: Vec<Route> = self.client.list(ctx.token, ResourceKind::Route).await?;
        let token = ctx.token;

        let patches = routes.iter().filter_map(|route| {
            let host = route.host()?;
            let new_host = setup_common::domains::rehost(host, &old_ingress, &new_ingress)?;
            let namespace = route.metadata.namespace.clone().unwrap_or_default();
            let target = ResourceRef::namespaced(ResourceKind::Route, namespace, route.metadata.name_or_default());
            Some(async move {
                let patch = PatchBody::Json(vec![JsonPatchOp::replace("/spec/host", json!(new_host))]);
                let outcome = self.client.patch(token, &target, &patch).await;
                (target, new_host, outcome)
            })
        });

        for (target, new_host, outcome) in join_all(patches).await {
            match outcome {
                Ok(result) if result.is_success() => {
                    debug!(route = %target, host = %new_host, "Route rehosted");
                    ctx.routes_rehosted += 1;
                }
                Ok(result) => {
                    warn!(route = %target, status = result.status_code, message = %result.message(), "Failed to rehost route");
                    ctx.routes_failed += 1;
                }
                Err(e) => {
                    warn!(route = %target, error = %e, "Failed to rehost route");
                    ctx.routes_failed += 1;
                }
            }
        }

        if ctx.routes_failed > 0 {
            counter!("setup_route_rehost_failures_total", ctx.routes_failed as u64);
        }
        Ok(Flow::Continue)
    }

    async fn patch_ingress(&self, ctx: &mut MigrationContext<'_>) -> Result<Flow> {
        let ops = ingress_patch(&ctx.ingress, &ctx.domains()?.ingress, &ctx.component_routes);
        let result = self
            .client
            .patch(
                ctx.token,
                &ResourceRef::cluster(ResourceKind::IngressConfig, CLUSTER),
                &PatchBody::Json(ops),
            )
            .await?;

        if !result.is_success() {
            return Err(SetupError::PatchFailed {
                resource: "Ingress cluster resource".to_string(),
                status: result.status_code,
                message: result.message(),
            });
        }
        debug!("Ingress config patched");
        Ok(Flow::Continue)
    }

    async fn patch_api_server(&self, ctx: &mut MigrationContext<'_>) -> Result<Flow> {
        let patch = ctx
            .api_server_patch
            .take()
            .ok_or_else(|| SetupError::Other("ApiServer patch was not prepared".to_string()))?;
        let result = self
            .client
            .patch(
                ctx.token,
                &ResourceRef::cluster(ResourceKind::ApiServerConfig, CLUSTER),
                &PatchBody::Merge(patch),
            )
            .await?;

        if !result.is_success() {
            return Err(SetupError::PatchFailed {
                resource: "ApiServer cluster resource".to_string(),
                status: result.status_code,
                message: result.message(),
            });
        }
        debug!("ApiServer config patched");
        Ok(Flow::Continue)
    }

    /// Point the setup UI login at its new hostname. Restarts the UI pod.
    async fn refresh_setup_ui(&self, ctx: &mut MigrationContext<'_>) -> Result<Flow> {
        if !self.config.refresh_setup_ui {
            return Ok(Flow::Continue);
        }
        let setup_ui_host = ctx.domains()?.setup_ui.clone();
        let redirect_uri = format!("https://{}/login/callback", setup_ui_host);

        if let Err(e) = self.update_oauth_redirect(ctx.token, &redirect_uri).await {
            warn!(error = %e, "Failed to update setup UI OAuthClient");
        }
        self.update_setup_ui_deployment(ctx.token, &setup_ui_host, &redirect_uri)
            .await?;
        Ok(Flow::Continue)
    }

    async fn update_oauth_redirect(&self, token: &str, redirect_uri: &str) -> Result<()> {
        let target = ResourceRef::cluster(ResourceKind::OAuthClient, self.config.setup_ui_oauth_client.as_str());
        let client: OAuthClient = self.client.get(token, &target).await?;

        let exists = client.redirect_uris.is_some();
        let mut uris = client.redirect_uris.unwrap_or_default();
        if uris.iter().any(|u| u == redirect_uri) {
            debug!(redirect_uri = %redirect_uri, "OAuthClient already has redirect URI");
            return Ok(());
        }
        uris.push(redirect_uri.to_string());

        let patch = PatchBody::Json(vec![JsonPatchOp::upsert(exists, "/redirectURIs", json!(uris))]);
        let result = self.client.patch(token, &target, &patch).await?;
        if !result.is_success() {
            return Err(SetupError::PatchFailed {
                resource: target.to_string(),
                status: result.status_code,
                message: result.message(),
            });
        }
        debug!(redirect_uri = %redirect_uri, "Setup UI OAuthClient patched");
        Ok(())
    }

    async fn update_setup_ui_deployment(&self, token: &str, setup_ui_host: &str, redirect_uri: &str) -> Result<()> {
        let target = ResourceRef::namespaced(
            ResourceKind::Deployment,
            self.config.setup_ui_namespace.as_str(),
            self.config.setup_ui_deployment.as_str(),
        );
        let mut deployment: Value = self.client.get(token, &target).await?;

        let containers = deployment
            .pointer_mut("/spec/template/spec/containers")
            .filter(|c| c.is_array())
            .ok_or_else(|| SetupError::Other(format!("{} has no containers", target)))?;

        let frontend_url = format!("https://{}", setup_ui_host);
        let env = containers
            .pointer_mut("/0/env")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| SetupError::Other(format!("{} has no env variables", target)))?;
        for (name, value) in [("FRONTEND_URL", frontend_url.as_str()), ("OAUTH2_REDIRECT_URL", redirect_uri)] {
            match env.iter_mut().find(|e| e.get("name").and_then(Value::as_str) == Some(name)) {
                Some(entry) => entry["value"] = json!(value),
                None => warn!(variable = name, "Env variable missing in setup UI Deployment"),
            }
        }

        let patch = PatchBody::Json(vec![JsonPatchOp::replace(
            "/spec/template/spec/containers",
            containers.clone(),
        )]);
        let result = self.client.patch(token, &target, &patch).await?;
        if !result.is_success() {
            return Err(SetupError::PatchFailed {
                resource: target.to_string(),
                status: result.status_code,
                message: result.message(),
            });
        }
        debug!("Setup UI Deployment patched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, hostname: &str, secret: &str) -> ComponentRoute {
        ComponentRoute::new(name, "ns", hostname, secret)
    }

    #[test]
    fn test_step_order_and_policies() {
        assert_eq!(DomainStep::ORDER.first(), Some(&DomainStep::ValidateInput));
        let ingress = DomainStep::ORDER.iter().position(|s| *s == DomainStep::PatchIngress);
        let api_server = DomainStep::ORDER.iter().position(|s| *s == DomainStep::PatchApiServer);
        assert!(ingress < api_server);

        let best_effort: Vec<_> = DomainStep::ORDER
            .iter()
            .filter(|s| s.policy() == StepPolicy::BestEffort)
            .collect();
        assert_eq!(best_effort, vec![&DomainStep::RehostRoutes, &DomainStep::RefreshSetupUi]);
    }

    #[test]
    fn test_upsert_component_route() {
        let routes = vec![route("console", "console.apps.old.io", "old-secret")];

        let routes = upsert_component_route(routes, route("console", "console.apps.new.io", "new-secret"));
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].hostname, "console.apps.new.io");
        assert_eq!(routes[0].tls_secret_name(), "new-secret");

        let routes = upsert_component_route(routes, route("oauth-openshift", "oauth.apps.new.io", "oauth"));
        assert_eq!(routes.len(), 2);
    }

    #[test]
    fn test_ingress_patch_without_spec() {
        let ops = ingress_patch(&IngressConfig::default(), "apps.new.io", &[]);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].path, "/spec");
        assert_eq!(ops[0].value["domain"], "apps.new.io");
    }

    #[test]
    fn test_ingress_patch_op_follows_field_presence() {
        let ingress: IngressConfig = serde_json::from_value(json!({
            "spec": {"domain": "apps.old.io"}
        }))
        .unwrap();

        let ops = ingress_patch(&ingress, "apps.new.io", &[route("console", "c", "s")]);
        assert_eq!(ops[0], JsonPatchOp::replace("/spec/domain", json!("apps.new.io")));
        assert_eq!(ops[1].op, setup_common::PatchOp::Add);
        assert_eq!(ops[1].path, "/spec/componentRoutes");
    }

    #[test]
    fn test_api_server_patch_replaces_named_certificates() {
        let patch = api_server_patch("api.new.io", "api-secret-abcde");
        let named = &patch["spec"]["servingCerts"]["namedCertificates"];
        assert_eq!(named.as_array().map(Vec::len), Some(1));
        assert_eq!(named[0]["names"][0], "api.new.io");
        assert_eq!(named[0]["servingCertificate"]["name"], "api-secret-abcde");
    }
}
