use serde::{Deserialize, Serialize};
use setup_common::domains::{OAUTH_ROUTE_PREFIX, SETUP_UI_ROUTE_PREFIX};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cluster::ResourceClient;
use crate::error::SetupError;
use crate::error::TransportErrorKind;
use crate::secret::Secret;

/// Process liveness as reported to the kubelet
#[derive(Debug)]
pub struct Liveness {
    live: AtomicBool,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            live: AtomicBool::new(true),
        }
    }
}

impl Liveness {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn set_dead(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            warn!("Liveness set to false");
        }
    }

    pub fn set_alive(&self) {
        if !self.live.swap(true, Ordering::SeqCst) {
            warn!("Liveness set back to true");
        }
    }
}

/// OAuth server endpoints used by the setup UI login
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthEndpoints {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

impl OAuthEndpoints {
    /// Endpoints of the OAuth route living next to the setup UI route
    pub fn from_frontend_url(frontend_url: &str) -> Self {
        let server = frontend_url
            .trim_end_matches('/')
            .replace(SETUP_UI_ROUTE_PREFIX, OAUTH_ROUTE_PREFIX);
        Self {
            authorization_endpoint: format!("{}/oauth/authorize", server),
            token_endpoint: format!("{}/oauth/token", server),
        }
    }
}

/// Memoized OAuth discovery.
///
/// Against a local frontend the cluster's well-known document is queried once;
/// in a cluster the endpoints are derived from the frontend URL, since the
/// well-known document goes stale after a domain change.
#[derive(Debug, Default)]
pub struct OAuthDiscovery {
    cell: OnceCell<OAuthEndpoints>,
}

impl OAuthDiscovery {
    pub async fn endpoints(&self, client: &ResourceClient, frontend_url: &str, liveness: &Liveness) -> &OAuthEndpoints {
        self.cell
            .get_or_init(|| async {
                if !frontend_url.starts_with("https://localhost") {
                    return OAuthEndpoints::from_frontend_url(frontend_url);
                }
                match client
                    .get_path::<OAuthEndpoints>("", "/.well-known/oauth-authorization-server")
                    .await
                {
                    Ok(endpoints) => endpoints,
                    Err(e) => {
                        error!(error = %e, "oauth-authorization-server discovery failed");
                        liveness.set_dead();
                        OAuthEndpoints::default()
                    }
                }
            })
            .await
    }
}

/// Shared state behind the liveness and readiness endpoints
pub struct HealthState {
    pub liveness: Liveness,
    pub discovery: OAuthDiscovery,
    client: Arc<ResourceClient>,
    service_account_token: Secret<String>,
    frontend_url: String,
}

impl HealthState {
    pub fn new(client: Arc<ResourceClient>, service_account_token: Secret<String>, frontend_url: impl Into<String>) -> Self {
        Self {
            liveness: Liveness::default(),
            discovery: OAuthDiscovery::default(),
            client,
            service_account_token,
            frontend_url: frontend_url.into(),
        }
    }

    /// Ping the API server with the service account token and update liveness
    pub async fn ping_api_server(&self) -> bool {
        match self.client.ping(self.service_account_token.expose_secret()).await {
            Ok(200) => {
                self.liveness.set_alive();
                debug!("API server ping succeeded");
                true
            }
            Ok(status) => {
                warn!(status, "API server ping returned non-200");
                self.liveness.set_dead();
                false
            }
            Err(SetupError::Transport(e))
                if matches!(e.kind, TransportErrorKind::NetworkError | TransportErrorKind::NotFound) =>
            {
                error!(error = %e, "Kube API server ping failed");
                self.liveness.set_dead();
                false
            }
            Err(e) => {
                error!(error = %e, "API server ping failed");
                false
            }
        }
    }

    pub async fn is_live(&self) -> bool {
        self.ping_api_server().await && self.liveness.is_live()
    }

    pub async fn is_ready(&self) -> bool {
        if !self.is_live().await {
            return false;
        }
        let endpoints = self
            .discovery
            .endpoints(&self.client, &self.frontend_url, &self.liveness)
            .await;
        !endpoints.authorization_endpoint.is_empty()
    }

    /// Periodic background ping until `shutdown` fires
    pub fn spawn_ping_loop(self: Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("API server ping loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.ping_api_server().await;
                    }
                }
            }
        })
    }
}
