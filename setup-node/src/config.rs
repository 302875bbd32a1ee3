use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, SetupError};
use crate::secret::Secret;
use crate::transport::RetryPolicy;

/// Main configuration of the setup backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupConfig {
    /// HTTP listener
    pub server: ServerConfig,
    /// Cluster API access
    pub cluster: ClusterConfig,
    /// Default retry policy for cluster API calls
    pub retry: RetryPolicy,
    /// Self-signed certificate generation
    pub certificates: CertificateConfig,
    /// Domain change behavior
    pub domain: DomainConfig,
    /// Metrics and monitoring
    pub metrics: MetricsConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the API listens on
    pub listen_addr: String,
    /// Allowed CORS origin for a UI served from elsewhere
    pub cors_origin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Base URL of the Kubernetes API, e.g. https://kubernetes.default.svc:443
    pub api_url: String,
    /// Mounted service account token used for liveness pings
    pub service_account_token_file: PathBuf,
    /// Skip TLS verification of the cluster API
    pub accept_invalid_certs: bool,
    /// Per-attempt request timeout in seconds
    pub request_timeout_seconds: u64,
    /// Interval of the background API server ping in seconds
    pub ping_interval_seconds: u64,
    /// Public URL of the setup UI
    pub frontend_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateConfig {
    /// Path of the openssl binary
    pub openssl_path: PathBuf,
    /// Validity of generated certificates
    pub validity_days: u32,
    /// RSA key size
    pub key_bits: u32,
    /// Namespace receiving the generated TLS secrets
    pub secret_namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Namespace of the setup UI
    pub setup_ui_namespace: String,
    /// Deployment running the setup UI
    pub setup_ui_deployment: String,
    /// OAuthClient used by the setup UI login
    pub setup_ui_oauth_client: String,
    /// Update the setup UI OAuthClient and Deployment after a domain change
    pub refresh_setup_ui: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Prometheus exporter listen address
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// `text` or `json`
    pub format: String,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "0.0.0.0:3001".to_string(),
                cors_origin: None,
            },
            cluster: ClusterConfig {
                api_url: "https://kubernetes.default.svc:443".to_string(),
                service_account_token_file: PathBuf::from(
                    "/var/run/secrets/kubernetes.io/serviceaccount/token",
                ),
                accept_invalid_certs: true,
                request_timeout_seconds: 30,
                ping_interval_seconds: 30,
                frontend_url: "https://localhost:3000".to_string(),
            },
            retry: RetryPolicy::default(),
            certificates: CertificateConfig {
                openssl_path: PathBuf::from("/usr/bin/openssl"),
                validity_days: 3650,
                key_bits: 2048,
                secret_namespace: "openshift-config".to_string(),
            },
            domain: DomainConfig {
                setup_ui_namespace: "edge-cluster-setup".to_string(),
                setup_ui_deployment: "edge-cluster-setup".to_string(),
                setup_ui_oauth_client: "edge-cluster-setup".to_string(),
                refresh_setup_ui: true,
            },
            metrics: MetricsConfig {
                enabled: false,
                listen_addr: "0.0.0.0:9090".to_string(),
            },
            logging: LoggingConfig {
                level: "setup_node=info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl SetupConfig {
    /// Load configuration from file, with `SETUP__SECTION__KEY` environment overrides
    pub fn from_file(path: &str) -> std::result::Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SETUP").separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let toml_string =
            toml::to_string_pretty(self).map_err(|e| SetupError::Serialization(e.to_string()))?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()
            .map_err(|e| SetupError::Config(format!("Invalid listen address: {}", e)))?;

        if !self.cluster.api_url.starts_with("http://") && !self.cluster.api_url.starts_with("https://") {
            return Err(SetupError::Config(format!(
                "Cluster API URL must be http(s): {}",
                self.cluster.api_url
            )));
        }

        if self.cluster.request_timeout_seconds == 0 {
            return Err(SetupError::Config("Request timeout cannot be 0".to_string()));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(SetupError::Config(
                "Retry backoff multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.certificates.validity_days == 0 {
            return Err(SetupError::Config("Certificate validity cannot be 0 days".to_string()));
        }

        if self.certificates.secret_namespace.is_empty() {
            return Err(SetupError::Config("TLS secret namespace cannot be empty".to_string()));
        }

        if self.metrics.enabled {
            self.metrics
                .listen_addr
                .parse::<SocketAddr>()
                .map_err(|e| SetupError::Config(format!("Invalid metrics address: {}", e)))?;
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        self.server.listen_addr.parse()
    }
}

impl ClusterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }

    /// Service account token from the mounted file, falling back to `TOKEN`
    pub fn service_account_token(&self) -> Result<Secret<String>> {
        Secret::from_file(&self.service_account_token_file).or_else(|e| {
            warn!(error = %e, "Service account token file unavailable, trying TOKEN");
            Secret::from_env("TOKEN")
        })
    }
}
