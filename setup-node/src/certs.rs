use setup_common::TlsCertificate;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, error, info};

use crate::cluster::resources::TlsSecret;
use crate::cluster::{ResourceClient, ResourceKind, ResourceRef};
use crate::config::CertificateConfig;
use crate::error::{Result, SetupError};
use crate::secret::Secret;

/// Form in which a bundle carries its key pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemEncoding {
    /// PEM text, stored through the Secret's `stringData`
    Plain,
    /// PEM already base64 encoded by the setup UI, stored in `data` as is
    Base64,
}

/// Key pair, consumed once to create a TLS secret
#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pub cert_pem: String,
    pub key_pem: Secret<String>,
    pub encoding: PemEncoding,
}

impl CertificateBundle {
    /// Bundle of plain PEM text
    pub fn pem(cert_pem: impl Into<String>, key_pem: impl Into<String>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: Secret::new(key_pem.into()),
            encoding: PemEncoding::Plain,
        }
    }
}

impl From<TlsCertificate> for CertificateBundle {
    fn from(cert: TlsCertificate) -> Self {
        Self {
            cert_pem: cert.crt,
            key_pem: Secret::new(cert.key),
            encoding: PemEncoding::Base64,
        }
    }
}

/// Produces a certificate for a single DNS name.
///
/// Issuance blocks; async callers run it through `spawn_blocking`.
pub trait CertificateIssuer: Send + Sync {
    fn issue(&self, domain: &str) -> Result<CertificateBundle>;
}

/// Self-signed certificates from the `openssl` command line tool
#[derive(Debug, Clone)]
pub struct OpensslIssuer {
    openssl_path: PathBuf,
    validity_days: u32,
    key_bits: u32,
}

impl OpensslIssuer {
    pub fn new(config: &CertificateConfig) -> Self {
        Self {
            openssl_path: config.openssl_path.clone(),
            validity_days: config.validity_days,
            key_bits: config.key_bits,
        }
    }
}

impl CertificateIssuer for OpensslIssuer {
    fn issue(&self, domain: &str) -> Result<CertificateBundle> {
        debug!(domain = %domain, "Generating self-signed certificate");

        // removed together with the key material when dropped
        let workdir = tempfile::Builder::new()
            .prefix("generate-certificate-")
            .tempdir()
            .map_err(|e| SetupError::CertificateIssuance(format!("Failed to mktemp: {}", e)))?;
        let key_file = workdir.path().join("key.pem");
        let cert_file = workdir.path().join("cert.pem");

        let output = Command::new(&self.openssl_path)
            .arg("req")
            .arg("-newkey")
            .arg(format!("rsa:{}", self.key_bits))
            .args(["-new", "-nodes", "-x509", "-days"])
            .arg(self.validity_days.to_string())
            .arg("-keyout")
            .arg(&key_file)
            .arg("-out")
            .arg(&cert_file)
            .arg("-subj")
            .arg(format!("/CN={}", domain))
            .arg("-addext")
            .arg(format!("subjectAltName = DNS:{}", domain))
            .output()
            .map_err(|e| {
                error!(error = %e, path = %self.openssl_path.display(), "Can not run openssl");
                SetupError::CertificateIssuance(format!("Failed to run openssl: {}", e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(domain = %domain, status = %output.status, stderr = %stderr.trim(), "openssl failed");
            return Err(SetupError::CertificateIssuance(format!(
                "openssl exited with {}",
                output.status
            )));
        }

        let key_pem = std::fs::read_to_string(&key_file)
            .map_err(|e| SetupError::CertificateIssuance(format!("Missing private key: {}", e)))?;
        let cert_pem = std::fs::read_to_string(&cert_file)
            .map_err(|e| SetupError::CertificateIssuance(format!("Missing certificate: {}", e)))?;

        Ok(CertificateBundle::pem(cert_pem, key_pem))
    }
}

/// Create a `kubernetes.io/tls` secret named `<prefix><random>` and return
/// the name the API server assigned.
///
/// Not idempotent: a repeated call creates another secret.
pub async fn create_tls_secret(
    client: &ResourceClient,
    token: &str,
    namespace: &str,
    name_prefix: &str,
    bundle: CertificateBundle,
) -> Result<String> {
    let secret = TlsSecret::new(
        namespace,
        name_prefix,
        bundle.cert_pem,
        bundle.key_pem.into_inner(),
        bundle.encoding,
    );
    let collection = ResourceRef::collection(ResourceKind::Secret, Some(namespace));
    let result = client.post(token, &collection, &secret).await?;

    let created_name = (result.status_code == 201)
        .then(|| result.object_name().map(str::to_string))
        .flatten();

    match created_name {
        Some(name) => {
            info!(secret = %name, namespace = %namespace, "TLS secret created");
            Ok(name)
        }
        None => Err(SetupError::SecretCreate {
            prefix: name_prefix.to_string(),
            namespace: namespace.to_string(),
            status: result.status_code,
            message: result.message(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config_with(openssl_path: &str) -> CertificateConfig {
        CertificateConfig {
            openssl_path: PathBuf::from(openssl_path),
            validity_days: 1,
            key_bits: 2048,
            secret_namespace: "openshift-config".to_string(),
        }
    }

    #[test]
    fn test_bundle_from_custom_certificate() {
        let bundle = CertificateBundle::from(TlsCertificate {
            crt: "CERT".to_string(),
            key: "KEY".to_string(),
        });
        assert_eq!(bundle.cert_pem, "CERT");
        assert_eq!(bundle.key_pem.expose_secret(), "KEY");
        assert_eq!(bundle.encoding, PemEncoding::Base64);
        assert!(!format!("{:?}", bundle).contains("KEY"));
    }

    #[test]
    fn test_missing_openssl_binary() {
        let issuer = OpensslIssuer::new(&config_with("/nonexistent/openssl"));
        let result = issuer.issue("api.edge.example.com");
        assert!(matches!(result, Err(SetupError::CertificateIssuance(_))));
    }

    #[test]
    fn test_failing_openssl_binary() {
        if !Path::new("/bin/false").exists() {
            return;
        }
        let issuer = OpensslIssuer::new(&config_with("/bin/false"));
        let result = issuer.issue("api.edge.example.com");
        assert!(matches!(result, Err(SetupError::CertificateIssuance(msg)) if msg.contains("exited")));
    }

    #[test]
    fn test_issue_with_real_openssl() {
        if !Path::new("/usr/bin/openssl").exists() {
            return;
        }
        let issuer = OpensslIssuer::new(&config_with("/usr/bin/openssl"));
        let bundle = issuer.issue("api.edge.example.com").unwrap();
        assert_eq!(bundle.encoding, PemEncoding::Plain);
        assert!(bundle.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(bundle.key_pem.expose_secret().contains("PRIVATE KEY"));
    }
}
