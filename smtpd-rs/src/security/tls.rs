//! TLS material for the STARTTLS upgrade
//!
//! Loads certificate/key PEM files into a rustls `ServerConfig` and hands
//! out `TlsAcceptor`s for in-band upgrades. Self-signed generation is for
//! development and tests only.

use crate::error::{Result, SmtpdError};
use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// TLS configuration shared by all sessions
#[derive(Clone)]
pub struct TlsConfig {
    server_config: Arc<ServerConfig>,
}

impl TlsConfig {
    /// Create TLS config from PEM certificate and key files
    pub fn from_pem_files<P: AsRef<Path>>(cert_path: P, key_path: P) -> Result<Self> {
        info!("Loading TLS certificate from {:?}", cert_path.as_ref());

        let cert_file = File::open(cert_path.as_ref())
            .map_err(|e| SmtpdError::Tls(format!("Failed to open certificate file: {}", e)))?;
        let mut cert_reader = BufReader::new(cert_file);

        let certs = certs(&mut cert_reader)
            .map_err(|e| SmtpdError::Tls(format!("Failed to read certificates: {}", e)))?;

        if certs.is_empty() {
            return Err(SmtpdError::Tls("No certificates found in file".to_string()));
        }

        debug!("Loaded {} certificate(s)", certs.len());

        let key_file = File::open(key_path.as_ref())
            .map_err(|e| SmtpdError::Tls(format!("Failed to open key file: {}", e)))?;
        let mut key_reader = BufReader::new(key_file);

        let mut keys = pkcs8_private_keys(&mut key_reader)
            .map_err(|e| SmtpdError::Tls(format!("Failed to read private keys: {}", e)))?;

        if keys.is_empty() {
            return Err(SmtpdError::Tls("No private key found in file".to_string()));
        }

        let private_key = keys.remove(0);

        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(
                certs.into_iter().map(rustls::Certificate).collect(),
                rustls::PrivateKey(private_key),
            )
            .map_err(|e| SmtpdError::Tls(format!("Failed to create TLS config: {}", e)))?;

        Ok(Self {
            server_config: Arc::new(config),
        })
    }

    /// Create a TLS acceptor for upgrading a plain stream
    pub fn acceptor(&self) -> tokio_rustls::TlsAcceptor {
        tokio_rustls::TlsAcceptor::from(self.server_config.clone())
    }
}

/// Generate a self-signed certificate for development/testing
///
/// Not suitable for production use.
pub fn generate_self_signed_cert(
    domain: &str,
    cert_output: &str,
    key_output: &str,
) -> Result<()> {
    use rcgen::{CertificateParams, DistinguishedName};

    info!("Generating self-signed certificate for {}", domain);

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params.subject_alt_names = vec![
        rcgen::SanType::DnsName(domain.to_string()),
        rcgen::SanType::DnsName(format!("*.{}", domain)),
    ];

    let cert = rcgen::Certificate::from_params(params)
        .map_err(|e| SmtpdError::Tls(format!("Failed to generate certificate: {}", e)))?;

    std::fs::write(
        cert_output,
        cert.serialize_pem()
            .map_err(|e| SmtpdError::Tls(format!("Failed to serialize certificate: {}", e)))?,
    )
    .map_err(|e| SmtpdError::Tls(format!("Failed to write certificate: {}", e)))?;

    std::fs::write(key_output, cert.serialize_private_key_pem())
        .map_err(|e| SmtpdError::Tls(format!("Failed to write private key: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_generate_self_signed_cert() {
        let cert_file = NamedTempFile::new().unwrap();
        let key_file = NamedTempFile::new().unwrap();

        let cert_path = cert_file.path().to_str().unwrap();
        let key_path = key_file.path().to_str().unwrap();

        generate_self_signed_cert("test.local", cert_path, key_path).unwrap();

        let cert_content = std::fs::read_to_string(cert_path).unwrap();
        let key_content = std::fs::read_to_string(key_path).unwrap();

        assert!(cert_content.contains("BEGIN CERTIFICATE"));
        assert!(key_content.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_load_tls_config() {
        let cert_file = NamedTempFile::new().unwrap();
        let key_file = NamedTempFile::new().unwrap();

        generate_self_signed_cert(
            "test.local",
            cert_file.path().to_str().unwrap(),
            key_file.path().to_str().unwrap(),
        )
        .unwrap();

        let tls_config = TlsConfig::from_pem_files(cert_file.path(), key_file.path()).unwrap();
        assert!(Arc::strong_count(&tls_config.server_config) >= 1);
    }
}
