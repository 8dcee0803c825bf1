//! Ephemeral certificate authority for the log sink.
//!
//! Generates a root CA and a leaf certificate whose subject alternative name
//! is the sink's IP address. Clients trust the CA certificate; the server
//! presents the leaf. The material is written into a private temporary
//! directory so that external tools can pick up the CA certificate, and
//! removed by [`CertificateAuthority::dispose`].

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

use super::LogTransferError;

const CA_CERT_FILE: &str = "ca.pem";
const SERVER_CERT_FILE: &str = "server.pem";
const SERVER_KEY_FILE: &str = "server.key";

fn cert_error(e: impl fmt::Display) -> LogTransferError {
    LogTransferError::Certificate(e.to_string())
}

/// Parse the first certificate of a PEM document.
pub(crate) fn parse_pem_certificate(pem: &str) -> Result<CertificateDer<'static>, LogTransferError> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .next()
        .ok_or_else(|| LogTransferError::Certificate("no certificate in PEM data".into()))?
        .map_err(cert_error)
}

pub struct CertificateAuthority {
    ip: IpAddr,
    ca_pem: String,
    ca_der: CertificateDer<'static>,
    server_der: CertificateDer<'static>,
    server_key: Vec<u8>,
    dir: Option<TempDir>,
}

impl CertificateAuthority {
    /// Generate a CA and a leaf certificate valid for `ip`.
    pub fn generate(ip: IpAddr) -> Result<Self, LogTransferError> {
        let mut ca_params = CertificateParams::new(Vec::<String>::new());
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name = DistinguishedName::new();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "procfleet log transfer CA");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca = Certificate::from_params(ca_params).map_err(cert_error)?;

        let mut server_params = CertificateParams::new(Vec::<String>::new());
        server_params.subject_alt_names = vec![SanType::IpAddress(ip)];
        server_params.distinguished_name = DistinguishedName::new();
        server_params
            .distinguished_name
            .push(DnType::CommonName, ip.to_string());
        server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let server = Certificate::from_params(server_params).map_err(cert_error)?;

        // Serialize the CA once: every serialization is a fresh signature.
        let ca_pem = ca.serialize_pem().map_err(cert_error)?;
        let ca_der = parse_pem_certificate(&ca_pem)?;
        let server_pem = server.serialize_pem_with_signer(&ca).map_err(cert_error)?;
        let server_der = parse_pem_certificate(&server_pem)?;
        let server_key = server.serialize_private_key_der();

        let dir = tempfile::Builder::new().prefix("procfleet-ca-").tempdir()?;
        std::fs::write(dir.path().join(CA_CERT_FILE), &ca_pem)?;
        std::fs::write(dir.path().join(SERVER_CERT_FILE), &server_pem)?;
        std::fs::write(
            dir.path().join(SERVER_KEY_FILE),
            server.serialize_private_key_pem(),
        )?;

        debug!(%ip, dir = %dir.path().display(), "Generated log transfer certificates");

        Ok(Self {
            ip,
            ca_pem,
            ca_der,
            server_der,
            server_key,
            dir: Some(dir),
        })
    }

    pub const fn ip(&self) -> IpAddr {
        self.ip
    }

    /// PEM encoded CA certificate clients must trust.
    pub fn certificate(&self) -> &str {
        &self.ca_pem
    }

    /// Path of the CA certificate on disk, until disposed.
    pub fn ca_certificate_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.path().join(CA_CERT_FILE))
    }

    /// Directory holding the generated material, until disposed.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// TLS configuration presenting the leaf certificate.
    pub fn server_config(&self) -> Result<Arc<rustls::ServerConfig>, LogTransferError> {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key.clone()));
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| LogTransferError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(vec![self.server_der.clone(), self.ca_der.clone()], key)
        .map_err(|e| LogTransferError::Tls(e.to_string()))?;
        Ok(Arc::new(config))
    }

    /// Remove the generated material from disk.
    pub fn dispose(&mut self) -> Result<(), LogTransferError> {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            dir.close()?;
            debug!(dir = %path.display(), "Removed log transfer certificates");
        }
        Ok(())
    }
}

impl fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("ip", &self.ip)
            .field("dir", &self.dir())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_material_and_disposes_it() {
        let mut ca = CertificateAuthority::generate("127.0.0.1".parse().unwrap()).unwrap();
        let ca_path = ca.ca_certificate_path().unwrap();
        assert!(ca_path.exists());
        assert!(ca.certificate().starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(std::fs::read_to_string(&ca_path).unwrap(), ca.certificate());
        assert!(ca.server_config().is_ok());

        let dir = ca.dir().unwrap().to_path_buf();
        ca.dispose().unwrap();
        assert!(!dir.exists());
        assert!(ca.ca_certificate_path().is_none());
        // Disposing twice is harmless
        ca.dispose().unwrap();
    }

    #[test]
    fn pem_parsing_rejects_garbage() {
        assert!(parse_pem_certificate("not a certificate").is_err());
    }
}
