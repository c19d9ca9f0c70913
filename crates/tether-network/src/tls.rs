//! TLS configuration for secure listeners and secure clients.
//!
//! Both sides are backed by `rustls` (ring provider) through `tokio-rustls`.
//!
//! # Server
//!
//! ```no_run
//! use tether_network::ServerTlsConfig;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tls = ServerTlsConfig::from_pem_files("cert.pem", "key.pem")?;
//! # Ok(())
//! # }
//! ```
//!
//! # Client
//!
//! ```no_run
//! use tether_network::ClientTlsConfig;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Mozilla root set
//! let public = ClientTlsConfig::with_webpki_roots()?;
//!
//! // Private CA, explicit SNI name
//! let private = ClientTlsConfig::from_ca_file("ca.pem")?.server_name("internal.example");
//! # Ok(())
//! # }
//! ```

use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use thiserror::Error;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Errors raised while building a TLS configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A certificate or key file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// PEM data could not be parsed
    #[error("Invalid PEM data: {0}")]
    Pem(String),

    /// PEM data contained no certificates
    #[error("No certificates found in PEM data")]
    NoCertificates,

    /// PEM data contained no private key
    #[error("No private key found in PEM data")]
    NoPrivateKey,

    /// rustls rejected the configuration
    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(Cursor::new(pem));
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Pem(e.to_string()))?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates);
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = BufReader::new(Cursor::new(pem));
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::Pem(e.to_string()))?
        .ok_or(TlsError::NoPrivateKey)
}

/// Certificate and key used by a secure server.
#[derive(Clone)]
pub struct ServerTlsConfig {
    acceptor: TlsAcceptor,
}

impl ServerTlsConfig {
    /// Build from a PEM certificate chain and a PEM private key.
    ///
    /// The key may be PKCS#1, PKCS#8 or SEC1; the first key in the data is used.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
        let certs = parse_certificates(cert_pem)?;
        let key = parse_private_key(key_pem)?;

        let config = ServerConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;

        Ok(Self::from_rustls(config))
    }

    /// Build from PEM files on disk.
    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, TlsError> {
        let cert_pem = read_file(cert_path.as_ref())?;
        let key_pem = read_file(key_path.as_ref())?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Wrap a fully built rustls configuration (client auth, ALPN, ...).
    pub fn from_rustls(config: ServerConfig) -> Self {
        Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        }
    }

    pub(crate) fn acceptor(&self) -> &TlsAcceptor {
        &self.acceptor
    }
}

impl std::fmt::Debug for ServerTlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerTlsConfig").finish_non_exhaustive()
    }
}

/// Trust roots and server name used by a secure client.
#[derive(Clone)]
pub struct ClientTlsConfig {
    connector: TlsConnector,
    server_name: Option<String>,
}

impl ClientTlsConfig {
    /// Trust the bundled Mozilla root certificates.
    pub fn with_webpki_roots() -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::from_roots(roots)
    }

    /// Trust only the CA certificates in the given PEM data.
    pub fn from_ca_pem(ca_pem: &[u8]) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in parse_certificates(ca_pem)? {
            roots.add(cert)?;
        }
        Self::from_roots(roots)
    }

    /// Trust only the CA certificates in the given PEM file.
    pub fn from_ca_file(path: impl AsRef<Path>) -> Result<Self, TlsError> {
        let pem = read_file(path.as_ref())?;
        Self::from_ca_pem(&pem)
    }

    /// Wrap a fully built rustls configuration.
    pub fn from_rustls(config: ClientConfig) -> Self {
        Self {
            connector: TlsConnector::from(Arc::new(config)),
            server_name: None,
        }
    }

    /// Override the name sent in SNI and checked against the certificate.
    ///
    /// Without an override the host part of the dialed address is used.
    #[must_use]
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    fn from_roots(roots: RootCertStore) -> Result<Self, TlsError> {
        let config = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self::from_rustls(config))
    }

    pub(crate) fn connector(&self) -> &TlsConnector {
        &self.connector
    }

    pub(crate) fn server_name_override(&self) -> Option<&str> {
        self.server_name.as_deref()
    }
}

impl std::fmt::Debug for ClientTlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTlsConfig")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}
