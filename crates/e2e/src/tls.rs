//! Direct TLS handshake and certificate inspection for `ssl` actions
//!
//! The handshake opens its own connection, independent of the HTTP client, and
//! accepts any certificate: the point is to look at what the server
//! presents, not to trust it.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use der::Decode;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, ProtocolVersion, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::{Host, Url};
use x509_cert::Certificate;

use crate::error::{E2eError, E2eResult};
use crate::spec::TlsVersion;

const SECONDS_PER_DAY: u64 = 86_400;

/// What the server presented during the handshake
#[derive(Debug, Clone)]
pub struct TlsHandshake {
    pub version: Option<TlsVersion>,
    pub certificate_der: Vec<u8>,
}

#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn map_version(version: ProtocolVersion) -> Option<TlsVersion> {
    match version {
        ProtocolVersion::TLSv1_0 => Some(TlsVersion::Tls10),
        ProtocolVersion::TLSv1_1 => Some(TlsVersion::Tls11),
        ProtocolVersion::TLSv1_2 => Some(TlsVersion::Tls12),
        ProtocolVersion::TLSv1_3 => Some(TlsVersion::Tls13),
        _ => None,
    }
}

/// Handshake with the host of `url` on `port` and capture the leaf certificate
pub async fn handshake(url: &Url, port: u16, timeout: Duration) -> E2eResult<TlsHandshake> {
    let (server_name, address): (ServerName<'static>, String) = match url.host() {
        Some(Host::Domain(domain)) => (
            ServerName::try_from(domain)
                .map(|name| name.to_owned())
                .map_err(|e| E2eError::TlsHandshake(format!("invalid server name {:?}: {}", domain, e)))?,
            domain.to_string(),
        ),
        Some(Host::Ipv4(ip)) => (ServerName::from(IpAddr::V4(ip)), ip.to_string()),
        Some(Host::Ipv6(ip)) => (ServerName::from(IpAddr::V6(ip)), ip.to_string()),
        None => return Err(E2eError::TlsHandshake(format!("{} has no host", url))),
    };

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let connect = async {
        let tcp = TcpStream::connect((address.as_str(), port)).await?;
        connector.connect(server_name, tcp).await
    };
    let stream = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| E2eError::Timeout(format!("TLS handshake with {}:{}", address, port)))??;

    let (_, connection) = stream.get_ref();
    let version = connection.protocol_version().and_then(map_version);
    let certificate_der = connection
        .peer_certificates()
        .and_then(|certs| certs.first())
        .map(|cert| cert.as_ref().to_vec())
        .ok_or_else(|| E2eError::TlsHandshake(format!("{} presented no certificate", address)))?;

    debug!("Response SSL version: {:?}", connection.protocol_version());
    debug!("Response SSL cipher: {:?}", connection.negotiated_cipher_suite());
    debug!("Response SSL server certificate binary: {}", hex::encode(&certificate_der));

    Ok(TlsHandshake {
        version,
        certificate_der,
    })
}

/// The certificate fields `ssl` actions assert on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    /// Subject attributes, one RFC 4514 string per attribute
    pub subject: Vec<String>,
}

impl CertificateInfo {
    pub fn from_der(der: &[u8]) -> E2eResult<Self> {
        let cert = Certificate::from_der(der)?;
        let validity = &cert.tbs_certificate.validity;
        let not_before = to_datetime(validity.not_before.to_unix_duration())?;
        let not_after = to_datetime(validity.not_after.to_unix_duration())?;

        let subject = cert
            .tbs_certificate
            .subject
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .map(|attribute| attribute.to_string())
            .collect();

        Ok(Self {
            not_before,
            not_after,
            subject,
        })
    }

    /// Whether the validity window spans exactly `days` days
    pub fn valid_for_days(&self, days: i64) -> bool {
        let span = self.not_after.signed_duration_since(self.not_before);
        days >= 0 && span.num_seconds() == days * SECONDS_PER_DAY as i64
    }

    /// Compare against a `/CN=.../O=.../` style subject, ignoring order
    pub fn subject_matches(&self, expected: &str) -> bool {
        let mut actual: Vec<&str> = self.subject.iter().map(String::as_str).collect();
        let mut wanted: Vec<&str> = expected.split('/').filter(|part| !part.is_empty()).collect();
        actual.sort_unstable();
        wanted.sort_unstable();
        actual == wanted
    }
}

fn to_datetime(since_epoch: Duration) -> E2eResult<DateTime<Utc>> {
    let secs = i64::try_from(since_epoch.as_secs())
        .map_err(|_| E2eError::Certificate("validity timestamp out of range".to_string()))?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| E2eError::Certificate(format!("invalid validity timestamp {}", secs)))
}
