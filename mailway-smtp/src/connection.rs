//! The byte stream beneath an SMTP session: plain TCP or TLS.

use std::{path::PathBuf, sync::Arc};

use serde::Deserialize;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{
        self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use crate::error::{ClientError, Result};

/// Client-side TLS settings (the `tls_client` configuration block).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsSettings {
    /// Skip certificate validation. Test deployments only.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// PEM bundle of additional trust roots, on top of the system store.
    #[serde(default)]
    pub ca_bundle: Option<PathBuf>,
}

/// A live client connection, before or after TLS negotiation.
pub(crate) enum ClientStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ClientStream {
    pub(crate) const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub(crate) async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.flush().await?,
            Self::Tls(stream) => stream.flush().await?,
        }
        Ok(())
    }

    /// Reads into `buf`, treating EOF as an error: the protocol never ends
    /// a session by silently closing the stream mid-exchange.
    pub(crate) async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(ClientError::ConnectionClosed);
        }
        Ok(n)
    }

    /// Performs the TLS handshake over a plain stream.
    pub(crate) async fn handshake(self, server_name: &str, settings: &TlsSettings) -> Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(ClientError::Tls("connection is already TLS".into()));
        };

        let connector = connector(settings)?;
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|err| ClientError::Tls(format!("invalid server name: {err}")))?;
        let tls = connector
            .connect(name, stream)
            .await
            .map_err(|err| ClientError::Tls(err.to_string()))?;

        Ok(Self::Tls(Box::new(tls)))
    }
}

fn connector(settings: &TlsSettings) -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for cert in native.certs {
        roots
            .add(cert)
            .map_err(|err| ClientError::Tls(format!("cannot add system root: {err}")))?;
    }
    if !native.errors.is_empty() {
        tracing::warn!(errors = ?native.errors, "some system trust roots could not be loaded");
    }

    if let Some(path) = &settings.ca_bundle {
        let pem = std::fs::read(path)?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            roots
                .add(cert?)
                .map_err(|err| ClientError::Tls(format!("cannot add root from bundle: {err}")))?;
        }
    }

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if settings.accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(InsecureVerifier));
    }

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Accepts any certificate. Only reachable via `accept_invalid_certs`.
#[derive(Debug)]
struct InsecureVerifier;

impl ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}
