// This file is part of Astarte.
//
// Copyright 2024 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Provides the functionalities to pair a device with the Astarte cluster.
//!
//! Pairing exchanges the device credential secret for an X.509 client
//! certificate signed over a locally generated key, and discovers the MQTT
//! broker URL. Both calls authenticate with the credential secret as bearer
//! token.

use std::sync::Arc;

use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use rustls::pki_types::PrivateKeyDer;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::{
    crypto::{Bundle, CryptoError},
    options::MqttConfig,
};

/// Capacity of the rumqttc request channel.
#[cfg(not(test))]
const CHANNEL_SIZE: usize = 50;

const DEFAULT_MQTTS_PORT: u16 = 8883;

/// Astarte pairing error.
///
/// Possible errors returned during the pairing of a device and the setup of
/// the MQTT transport.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    /// Invalid pairing URL.
    #[error("invalid pairing URL")]
    Url(#[from] url::ParseError),
    /// The pairing URL cannot be extended with path segments.
    #[error("the pairing URL cannot be a base")]
    UrlBase,
    /// The HTTP request to the pairing API failed.
    #[error("HTTP request to the pairing API failed")]
    Request(#[from] reqwest::Error),
    /// The pairing API answered with a non success status.
    #[error("pairing API returned the status {status}: {body}")]
    Api {
        /// Response status code.
        status: reqwest::StatusCode,
        /// Response body, for context.
        body: String,
    },
    /// The broker URL uses an unsupported scheme.
    #[error("unsupported broker URL scheme '{scheme}'")]
    BrokerScheme {
        /// Received scheme.
        scheme: String,
    },
    /// The broker URL has no host.
    #[error("the broker URL has no host")]
    BrokerHost,
    /// Couldn't parse the PEM certificate chain received from the API.
    #[error("couldn't parse the received client certificate")]
    InvalidCertificate(#[source] std::io::Error),
    /// The API returned an empty certificate chain.
    #[error("the pairing API returned an empty certificate chain")]
    EmptyCertificate,
    /// Failure while configuring TLS.
    #[error("couldn't configure TLS")]
    Tls(#[from] rustls::Error),
    /// Failure while generating the key pair or CSR.
    #[error("couldn't generate the pairing credentials")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiData<T> {
    data: T,
}

impl<T> ApiData<T> {
    fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
struct CsrRequest<'a> {
    csr: &'a str,
}

#[derive(Debug, Deserialize)]
struct CredentialsResponse {
    client_crt: String,
}

#[derive(Debug, Deserialize)]
struct DeviceStatus {
    protocols: Protocols,
}

#[derive(Debug, Deserialize)]
struct Protocols {
    astarte_mqtt_v1: AstarteMqttV1,
}

#[derive(Debug, Deserialize)]
struct AstarteMqttV1 {
    broker_url: Url,
}

/// Client for the Astarte pairing API.
pub(crate) struct ApiClient<'a> {
    config: &'a MqttConfig,
    client: reqwest::Client,
}

impl<'a> ApiClient<'a> {
    pub(crate) fn from_config(config: &'a MqttConfig) -> Result<Self, PairingError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    fn device_url(&self, extra: &[&str]) -> Result<Url, PairingError> {
        let mut url = Url::parse(&self.config.pairing_url)?;

        url.path_segments_mut()
            .map_err(|()| PairingError::UrlBase)?
            .pop_if_empty()
            .extend([
                "v1",
                self.config.realm.as_str(),
                "devices",
                self.config.device_id.as_str(),
            ])
            .extend(extra.iter().copied());

        Ok(url)
    }

    async fn error_for_status(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, PairingError> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            return Err(PairingError::Api { status, body });
        }

        Ok(response)
    }

    /// Fetches the MQTT broker URL for the device.
    pub(crate) async fn broker_url(&self) -> Result<Url, PairingError> {
        let url = self.device_url(&[])?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.credentials_secret)
            .send()
            .await?;

        let response = Self::error_for_status(response).await?;

        let status: ApiData<DeviceStatus> = response.json().await?;

        Ok(status.data.protocols.astarte_mqtt_v1.broker_url)
    }

    /// Exchanges the CSR for a PEM encoded client certificate chain.
    pub(crate) async fn credentials(&self, csr: &str) -> Result<String, PairingError> {
        let url = self.device_url(&["protocols", "astarte_mqtt_v1", "credentials"])?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.config.credentials_secret)
            .json(&ApiData::new(CsrRequest { csr }))
            .send()
            .await?;

        let response = Self::error_for_status(response).await?;

        let credentials: ApiData<CredentialsResponse> = response.json().await?;

        Ok(credentials.data.client_crt)
    }
}

/// TLS verifier accepting any server certificate, for development setups
/// without a valid broker certificate.
#[derive(Debug)]
struct NoVerifier(Arc<rustls::crypto::CryptoProvider>);

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

fn tls_config(
    bundle: Bundle,
    client_crt_pem: &str,
    insecure: bool,
) -> Result<rustls::ClientConfig, PairingError> {
    let certs = rustls_pemfile::certs(&mut client_crt_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(PairingError::InvalidCertificate)?;

    if certs.is_empty() {
        return Err(PairingError::EmptyCertificate);
    }

    let private_key = PrivateKeyDer::Pkcs8(bundle.private_key);

    if insecure {
        warn!("TLS server certificate verification has been disabled (unsafe)");

        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)))
            .with_client_auth_cert(certs, private_key)?;

        return Ok(config);
    }

    let mut roots = rustls::RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for err in native.errors {
        warn!("couldn't load a native root certificate: {err}");
    }
    for cert in native.certs {
        if let Err(err) = roots.add(cert) {
            warn!("couldn't add a native root certificate: {err}");
        }
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, private_key)?;

    Ok(config)
}

/// Pairs the device and builds the configured MQTT options.
///
/// Performs both pairing calls: broker URL discovery and the CSR exchange
/// over a freshly generated key pair.
pub(crate) async fn get_transport_config(config: &MqttConfig) -> Result<MqttOptions, PairingError> {
    let api = ApiClient::from_config(config)?;

    let broker_url = api.broker_url().await?;

    let secure = match broker_url.scheme() {
        "mqtts" => true,
        // Only for development setups that explicitly opted out of TLS.
        "mqtt" if config.ignore_ssl_errors => false,
        scheme => {
            return Err(PairingError::BrokerScheme {
                scheme: scheme.to_string(),
            })
        }
    };

    let host = broker_url.host_str().ok_or(PairingError::BrokerHost)?;
    let port = broker_url.port().unwrap_or(DEFAULT_MQTTS_PORT);

    debug!("broker address {}:{}", host, port);

    let client_id = format!("{}/{}", config.realm, config.device_id);

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(config.keepalive);

    if secure {
        let bundle = Bundle::new()?;
        let client_crt = api.credentials(&bundle.csr).await?;

        let tls = tls_config(bundle, &client_crt, config.ignore_ssl_errors)?;

        options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
            Arc::new(tls),
        )));
    } else {
        options.set_transport(Transport::tcp());
    }

    Ok(options)
}

/// Pairs the device and opens the MQTT transport.
#[cfg(not(test))]
pub(crate) async fn connect_transport(
    config: &MqttConfig,
) -> Result<(rumqttc::AsyncClient, rumqttc::EventLoop), PairingError> {
    let options = get_transport_config(config).await?;

    Ok(rumqttc::AsyncClient::new(options, CHANNEL_SIZE))
}
