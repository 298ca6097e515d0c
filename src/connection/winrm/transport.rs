//! HTTP transport for WS-Management requests.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Certificate, Client};
use std::fmt;
use std::time::Duration;
use tracing::trace;

use super::auth::TokenGenerator;
use super::envelope::Envelope;
use super::response::ResponseDocument;
use super::{WinRmConfig, WinRmProtocol};
use crate::connection::{ConnectionError, ConnectionResult};

/// Content type of every WS-Man request
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=UTF-8";

/// Sends request envelopes and returns parsed responses.
///
/// Implementations do not retry. Configuration errors raised while
/// authenticating must be returned unchanged.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Send one request and parse its response
    async fn send_message(&self, request: &Envelope) -> ConnectionResult<ResponseDocument>;
}

/// Build the HTTP client for a target.
///
/// `Https` verifies certificates against the system roots plus the optional
/// `ca_cert` bundle. `HttpsLazy` accepts any certificate.
pub fn build_client(config: &WinRmConfig) -> ConnectionResult<Client> {
    let mut builder = Client::builder().connect_timeout(Duration::from_secs(config.timeout));

    match config.protocol {
        WinRmProtocol::Http => {}
        WinRmProtocol::Https => {
            if let Some(ca_path) = &config.ca_cert {
                let pem = std::fs::read(ca_path).map_err(|e| {
                    ConnectionError::InvalidConfig(format!(
                        "Failed to read CA cert '{}': {}",
                        ca_path, e
                    ))
                })?;
                let cert = Certificate::from_pem(&pem).map_err(|e| {
                    ConnectionError::InvalidConfig(format!("Invalid CA cert '{}': {}", ca_path, e))
                })?;
                builder = builder.add_root_certificate(cert);
            }
        }
        WinRmProtocol::HttpsLazy => {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder.build().map_err(|e| {
        ConnectionError::InvalidConfig(format!("Failed to build HTTP client: {}", e))
    })
}

/// [`Connector`] that POSTs envelopes to a WinRM endpoint.
pub struct HttpConnector {
    client: Client,
    url: String,
    tokens: Mutex<Box<dyn TokenGenerator>>,
}

impl HttpConnector {
    /// Create a connector sharing an existing client
    pub fn new(client: Client, url: impl Into<String>, tokens: Box<dyn TokenGenerator>) -> Self {
        Self {
            client,
            url: url.into(),
            tokens: Mutex::new(tokens),
        }
    }

    /// Endpoint URL requests are posted to
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn send_message(&self, envelope: &Envelope) -> ConnectionResult<ResponseDocument> {
        // Configuration errors from the generator propagate as-is.
        let token = self.tokens.lock().generate_token()?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(envelope.as_xml().to_string());
        if let Some(action) = envelope.soap_action() {
            request = request.header("SOAPAction", action);
        }
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, token);
        }

        trace!(
            url = %self.url,
            action = envelope.action().map(|a| a.name()).unwrap_or("Identify"),
            message_id = %envelope.message_id(),
            "Sending WS-Man request"
        );

        let response = request.send().await.map_err(|e| {
            transport_error(
                format!("HTTP request to {} failed", self.url),
                envelope,
                None,
                Some(Box::new(e)),
            )
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            transport_error(
                format!("Failed to read response body (HTTP {})", status),
                envelope,
                None,
                Some(Box::new(e)),
            )
        })?;

        trace!(status = %status, bytes = body.len(), "Received WS-Man response");

        let failed = status.is_client_error() || status.is_server_error();
        let document = match ResponseDocument::parse(&body) {
            Ok(document) => document,
            Err(e) => {
                let message = if failed {
                    format!("HTTP {}", status)
                } else {
                    "Response is not well-formed XML".to_string()
                };
                return Err(transport_error(message, envelope, Some(body), Some(Box::new(e))));
            }
        };

        if failed {
            let message = match document.fault_reason() {
                Some(reason) => format!("HTTP {}: {}", status, reason),
                None => format!("HTTP {}", status),
            };
            return Err(transport_error(message, envelope, Some(body), None));
        }

        Ok(document)
    }
}

impl fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnector")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

fn transport_error(
    message: String,
    envelope: &Envelope,
    response: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
) -> ConnectionError {
    ConnectionError::Transport {
        message,
        request: envelope.as_xml().to_string(),
        response,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::winrm::auth::{KerberosConfig, KerberosTokenGenerator, GssMechanism};
    use crate::connection::winrm::WinRmAuth;
    use std::path::Path;

    struct UnusedGss;

    impl GssMechanism for UnusedGss {
        fn login(&mut self, _: &str, _: &str, _: &Path, _: &Path) -> ConnectionResult<()> {
            unreachable!("configuration is checked first")
        }

        fn init_security_context(&mut self, _: &str) -> ConnectionResult<Vec<u8>> {
            unreachable!("configuration is checked first")
        }
    }

    fn config(protocol: WinRmProtocol) -> WinRmConfig {
        let mut config = WinRmConfig::new("win-01");
        config.protocol = protocol;
        config.auth = WinRmAuth::basic("admin", "secret");
        config
    }

    #[test]
    fn test_build_client_variants() {
        assert!(build_client(&config(WinRmProtocol::Http)).is_ok());
        assert!(build_client(&config(WinRmProtocol::Https)).is_ok());
        assert!(build_client(&config(WinRmProtocol::HttpsLazy)).is_ok());
    }

    #[test]
    fn test_build_client_missing_ca_cert() {
        let mut config = config(WinRmProtocol::Https);
        config.ca_cert = Some("/nonexistent/ca.pem".to_string());
        assert!(matches!(
            build_client(&config),
            Err(ConnectionError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_configuration_error_is_not_wrapped() {
        let generator = KerberosTokenGenerator::new(
            "svc",
            "secret",
            "win-01",
            5985,
            KerberosConfig::default(),
            Box::new(UnusedGss),
        );
        // Port 9 is never contacted; the token fails first.
        let connector = HttpConnector::new(
            Client::new(),
            "http://127.0.0.1:9/wsman",
            Box::new(generator),
        );
        let envelope = super::super::envelope::EnvelopeBuilder::new(
            config(WinRmProtocol::Http).envelope_parameters(),
        )
        .create_shell();

        match connector.send_message(&envelope).await {
            Err(ConnectionError::ConfigurationMissing { key }) => {
                assert_eq!(key, "kerberos.krb5_config")
            }
            other => panic!("expected ConfigurationMissing, got {:?}", other),
        }
    }
}
