//! reqwest-backed transport implementation

use courier_core::{
    Bytes, CallError, CancelSignal, OutboundRequest, ResponseMetadata, Transport, TransportFuture,
    TransportOutcome,
};
use reqwest::Client;

use crate::config::HttpTransportConfig;
use crate::error::ConfigError;

/// HTTP transport built on a shared [`reqwest::Client`]
///
/// Clones share the client's connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with default configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Client` if the client cannot be built
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_config(&HttpTransportConfig::default())
    }

    /// Create a transport configured from `COURIER_HTTP_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns error if a variable is invalid or the client cannot be built
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::with_config(&HttpTransportConfig::from_env()?)
    }

    /// Create a transport with explicit configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the client cannot be built
    pub fn with_config(config: &HttpTransportConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    #[must_use]
    pub const fn from_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn perform(&self, request: OutboundRequest, cancel: CancelSignal) -> TransportFuture {
        let client = self.client.clone();

        Box::pin(async move {
            if cancel.is_cancelled() {
                return TransportOutcome::cancelled(request);
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(method = %request.method, url = %request.url, "HTTP call cancelled");
                    TransportOutcome::cancelled(request)
                }
                result = send(client, request.clone()) => match result {
                    Ok((response, payload)) => TransportOutcome::success(request, response, payload),
                    Err(e) => {
                        tracing::debug!(method = %request.method, url = %request.url, error = %e, "HTTP call failed");
                        TransportOutcome::failure(request, CallError::transport(e))
                    }
                },
            }
        })
    }
}

async fn send(
    client: Client,
    request: OutboundRequest,
) -> Result<(ResponseMetadata, Option<Bytes>), reqwest::Error> {
    let mut builder = client
        .request(request.method, request.url)
        .headers(request.headers);
    if let Some(body) = request.body {
        builder = builder.body(body);
    }

    let response = builder.send().await?;

    let metadata = ResponseMetadata {
        status: response.status(),
        headers: response.headers().clone(),
        url: Some(response.url().clone()),
    };
    let payload = response.bytes().await?;

    tracing::trace!(
        status = %metadata.status,
        bytes = payload.len(),
        "HTTP response received"
    );

    Ok((metadata, (!payload.is_empty()).then_some(payload)))
}
