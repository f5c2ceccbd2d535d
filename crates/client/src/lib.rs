//! HTTP implementation of the quote service contract.
//!
//! `POST {endpoint}` with the frozen [`FetchInput`] as JSON. A `200` body is
//! either a `Quote` or `null`.

use std::time::Duration;

use async_trait::async_trait;
use pricepoint_core::config::QuoteServiceConfig;
use pricepoint_core::pricing::fetch::{FetchInput, QuoteFetchError, QuoteFetcher};
use pricepoint_core::Quote;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("quote service endpoint `{0}` must be an absolute http(s) url")]
    InvalidEndpoint(String),
    #[error("could not build http client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub struct HttpQuoteFetcher {
    client: Client,
    endpoint: String,
    api_token: Option<SecretString>,
}

impl HttpQuoteFetcher {
    pub fn new(
        endpoint: impl Into<String>,
        api_token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let endpoint = endpoint.into();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ClientError::InvalidEndpoint(endpoint));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()?;

        Ok(Self { client, endpoint, api_token })
    }

    pub fn from_config(config: &QuoteServiceConfig) -> Result<Self, ClientError> {
        Self::new(
            config.endpoint.trim(),
            config.api_token.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Any HTTP answer counts as reachable; only transport failures do not.
    pub async fn probe(&self) -> Result<StatusCode, QuoteFetchError> {
        let response = self
            .authorized(self.client.head(&self.endpoint))
            .send()
            .await
            .map_err(|error| QuoteFetchError::Transport(error.to_string()))?;
        Ok(response.status())
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl QuoteFetcher for HttpQuoteFetcher {
    async fn fetch_quote(&self, input: &FetchInput) -> Result<Quote, QuoteFetchError> {
        debug!(
            event_name = "quote_service.request",
            product_id = %input.product_id,
            quantity = input.quantity,
            endpoint = %self.endpoint,
            "requesting quote"
        );

        let response = self
            .authorized(self.client.post(&self.endpoint))
            .json(input)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    warn!(
                        event_name = "quote_service.timeout",
                        product_id = %input.product_id,
                        "quote service request timed out"
                    );
                }
                QuoteFetchError::Transport(error.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                event_name = "quote_service.status",
                product_id = %input.product_id,
                status = status.as_u16(),
                "quote service returned an error status"
            );
            return Err(QuoteFetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|error| QuoteFetchError::Transport(error.to_string()))?;
        parse_quote_response(&body)
    }
}

/// Decodes a successful quote response body.
pub fn parse_quote_response(body: &str) -> Result<Quote, QuoteFetchError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(QuoteFetchError::NoQuote);
    }

    serde_json::from_str::<Option<Quote>>(trimmed)
        .map_err(|error| QuoteFetchError::Decode(error.to_string()))?
        .ok_or(QuoteFetchError::NoQuote)
}
