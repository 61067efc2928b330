//! Reqwest-backed implementation of the remote contract.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use super::{DeltaDto, RemoteClient, TokenProvider};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::models::{Family, RemoteUpsert, ServerId};
use crate::util::format_instant;

/// HTTP adapter speaking the `/v1/<family-path>` routes of the Tally API.
#[derive(Clone)]
pub struct HttpRemoteClient {
    config: RemoteConfig,
    tokens: Arc<dyn TokenProvider>,
    client: reqwest::Client,
}

impl HttpRemoteClient {
    pub fn new(config: RemoteConfig, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(into_transport)?;
        Ok(Self {
            config,
            tokens,
            client,
        })
    }

    fn family_url(&self, family: Family) -> String {
        format!("{}/v1/{}", self.config.endpoint(), family.path())
    }

    /// Send a request with the current bearer token. On 401 the token
    /// provider is asked to refresh and the call is retried exactly once.
    async fn send_raw<F>(&self, make: F) -> Result<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.tokens.bearer_token().await?;
        let response = make(&token).send().await.map_err(into_transport)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!("bearer token rejected, refreshing and retrying once");
        let token = self.tokens.refresh_token().await?;
        make(&token).send().await.map_err(into_transport)
    }

    async fn send<F>(&self, make: F) -> Result<reqwest::Response>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        check_status(self.send_raw(make).await?).await
    }

    async fn read_record(response: reqwest::Response) -> Result<RemoteUpsert> {
        let body = response
            .json::<Value>()
            .await
            .map_err(|error| Error::Decoding(format!("invalid record response: {error}")))?;
        RemoteUpsert::decode(&body)
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn fetch_delta(&self, family: Family, since: Option<DateTime<Utc>>) -> Result<DeltaDto> {
        let url = format!("{}/delta", self.family_url(family));
        let response = self
            .send(|token| {
                let mut request = self.client.get(&url).bearer_auth(token);
                if let Some(since) = since {
                    request = request.query(&[("since", format_instant(since))]);
                }
                request
            })
            .await?;

        response
            .json::<DeltaDto>()
            .await
            .map_err(|error| Error::Decoding(format!("invalid delta response: {error}")))
    }

    async fn create(&self, family: Family, payload: &Value) -> Result<RemoteUpsert> {
        let url = self.family_url(family);
        let response = self
            .send(|token| self.client.post(&url).bearer_auth(token).json(payload))
            .await?;
        Self::read_record(response).await
    }

    async fn update(&self, family: Family, id: &ServerId, payload: &Value) -> Result<RemoteUpsert> {
        let url = format!("{}/{}", self.family_url(family), id);
        let response = self
            .send(|token| self.client.put(&url).bearer_auth(token).json(payload))
            .await?;
        Self::read_record(response).await
    }

    async fn delete(&self, family: Family, id: &ServerId) -> Result<()> {
        let url = format!("{}/{}", self.family_url(family), id);
        let response = self
            .send_raw(|token| self.client.delete(&url).bearer_auth(token))
            .await?;

        // Deleting an already-deleted record succeeds.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = parse_api_error(status, &body);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(message),
        _ => Error::Transport(message),
    })
}

fn into_transport(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Transport(format!("request timed out: {error}"))
    } else {
        Error::Transport(error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
