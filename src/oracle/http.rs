//! HTTP results feed.
//!
//! Endpoint: `GET {base_url}/events/{event_id}/result`
//! Response: `{ "settled": bool, "winner": "HOME" | "AWAY" | ... }`
//! Auth: optional `Authorization: Bearer {key}`.
//!
//! 404 means the feed does not know the event yet and is treated like an
//! unsettled result. Transport errors and 5xx are `Unavailable`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{OracleError, OutcomeOracle};
use crate::types::{normalize_side, Selection};

const SOURCE_NAME: &str = "http";

#[derive(Debug, Deserialize)]
struct EventResult {
    #[serde(default)]
    settled: bool,
    #[serde(default)]
    winner: Option<String>,
}

pub struct HttpOracle {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpOracle {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("BANKROLL/0.1.0 (settlement-engine)")
            .build()
            .map_err(|e| OracleError::Unavailable {
                source_name: SOURCE_NAME.into(),
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(SecretString::new),
        })
    }

    fn result_url(&self, event_id: &str) -> String {
        format!(
            "{}/events/{}/result",
            self.base_url,
            urlencoding::encode(event_id.trim())
        )
    }

    fn unavailable(message: String) -> OracleError {
        OracleError::Unavailable {
            source_name: SOURCE_NAME.into(),
            message,
        }
    }
}

#[async_trait]
impl OutcomeOracle for HttpOracle {
    async fn lookup(&self, selection: &Selection) -> Result<Option<String>, OracleError> {
        let url = self.result_url(&selection.event_id);
        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Self::unavailable(format!("request failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(event_id = %selection.event_id, "Event unknown to results feed");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::unavailable(format!("HTTP {status} from {url}")));
        }

        let result: EventResult = resp.json().await.map_err(|e| OracleError::Malformed {
            source_name: SOURCE_NAME.into(),
            message: e.to_string(),
        })?;

        match (result.settled, result.winner) {
            (true, Some(winner)) if !winner.trim().is_empty() => Ok(Some(normalize_side(&winner))),
            (true, _) => Err(OracleError::Malformed {
                source_name: SOURCE_NAME.into(),
                message: format!("event {} settled without a winner", selection.event_id),
            }),
            (false, _) => Ok(None),
        }
    }

    fn name(&self) -> &'static str {
        SOURCE_NAME
    }
}
