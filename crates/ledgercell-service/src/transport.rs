//! The transport client for the remote general-ledger service.
//!
//! One network call per chunk. Responses are classified into the three
//! outcomes the dispatch loop cares about: success, backpressure (the remote
//! concurrency ceiling was hit and the identical chunk should be retried
//! after a backoff), and failure (everything else).

use std::collections::HashMap;
use std::error::Error;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::RemoteConfig;
use crate::types::FunctionFamily;

/// Classified outcome of one chunk request.
#[derive(Debug)]
pub enum ChunkOutcome {
    Success(ChunkPayload),
    /// The remote signalled its concurrency/rate ceiling.
    Backpressure,
    Failure(TransportError),
}

/// The decoded response payload for one chunk.
#[derive(Debug)]
pub enum ChunkPayload {
    /// Numeric families: account number -> period label -> aggregate.
    Aggregates(HashMap<String, HashMap<String, f64>>),
    /// Title family: account number -> display name.
    Titles(HashMap<String, String>),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Request body for the remote batch endpoints.
#[derive(Debug, Serialize)]
pub struct BatchRequest<'a> {
    pub accounts: &'a [String],
    pub periods: &'a [String],
    pub subsidiary: &'a str,
    pub class: &'a str,
    pub department: &'a str,
    pub location: &'a str,
    #[serde(rename = "budget_category", skip_serializing_if = "str::is_empty")]
    pub book: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(rename = "balances", alias = "budgets")]
    values: HashMap<String, HashMap<String, f64>>,
}

/// HTTP client for the remote service.
#[derive(Debug)]
pub struct RemoteClient {
    client: reqwest::Client,
    base_url: Url,
}

impl RemoteClient {
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        Ok(RemoteClient { client, base_url })
    }

    /// Sends one chunk and classifies the response.
    ///
    /// This never returns an error to the caller; every condition maps to a
    /// [`ChunkOutcome`] so the distributor can resolve all waiting
    /// invocations regardless of what happened on the wire.
    pub async fn send_chunk(
        &self,
        family: FunctionFamily,
        request: BatchRequest<'_>,
    ) -> ChunkOutcome {
        match family {
            FunctionFamily::Balance => self.send_batch("batch/balance", request).await,
            FunctionFamily::Budget => self.send_batch("batch/budget", request).await,
            FunctionFamily::AccountTitle => self.send_titles(request.accounts).await,
        }
    }

    async fn send_batch(&self, path: &str, request: BatchRequest<'_>) -> ChunkOutcome {
        let url = match self.base_url.join(path) {
            Ok(url) => url,
            Err(e) => return ChunkOutcome::Failure(TransportError::Request(e.to_string())),
        };

        let response = match self.client.post(url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => return ChunkOutcome::Failure(TransportError::Request(error_string(&e))),
        };

        match classify_status(response.status()) {
            Classified::Success => {}
            Classified::Backpressure => return ChunkOutcome::Backpressure,
            Classified::Failure(status) => {
                return ChunkOutcome::Failure(TransportError::Status(status));
            }
        }

        match response.json::<BatchResponse>().await {
            Ok(body) => ChunkOutcome::Success(ChunkPayload::Aggregates(body.values)),
            Err(e) => ChunkOutcome::Failure(TransportError::MalformedResponse(error_string(&e))),
        }
    }

    /// The remote has no batch title endpoint; a title chunk is materialized
    /// as sequential per-account lookups, which respects the same
    /// concurrency ceiling the chunking protects.
    async fn send_titles(&self, accounts: &[String]) -> ChunkOutcome {
        let mut titles = HashMap::with_capacity(accounts.len());
        for account in accounts {
            let url = match self.base_url.join(&format!("account/{account}/name")) {
                Ok(url) => url,
                Err(e) => return ChunkOutcome::Failure(TransportError::Request(e.to_string())),
            };

            let response = match self.client.get(url).send().await {
                Ok(response) => response,
                Err(e) => return ChunkOutcome::Failure(TransportError::Request(error_string(&e))),
            };

            match classify_status(response.status()) {
                Classified::Success => {}
                Classified::Backpressure => return ChunkOutcome::Backpressure,
                Classified::Failure(status) => {
                    return ChunkOutcome::Failure(TransportError::Status(status));
                }
            }

            match response.text().await {
                Ok(name) => {
                    titles.insert(account.clone(), name);
                }
                Err(e) => {
                    return ChunkOutcome::Failure(TransportError::MalformedResponse(error_string(
                        &e,
                    )));
                }
            }
        }
        ChunkOutcome::Success(ChunkPayload::Titles(titles))
    }
}

enum Classified {
    Success,
    Backpressure,
    Failure(StatusCode),
}

fn classify_status(status: StatusCode) -> Classified {
    if status.is_success() {
        Classified::Success
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Classified::Backpressure
    } else {
        Classified::Failure(status)
    }
}

/// Walks the source chain and returns the root cause's message.
fn error_string(mut error: &dyn Error) -> String {
    while let Some(source) = error.source() {
        error = source;
    }
    error.to_string()
}
