use std::{future::Future, time::Duration};

use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde_json::Value;
use thiserror::Error;

use crate::block::{CandidateBlock, LastBlockHashResponse, TipHash};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const TIP_PATH: &str = "/last_block_hash";
pub const SUBMIT_PATH: &str = "/submit_block";

/// Failures talking to the chain endpoint.
///
/// DNS, connect, TLS and timeout failures all collapse into `Unreachable`;
/// no caller treats them differently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Unreachable(err.to_string())
    }
}

/// The remote chain as seen by the miner: a tip source and a block sink.
pub trait ChainEndpoint: Send + Sync + 'static {
    fn fetch_tip(&self) -> impl Future<Output = Result<TipHash, ClientError>> + Send;

    /// Submits a solved block, returning the endpoint's JSON acknowledgement.
    fn submit(&self, block: CandidateBlock)
        -> impl Future<Output = Result<Value, ClientError>> + Send;

    /// Human readable location, for log lines.
    fn describe(&self) -> String;
}

pub struct HttpEndpoint {
    client: reqwest::Client,
    server_url: String,
    tip_url: String,
    submit_url: String,
}

impl HttpEndpoint {
    /// Every request made through this endpoint gives up after `timeout`.
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let server_url = server_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpEndpoint {
            client,
            tip_url: format!("{}{}", server_url, TIP_PATH),
            submit_url: format!("{}{}", server_url, SUBMIT_PATH),
            server_url,
        })
    }

    pub fn tip_url(&self) -> &str {
        &self.tip_url
    }

    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }
}

impl ChainEndpoint for HttpEndpoint {
    async fn fetch_tip(&self) -> Result<TipHash, ClientError> {
        let response = self.client.get(&self.tip_url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        parse_tip_response(&body)
    }

    async fn submit(&self, block: CandidateBlock) -> Result<Value, ClientError> {
        let request_body =
            serde_json::to_string(&block).map_err(|e| ClientError::Malformed(e.to_string()))?;
        let response = self
            .client
            .post(&self.submit_url)
            .header(CONTENT_TYPE, "application/json")
            .body(request_body)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        parse_submit_response(status, &body)
    }

    fn describe(&self) -> String {
        self.server_url.clone()
    }
}

/// A missing `last_hash` is an unknown tip, never the genesis sentinel.
pub fn parse_tip_response(body: &str) -> Result<TipHash, ClientError> {
    let response: LastBlockHashResponse =
        serde_json::from_str(body).map_err(|e| ClientError::Malformed(e.to_string()))?;
    let last_hash = response
        .last_hash
        .ok_or_else(|| ClientError::Malformed("missing field `last_hash`".to_string()))?;
    TipHash::parse(last_hash).map_err(|e| ClientError::Malformed(e.to_string()))
}

/// Only HTTP 200 with a JSON body counts as an accepted submission.
pub fn parse_submit_response(status: StatusCode, body: &str) -> Result<Value, ClientError> {
    if status != StatusCode::OK {
        return Err(ClientError::Rejected {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    serde_json::from_str(body).map_err(|e| ClientError::Malformed(e.to_string()))
}
