mod endpoint;

pub use endpoint::{AlloyEndpoint, RpcEndpoint};

use std::{
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256, Bytes, U64, U128},
    rpc::types::{Filter, Log, TransactionReceipt, TransactionRequest},
};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;

use crate::{metrics, settings::ChainSettings};

/// Retry policy shared by all endpoints.
#[derive(Clone, Debug)]
pub struct ReaderConfig {
    /// Attempts per endpoint before rotating to the next one.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `retry_delay * n` before the next try.
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ChainSettings> for ReaderConfig {
    fn from(settings: &ChainSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            retry_delay: settings.retry_delay,
            request_timeout: settings.request_timeout,
        }
    }
}

/// Named endpoint with an optional request rate limit.
pub struct EndpointHandle {
    pub name: String,
    pub max_rps: Option<u32>,
    pub endpoint: Arc<dyn RpcEndpoint>,
}

struct Node {
    name: String,
    endpoint: Arc<dyn RpcEndpoint>,
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

#[derive(Error, Debug)]
pub enum ChainReaderError {
    #[error("no rpc endpoints configured")]
    NoEndpoints,
    #[error("`{method}` failed on all {endpoints} rpc endpoints after {attempts} attempts: {last_error}")]
    Exhausted {
        method: String,
        endpoints: usize,
        attempts: u32,
        #[source]
        last_error: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to serialize `{method}` params: {source}")]
    Params {
        method: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode `{method}` response: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Read client over ranked RPC endpoints.
///
/// Requests go to the current endpoint first, are retried there with linear
/// backoff and then fail over in ring order. The endpoint that answers becomes
/// current for subsequent calls.
pub struct ChainReader {
    nodes: Vec<Node>,
    config: ReaderConfig,
    current: AtomicUsize,
}

impl ChainReader {
    pub fn new(endpoints: Vec<EndpointHandle>, config: ReaderConfig) -> Self {
        let nodes = endpoints
            .into_iter()
            .map(|handle| Node {
                limiter: handle
                    .max_rps
                    .and_then(NonZeroU32::new)
                    .map(|rps| RateLimiter::direct(Quota::per_second(rps))),
                name: handle.name,
                endpoint: handle.endpoint,
            })
            .collect();

        Self {
            nodes,
            config,
            current: AtomicUsize::new(0),
        }
    }

    /// Create a reader with HTTP endpoints from the chain settings.
    pub fn from_settings(settings: &ChainSettings) -> anyhow::Result<Self> {
        let endpoints = settings
            .endpoints
            .iter()
            .map(|endpoint| -> anyhow::Result<EndpointHandle> {
                Ok(EndpointHandle {
                    name: endpoint.name.clone(),
                    max_rps: endpoint.max_rps,
                    endpoint: Arc::new(AlloyEndpoint::connect_http(&endpoint.url)?),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self::new(endpoints, settings.into()))
    }

    /// Name of the endpoint that will be tried first.
    pub fn current_endpoint(&self) -> Option<&str> {
        self.nodes
            .get(self.current.load(Ordering::Acquire))
            .map(|node| node.name.as_str())
    }

    async fn try_node(&self, node: &Node, method: &str, params: &Value) -> anyhow::Result<Value> {
        if let Some(limiter) = &node.limiter {
            limiter.until_ready().await;
        }

        match tokio::time::timeout(
            self.config.request_timeout,
            node.endpoint.request(method, params.clone()),
        )
        .await
        {
            Ok(Ok(value)) => {
                metrics::RPC_REQUESTS_TOTAL
                    .with_label_values(&[node.name.as_str(), method, "ok"])
                    .inc();
                Ok(value)
            }
            Ok(Err(err)) => {
                metrics::RPC_REQUESTS_TOTAL
                    .with_label_values(&[node.name.as_str(), method, "error"])
                    .inc();
                Err(err)
            }
            Err(_) => {
                metrics::RPC_REQUESTS_TOTAL
                    .with_label_values(&[node.name.as_str(), method, "timeout"])
                    .inc();
                Err(anyhow::anyhow!(
                    "request timed out after {:?}",
                    self.config.request_timeout
                ))
            }
        }
    }

    /// Making arbitrary JSON-RPC request with retries and failover.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, ChainReaderError> {
        let len = self.nodes.len();
        if len == 0 {
            return Err(ChainReaderError::NoEndpoints);
        }

        let max_retries = self.config.max_retries.max(1);
        let start = self.current.load(Ordering::Acquire) % len;
        let mut attempts = 0;
        let mut last_error = None;

        for offset in 0..len {
            let idx = (start + offset) % len;
            let node = &self.nodes[idx];

            for attempt in 1..=max_retries {
                attempts += 1;
                match self.try_node(node, method, &params).await {
                    Ok(value) => {
                        if idx != start {
                            self.current.store(idx, Ordering::Release);
                            metrics::RPC_ENDPOINT_SWITCHES_TOTAL.inc();
                            tracing::warn!(
                                endpoint = %node.name,
                                previous = %self.nodes[start].name,
                                "switched current rpc endpoint"
                            );
                        }
                        return Ok(value);
                    }
                    Err(err) => {
                        tracing::debug!(
                            endpoint = %node.name,
                            method,
                            attempt,
                            err = ?err,
                            "rpc request failed"
                        );
                        last_error = Some(err);
                        if attempt < max_retries {
                            sleep(self.config.retry_delay * attempt).await;
                        }
                    }
                }
            }

            tracing::warn!(
                endpoint = %node.name,
                method,
                retries = max_retries,
                "rpc endpoint exhausted its retries"
            );
        }

        let last_error: Box<dyn std::error::Error + Send + Sync> = last_error
            .map(Into::into)
            .unwrap_or_else(|| "no attempt was made".into());
        Err(ChainReaderError::Exhausted {
            method: method.to_string(),
            endpoints: len,
            attempts,
            last_error,
        })
    }

    async fn request_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: impl Serialize,
    ) -> Result<T, ChainReaderError> {
        let params = serde_json::to_value(params).map_err(|source| ChainReaderError::Params {
            method: method.to_string(),
            source,
        })?;
        let value = self.request(method, params).await?;
        serde_json::from_value(value).map_err(|source| ChainReaderError::Decode {
            method: method.to_string(),
            source,
        })
    }

    pub async fn latest_block_number(&self) -> Result<u64, ChainReaderError> {
        let block: U64 = self.request_typed("eth_blockNumber", NO_PARAMS).await?;
        Ok(block.to())
    }

    /// Logs in `[from_block, to_block]` emitted by `addresses` whose first topic
    /// is one of `topics`. Empty slices do not constrain the query.
    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        addresses: &[Address],
        topics: &[B256],
    ) -> Result<Vec<Log>, ChainReaderError> {
        let mut filter = Filter::new().from_block(from_block).to_block(to_block);
        if !addresses.is_empty() {
            filter = filter.address(addresses.to_vec());
        }
        if !topics.is_empty() {
            filter = filter.event_signature(topics.to_vec());
        }
        self.request_typed("eth_getLogs", [filter]).await
    }

    pub async fn call(
        &self,
        tx: &TransactionRequest,
        block: Option<u64>,
    ) -> Result<Bytes, ChainReaderError> {
        self.request_typed("eth_call", (tx, block_tag(block))).await
    }

    pub async fn get_transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ChainReaderError> {
        self.request_typed("eth_getTransactionReceipt", [hash]).await
    }

    pub async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, ChainReaderError> {
        let gas: U64 = self.request_typed("eth_estimateGas", [tx]).await?;
        Ok(gas.to())
    }

    pub async fn get_gas_price(&self) -> Result<u128, ChainReaderError> {
        let price: U128 = self.request_typed("eth_gasPrice", NO_PARAMS).await?;
        Ok(price.to())
    }

    /// Transaction count of `address` including pending transactions.
    pub async fn get_nonce(&self, address: Address) -> Result<u64, ChainReaderError> {
        let nonce: U64 = self
            .request_typed(
                "eth_getTransactionCount",
                (address, BlockNumberOrTag::Pending),
            )
            .await?;
        Ok(nonce.to())
    }
}

const NO_PARAMS: [(); 0] = [];

fn block_tag(block: Option<u64>) -> BlockNumberOrTag {
    block.map_or(BlockNumberOrTag::Latest, BlockNumberOrTag::Number)
}
