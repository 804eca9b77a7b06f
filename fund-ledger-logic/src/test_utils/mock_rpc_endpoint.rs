use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy::{
    primitives::{Address, B256, keccak256},
    rpc::types::Log,
    sol_types::SolEvent,
};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Value, json};

use crate::chain_reader::{ChainReader, EndpointHandle, ReaderConfig, RpcEndpoint};

/// Mock endpoint for testing.
/// Allows deterministic control over endpoint behavior.
#[derive(Clone, Default)]
pub struct MockRpcEndpoint {
    block_number: Arc<RwLock<u64>>,
    should_fail: Arc<RwLock<bool>>,
    fail_next: Arc<RwLock<usize>>,
    delay: Arc<RwLock<Option<Duration>>>,
    responses: Arc<RwLock<HashMap<String, Value>>>,
    logs: Arc<RwLock<Vec<Log>>>,
    calls: Arc<RwLock<HashMap<String, usize>>>,
}

impl MockRpcEndpoint {
    /// Create a new mock endpoint with an initial block number.
    pub fn new(initial_block: u64) -> Self {
        Self {
            block_number: Arc::new(RwLock::new(initial_block)),
            ..Default::default()
        }
    }

    pub fn set_block_number(&self, block: u64) {
        *self.block_number.write() = block;
    }

    /// Set whether every request should fail.
    pub fn set_should_fail(&self, fail: bool) {
        *self.should_fail.write() = fail;
    }

    /// Fail only the next `count` requests.
    pub fn set_fail_next(&self, count: usize) {
        *self.fail_next.write() = count;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = Some(delay);
    }

    /// Set a fixed response for a specific method.
    pub fn set_response(&self, method: &str, response: Value) {
        self.responses.write().insert(method.to_string(), response);
    }

    /// Logs served by `eth_getLogs`, filtered by the requested block range.
    pub fn push_logs(&self, logs: impl IntoIterator<Item = Log>) {
        self.logs.write().extend(logs);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.read().get(method).copied().unwrap_or_default()
    }

    fn take_failure(&self) -> bool {
        if *self.should_fail.read() {
            return true;
        }
        let mut fail_next = self.fail_next.write();
        if *fail_next > 0 {
            *fail_next -= 1;
            return true;
        }
        false
    }

    fn logs_in_range(&self, params: &Value) -> Result<Value> {
        let filter = params
            .get(0)
            .ok_or_else(|| anyhow::anyhow!("missing filter"))?;
        let from = parse_quantity(&filter["fromBlock"])?;
        let to = parse_quantity(&filter["toBlock"])?;
        let logs: Vec<Log> = self
            .logs
            .read()
            .iter()
            .filter(|log| {
                log.block_number
                    .is_some_and(|block| (from..=to).contains(&block))
            })
            .cloned()
            .collect();
        Ok(serde_json::to_value(logs)?)
    }
}

fn parse_quantity(value: &Value) -> Result<u64> {
    let hex = value
        .as_str()
        .and_then(|s| s.strip_prefix("0x"))
        .ok_or_else(|| anyhow::anyhow!("invalid quantity: {value}"))?;
    Ok(u64::from_str_radix(hex, 16)?)
}

#[async_trait]
impl RpcEndpoint for MockRpcEndpoint {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        *self.calls.write().entry(method.to_string()).or_default() += 1;

        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.take_failure() {
            return Err(anyhow::anyhow!("mock endpoint configured to fail"));
        }

        if let Some(response) = self.responses.read().get(method) {
            return Ok(response.clone());
        }

        match method {
            "eth_blockNumber" => Ok(json!(format!("0x{:x}", *self.block_number.read()))),
            "eth_getLogs" => self.logs_in_range(&params),
            _ => Err(anyhow::anyhow!("unsupported method: {method}")),
        }
    }
}

/// Create a reader over mock endpoints named `mock-endpoint-<n>`.
pub fn reader_with_mocks(mocks: Vec<MockRpcEndpoint>, config: ReaderConfig) -> ChainReader {
    let endpoints = mocks
        .into_iter()
        .enumerate()
        .map(|(idx, mock)| EndpointHandle {
            name: format!("mock-endpoint-{}", idx + 1),
            max_rps: None,
            endpoint: Arc::new(mock),
        })
        .collect();
    ChainReader::new(endpoints, config)
}

/// Build an RPC log for a vault event as a node would return it.
pub fn vault_log<E: SolEvent>(
    event: &E,
    address: Address,
    block_number: u64,
    log_index: u64,
    tx_hash: B256,
) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: event.encode_log_data(),
        },
        block_hash: Some(keccak256(block_number.to_be_bytes())),
        block_number: Some(block_number),
        block_timestamp: Some(1_700_000_000 + block_number * 12),
        transaction_hash: Some(tx_hash),
        transaction_index: Some(0),
        log_index: Some(log_index),
        removed: false,
    }
}
