use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use alloy::{
    network::Ethereum,
    providers::{DynProvider, Provider, ProviderBuilder},
};

/// A single JSON-RPC endpoint the chain reader can fail over between.
#[async_trait]
pub trait RpcEndpoint: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value>;
}

/// Endpoint backed by a type-erased alloy HTTP provider.
pub struct AlloyEndpoint {
    provider: DynProvider<Ethereum>,
}

impl AlloyEndpoint {
    pub fn connect_http(url: &str) -> Result<Self> {
        let url = url.parse()?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Ok(Self { provider })
    }
}

#[async_trait]
impl RpcEndpoint for AlloyEndpoint {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let params_raw = serde_json::value::to_raw_value(&params)
            .map_err(|e| anyhow::anyhow!("failed to serialize params: {e:?}"))?;
        let response = self
            .provider
            .raw_request_dyn(method.to_string().into(), &params_raw)
            .await
            .map_err(|e| anyhow::anyhow!("provider error: {e:?}"))?;
        serde_json::from_str(response.get())
            .map_err(|e| anyhow::anyhow!("failed to deserialize response: {e:?}"))
    }
}
