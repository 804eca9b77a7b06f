use async_trait::async_trait;

use super::Middleware;
use crate::events::ParsedEvent;

/// Structured debug log line per dispatched event.
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn process(&self, event: &ParsedEvent) -> anyhow::Result<()> {
        tracing::debug!(
            event = %event.kind,
            block_number = event.block_number,
            log_index = event.log_index,
            tx_hash = %event.tx_hash,
            contract = %event.contract_address,
            "dispatching event"
        );
        Ok(())
    }
}

/// Adapts a synchronous closure into a middleware.
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

impl<F> FnMiddleware<F>
where
    F: Fn(&ParsedEvent) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&ParsedEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, event: &ParsedEvent) -> anyhow::Result<()> {
        (self.f)(event)
    }
}
