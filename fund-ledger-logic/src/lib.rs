pub mod approval;
pub mod chain_reader;
pub mod checkpoint;
mod clock;
pub mod dedup;
pub mod dispatcher;
pub mod events;
pub mod handlers;
pub mod listener;
mod metrics;
pub mod settings;
#[cfg(test)]
pub mod test_utils;

pub use approval::{
    ApprovalError, ApprovalWorkflowEngine, ExecutionGateway, NotificationSink, RuleTable,
    SlaSweeper,
};
pub use chain_reader::{ChainReader, ChainReaderError, RpcEndpoint};
pub use checkpoint::{Checkpoint, CheckpointError, CheckpointManager, CheckpointStore};
pub use clock::{Clock, SystemClock};
pub use dedup::{DedupKey, Deduplicator, SharedDedupStore};
pub use dispatcher::{EventDispatcher, EventHandler, Middleware};
pub use events::{EventArgs, EventCatalog, EventKind, ParsedEvent};
pub use listener::EventListener;
