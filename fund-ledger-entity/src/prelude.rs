pub use super::{
    listener_checkpoints::Entity as ListenerCheckpoints,
    processed_events::Entity as ProcessedEvents,
};
