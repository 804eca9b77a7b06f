//! `SeaORM` Entity definitions for the tables owned by the ingestion core.

pub mod prelude;

pub mod listener_checkpoints;
pub mod processed_events;
