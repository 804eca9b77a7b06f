use std::sync::Arc;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::Utc;
use fund_ledger_entity::listener_checkpoints;
use sea_orm::{ActiveValue, DatabaseConnection, EntityTrait, sea_query::OnConflict};

use super::{Checkpoint, CheckpointError, CheckpointStore};

/// Shared store: one `listener_checkpoints` row per listener scope.
pub struct PostgresCheckpointStore {
    db: Arc<DatabaseConnection>,
    scope: String,
}

impl PostgresCheckpointStore {
    pub fn new(db: Arc<DatabaseConnection>, scope: impl Into<String>) -> Self {
        Self {
            db,
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn load(&self) -> Result<Checkpoint, CheckpointError> {
        let model = listener_checkpoints::Entity::find_by_id(self.scope.clone())
            .one(self.db.as_ref())
            .await
            .inspect_err(|e| tracing::error!(err =? e, scope = %self.scope, "failed to query checkpoint from database"))?;

        match model {
            Some(model) => checkpoint_from_model(model),
            None => Ok(Checkpoint::default()),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let last_block = i64::try_from(checkpoint.last_block)
            .map_err(|_| CheckpointError::Invalid(format!("block {} out of range", checkpoint.last_block)))?;
        let last_log_index = i32::try_from(checkpoint.last_log_index).map_err(|_| {
            CheckpointError::Invalid(format!("log index {} out of range", checkpoint.last_log_index))
        })?;

        let model = listener_checkpoints::ActiveModel {
            scope: ActiveValue::Set(self.scope.clone()),
            last_block: ActiveValue::Set(last_block),
            last_log_index: ActiveValue::Set(last_log_index),
            last_tx_hash: ActiveValue::Set(checkpoint.last_tx_hash.map(|hash| hash.to_vec())),
            watched_addresses: ActiveValue::Set(
                checkpoint
                    .watched_addresses
                    .iter()
                    .map(|address| format!("{address:#x}"))
                    .collect(),
            ),
            metadata: ActiveValue::Set(serde_json::to_value(&checkpoint.metadata)?),
            updated_at: ActiveValue::Set(
                checkpoint
                    .last_updated
                    .unwrap_or_else(Utc::now)
                    .naive_utc(),
            ),
            created_at: ActiveValue::NotSet,
        };

        listener_checkpoints::Entity::insert(model)
            .on_conflict(
                OnConflict::column(listener_checkpoints::Column::Scope)
                    .update_columns([
                        listener_checkpoints::Column::LastBlock,
                        listener_checkpoints::Column::LastLogIndex,
                        listener_checkpoints::Column::LastTxHash,
                        listener_checkpoints::Column::WatchedAddresses,
                        listener_checkpoints::Column::Metadata,
                        listener_checkpoints::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await
            .inspect_err(|e| tracing::error!(err =? e, scope = %self.scope, "failed to upsert checkpoint"))?;
        Ok(())
    }
}

fn checkpoint_from_model(model: listener_checkpoints::Model) -> Result<Checkpoint, CheckpointError> {
    let last_tx_hash = model
        .last_tx_hash
        .map(|bytes| {
            B256::try_from(bytes.as_slice())
                .map_err(|_| CheckpointError::Invalid(format!("tx hash of {} bytes", bytes.len())))
        })
        .transpose()?;
    let watched_addresses = model
        .watched_addresses
        .iter()
        .map(|address| {
            address
                .parse::<Address>()
                .map_err(|e| CheckpointError::Invalid(format!("address {address}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let metadata = serde_json::from_value(model.metadata)?;

    Ok(Checkpoint {
        last_block: u64::try_from(model.last_block)
            .map_err(|_| CheckpointError::Invalid(format!("block {}", model.last_block)))?,
        last_log_index: u64::try_from(model.last_log_index)
            .map_err(|_| CheckpointError::Invalid(format!("log index {}", model.last_log_index)))?,
        last_tx_hash,
        last_updated: Some(model.updated_at.and_utc()),
        watched_addresses,
        metadata,
    })
}
