use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta, Utc};
use fund_ledger_entity::processed_events;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    Statement,
};

use super::{DedupKey, DedupStoreError, SharedDedupStore};

/// Shared dedup membership in the `processed_events` table.
pub struct PostgresDedupStore {
    db: Arc<DatabaseConnection>,
}

impl PostgresDedupStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[async_trait]
impl SharedDedupStore for PostgresDedupStore {
    async fn contains(&self, key: &DedupKey) -> Result<bool, DedupStoreError> {
        let found = processed_events::Entity::find_by_id(key.as_bytes().to_vec())
            .filter(processed_events::Column::ExpiresAt.gt(now()))
            .one(self.db.as_ref())
            .await?;
        Ok(found.is_some())
    }

    async fn insert_if_absent(
        &self,
        key: &DedupKey,
        ttl: Duration,
    ) -> Result<bool, DedupStoreError> {
        let now = now();
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|e| DedupStoreError::Unavailable(format!("invalid ttl: {e}")))?;

        // An expired row is overwritten in place; a live row wins the conflict.
        let statement = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO processed_events (key, expires_at, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE
                SET expires_at = EXCLUDED.expires_at, created_at = EXCLUDED.created_at
                WHERE processed_events.expires_at <= $3
            "#,
            [
                sea_orm::Value::from(key.as_bytes().to_vec()),
                sea_orm::Value::from(now + ttl),
                sea_orm::Value::from(now),
            ],
        );
        let result = self.db.execute(statement).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self) -> Result<u64, DedupStoreError> {
        let result = processed_events::Entity::delete_many()
            .filter(processed_events::Column::ExpiresAt.lte(now()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{dedup::Deduplicator, test_utils::init_db};
    use alloy::primitives::B256;

    #[tokio::test]
    #[ignore = "needs database to run"]
    async fn insert_if_absent_is_atomic() {
        let _ = tracing_subscriber::fmt::try_init();
        let guard = init_db("dedup_insert_if_absent_is_atomic").await;
        let store = PostgresDedupStore::new(guard.client());
        let key = DedupKey::new(&B256::repeat_byte(1), 0);

        assert!(!store.contains(&key).await.unwrap());
        assert!(store.insert_if_absent(&key, Duration::from_secs(60)).await.unwrap());
        assert!(!store.insert_if_absent(&key, Duration::from_secs(60)).await.unwrap());
        assert!(store.contains(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "needs database to run"]
    async fn expired_rows_are_overwritten_and_purged() {
        let _ = tracing_subscriber::fmt::try_init();
        let guard = init_db("dedup_expired_rows_are_overwritten_and_purged").await;
        let store = PostgresDedupStore::new(guard.client());
        let expired = DedupKey::new(&B256::repeat_byte(2), 0);
        let live = DedupKey::new(&B256::repeat_byte(2), 1);

        assert!(store.insert_if_absent(&expired, Duration::ZERO).await.unwrap());
        assert!(store.insert_if_absent(&live, Duration::from_secs(60)).await.unwrap());
        assert!(!store.contains(&expired).await.unwrap());
        assert_eq!(store.purge_expired().await.unwrap(), 1);

        assert!(store.insert_if_absent(&expired, Duration::from_secs(60)).await.unwrap());
        assert!(store.contains(&expired).await.unwrap());
        assert!(store.contains(&live).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "needs database to run"]
    async fn deduplicators_share_the_database() {
        let _ = tracing_subscriber::fmt::try_init();
        let guard = init_db("dedup_deduplicators_share_the_database").await;
        let ttl = Duration::from_secs(60);
        let first = Deduplicator::new(10)
            .with_shared_store(Arc::new(PostgresDedupStore::new(guard.client())), ttl);
        let second = Deduplicator::new(10)
            .with_shared_store(Arc::new(PostgresDedupStore::new(guard.client())), ttl);
        let tx = B256::repeat_byte(3);

        assert!(first.check_and_mark(&tx, 7).await);
        assert!(!second.check_and_mark(&tx, 7).await);
        assert!(second.is_duplicate(&tx, 7).await);
    }
}
