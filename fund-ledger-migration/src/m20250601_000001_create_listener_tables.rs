use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            CREATE TABLE "listener_checkpoints" (
                "scope" text PRIMARY KEY,
                "last_block" bigint NOT NULL,
                "last_log_index" integer NOT NULL,
                "last_tx_hash" bytea,
                "watched_addresses" text[] NOT NULL DEFAULT '{}',
                "metadata" jsonb NOT NULL DEFAULT '{}',
                "created_at" timestamp NOT NULL DEFAULT (now() at time zone 'utc'),
                "updated_at" timestamp NOT NULL DEFAULT (now() at time zone 'utc')
            );

            CREATE TABLE "processed_events" (
                "key" bytea PRIMARY KEY,
                "expires_at" timestamp NOT NULL,
                "created_at" timestamp NOT NULL DEFAULT (now() at time zone 'utc')
            );

            CREATE INDEX "processed_events_expires_at_index" ON "processed_events" ("expires_at");

            COMMENT ON TABLE "listener_checkpoints" IS 'Last fully dispatched log position per listener scope';

            COMMENT ON TABLE "processed_events" IS 'Deduplication keys of dispatched logs, keyed by keccak(tx_hash:log_index)'
        "#;
        crate::from_sql(manager, sql).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let sql = r#"
            DROP TABLE "processed_events";
            DROP TABLE "listener_checkpoints"
        "#;
        crate::from_sql(manager, sql).await
    }
}
