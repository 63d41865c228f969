//! PostgreSQL 版 Outbox 存储（PostgresOutboxStore）
//!
//! 基于 sqlx 的 `OutboxStore` 实现。`append` 使用调用方的
//! `sqlx::Transaction` 句柄，使插入与业务写入同属一个原子单元；
//! 查询与状态更新走连接池。部署约束：同一张表同一时刻只允许一个
//! 活跃的补偿循环实例，多实例并发会导致重复分发。
//!
use crate::error::EventResult;
use crate::event::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use super::record::{MAX_RETRIES, OutboxRecord, OutboxStatus};
use super::store::OutboxStore;

/// `outbox_events` 表的查询行
#[derive(FromRow)]
struct OutboxRow {
    id: Uuid,
    event_type: String,
    event_source: String,
    event_data: serde_json::Value,
    status: String,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
    retry_count: i32,
    error_msg: Option<String>,
}

impl TryFrom<OutboxRow> for OutboxRecord {
    type Error = crate::error::EventError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(OutboxRecord {
            id: row.id,
            event_type: row.event_type,
            event_source: row.event_source,
            payload: row.event_data,
            status: OutboxStatus::parse(&row.status)?,
            created_at: row.created_at,
            processed_at: row.processed_at,
            retry_count: row.retry_count.max(0) as u32,
            error_msg: row.error_msg,
        })
    }
}

const SELECT_COLUMNS: &str = "id, event_type, event_source, event_data, status, \
     created_at, processed_at, retry_count, error_msg";

/// PostgreSQL 发件箱实现
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 开启一个数据库事务，供业务写入与 `append` 共用
    pub async fn begin(&self) -> EventResult<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// 建表与索引（幂等）
    pub async fn run_migrations(&self) -> EventResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_events (
                id UUID PRIMARY KEY,
                event_type TEXT NOT NULL,
                event_source TEXT NOT NULL,
                event_data JSONB NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'processed', 'failed')),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                processed_at TIMESTAMPTZ,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_msg TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_events_status_created
            ON outbox_events(status, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_events_event_type
            ON outbox_events(event_type)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_where(
        &self,
        condition: &str,
        limit: u32,
    ) -> EventResult<Vec<OutboxRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM outbox_events \
             WHERE {condition} ORDER BY created_at ASC LIMIT $1"
        );
        let rows: Vec<OutboxRow> = sqlx::query_as(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(OutboxRecord::try_from).collect()
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    type Tx = Transaction<'static, Postgres>;

    async fn append(&self, tx: &mut Self::Tx, event: &Event) -> EventResult<()> {
        let payload = serde_json::to_value(event.data())?;
        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, event_type, event_source, event_data, status, created_at, retry_count)
            VALUES ($1, $2, $3, $4, 'pending', $5, 0)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.event_type())
        .bind(event.source())
        .bind(payload)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn fetch_pending(&self, limit: u32) -> EventResult<Vec<OutboxRecord>> {
        self.fetch_where("status = 'pending'", limit).await
    }

    async fn fetch_failed_retryable(&self, limit: u32) -> EventResult<Vec<OutboxRecord>> {
        let condition = format!("status = 'failed' AND retry_count < {MAX_RETRIES}");
        self.fetch_where(&condition, limit).await
    }

    async fn mark_processed(&self, id: Uuid) -> EventResult<()> {
        // 已处理的记录不再更新，保持 processed_at 不变
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'processed', processed_at = NOW()
            WHERE id = $1 AND status <> 'processed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> EventResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'failed', retry_count = retry_count + 1, error_msg = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
