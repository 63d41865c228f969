//! Outbox 持久化协议（OutboxStore）
//!
//! 定义发件箱的统一存储抽象。`append` 使用调用方提供的事务句柄，
//! 使记录的插入与业务写入同属一个原子单元：两者要么一起提交，要么都不落库。
//! 插入失败只向调用方返回错误，由其回滚外层事务；本层不做补偿动作。
//!
use crate::error::EventResult;
use crate::event::Event;
use async_trait::async_trait;
use uuid::Uuid;

use super::record::OutboxRecord;

/// Outbox 存储协议
///
/// `Tx` 为具体实现的事务句柄类型（如 `sqlx::Transaction`），
/// 由业务事务边界创建并传入 `append`。
#[async_trait]
pub trait OutboxStore: Send + Sync {
    type Tx: Send;

    /// 在调用方事务内插入一条 `pending` 记录；
    /// 序列化或写入失败时返回错误，调用方须回滚外层事务
    async fn append(&self, tx: &mut Self::Tx, event: &Event) -> EventResult<()>;

    /// 拉取至多 `limit` 条 `pending` 记录，按创建时间先到先得
    async fn fetch_pending(&self, limit: u32) -> EventResult<Vec<OutboxRecord>>;

    /// 拉取至多 `limit` 条仍可重试的 `failed` 记录（`retry_count < MAX_RETRIES`），
    /// 按创建时间先到先得
    async fn fetch_failed_retryable(&self, limit: u32) -> EventResult<Vec<OutboxRecord>>;

    /// 标记记录处理完成（终态），写入 `processed_at`；幂等
    async fn mark_processed(&self, id: Uuid) -> EventResult<()>;

    /// 标记记录失败：累加 `retry_count` 并记录原因
    async fn mark_failed(&self, id: Uuid, reason: &str) -> EventResult<()>;
}
