//! 内存版 Outbox 存储（MemoryOutboxStore）
//!
//! 满足 `OutboxStore` 协议的轻量实现：
//! - `begin`：返回 `MemoryTx` 暂存句柄，`commit` 前追加的记录对查询不可见；
//! - `commit` / `rollback`：模拟事务边界的原子性，未提交即丢弃（Drop 等价于回滚）；
//! - 典型用途：测试环境、示例与本地开发。
//!
use crate::error::EventResult;
use crate::event::Event;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::record::{MAX_RETRIES, OutboxRecord, OutboxStatus};
use super::store::OutboxStore;

/// 简单的内存发件箱实现
#[derive(Clone, Default)]
pub struct MemoryOutboxStore {
    inner: Arc<Mutex<Vec<OutboxRecord>>>,
}

/// 内存事务句柄：暂存追加的记录，提交时一次性并入存储
pub struct MemoryTx {
    staged: Vec<OutboxRecord>,
    inner: Arc<Mutex<Vec<OutboxRecord>>>,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开启一个内存"事务"
    pub fn begin(&self) -> MemoryTx {
        MemoryTx {
            staged: Vec::new(),
            inner: self.inner.clone(),
        }
    }

    /// 返回全部记录的副本（调试与测试用）
    pub fn snapshot(&self) -> Vec<OutboxRecord> {
        self.lock().clone()
    }

    /// 绕过事务直接写入一条记录（crate 内测试用）
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, record: OutboxRecord) {
        self.lock().push(record);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OutboxRecord>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryTx {
    /// 提交：暂存记录按追加顺序并入存储
    pub fn commit(mut self) {
        let staged = std::mem::take(&mut self.staged);
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(staged);
    }

    /// 回滚：丢弃暂存记录（直接 Drop 效果相同）
    pub fn rollback(mut self) {
        self.staged.clear();
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    type Tx = MemoryTx;

    async fn append(&self, tx: &mut MemoryTx, event: &Event) -> EventResult<()> {
        let payload = serde_json::to_value(event.data())?;
        tx.staged
            .push(OutboxRecord::pending(event.event_type(), event.source(), payload));
        Ok(())
    }

    async fn fetch_pending(&self, limit: u32) -> EventResult<Vec<OutboxRecord>> {
        Ok(self.fetch_where(limit, |r| r.status == OutboxStatus::Pending))
    }

    async fn fetch_failed_retryable(&self, limit: u32) -> EventResult<Vec<OutboxRecord>> {
        Ok(self.fetch_where(limit, |r| {
            r.status == OutboxStatus::Failed && r.retry_count < MAX_RETRIES
        }))
    }

    async fn mark_processed(&self, id: Uuid) -> EventResult<()> {
        let mut guard = self.lock();
        if let Some(rec) = guard.iter_mut().find(|r| r.id == id) {
            // 已是终态则保持原 processed_at 不变
            if rec.status != OutboxStatus::Processed {
                rec.status = OutboxStatus::Processed;
                rec.processed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> EventResult<()> {
        let mut guard = self.lock();
        if let Some(rec) = guard.iter_mut().find(|r| r.id == id) {
            rec.status = OutboxStatus::Failed;
            rec.retry_count += 1;
            rec.error_msg = Some(reason.to_string());
        }
        Ok(())
    }
}

impl MemoryOutboxStore {
    fn fetch_where(&self, limit: u32, pred: impl Fn(&OutboxRecord) -> bool) -> Vec<OutboxRecord> {
        let guard = self.lock();
        let mut out: Vec<OutboxRecord> = guard.iter().filter(|r| pred(r)).cloned().collect();
        // 稳定排序：created_at 相同时保留提交顺序
        out.sort_by_key(|r| r.created_at);
        out.truncate(limit as usize);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;

    fn mk_event(ty: &str) -> Event {
        let mut data = serde_json::Map::new();
        data.insert("id".into(), json!("42"));
        Event::builder()
            .event_type(ty.to_string())
            .source("user-service".to_string())
            .data(data)
            .build()
    }

    #[tokio::test]
    async fn rolled_back_append_leaves_no_record() {
        let store = MemoryOutboxStore::new();

        let mut tx = store.begin();
        store.append(&mut tx, &mk_event("user.created")).await.unwrap();
        tx.rollback();

        assert!(store.fetch_pending(10).await.unwrap().is_empty());

        // 未提交直接丢弃的事务同样不留痕迹
        let mut tx = store.begin();
        store.append(&mut tx, &mk_event("user.created")).await.unwrap();
        drop(tx);

        assert!(store.fetch_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn committed_append_is_visible_as_pending() {
        let store = MemoryOutboxStore::new();

        let mut tx = store.begin();
        store.append(&mut tx, &mk_event("user.created")).await.unwrap();
        tx.commit();

        let pending = store.fetch_pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].event_type(), "user.created");
        assert_eq!(pending[0].event_source(), "user-service");
        assert_eq!(pending[0].status(), OutboxStatus::Pending);
        assert_eq!(pending[0].retry_count(), 0);
    }

    #[tokio::test]
    async fn fetch_returns_records_oldest_first() {
        let store = MemoryOutboxStore::new();
        let base = Utc::now();

        // 乱序写入严格递增时间戳的记录
        for (offset, ty) in [(2, "third"), (0, "first"), (1, "second")] {
            let mut rec = OutboxRecord::pending(ty, "svc", json!({}));
            rec.created_at = base + ChronoDuration::seconds(offset);
            store.lock().push(rec);
        }

        let pending = store.fetch_pending(10).await.unwrap();
        let order: Vec<&str> = pending.iter().map(|r| r.event_type()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);

        // limit 截断在排序之后
        let limited = store.fetch_pending(2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].event_type(), "first");
    }

    #[tokio::test]
    async fn mark_processed_is_terminal_and_idempotent() {
        let store = MemoryOutboxStore::new();
        let mut tx = store.begin();
        store.append(&mut tx, &mk_event("user.created")).await.unwrap();
        tx.commit();

        let id = store.fetch_pending(1).await.unwrap()[0].id();
        store.mark_processed(id).await.unwrap();

        assert!(store.fetch_pending(10).await.unwrap().is_empty());
        let rec = store.snapshot().into_iter().find(|r| r.id() == id).unwrap();
        assert_eq!(rec.status(), OutboxStatus::Processed);
        let first_processed_at = rec.processed_at().unwrap();

        // 重复标记不改变 processed_at
        store.mark_processed(id).await.unwrap();
        let rec = store.snapshot().into_iter().find(|r| r.id() == id).unwrap();
        assert_eq!(rec.processed_at(), Some(first_processed_at));
    }

    #[tokio::test]
    async fn failed_record_is_retried_up_to_the_bound() {
        let store = MemoryOutboxStore::new();
        let mut tx = store.begin();
        store.append(&mut tx, &mk_event("user.created")).await.unwrap();
        tx.commit();

        let id = store.fetch_pending(1).await.unwrap()[0].id();

        store.mark_failed(id, "dispatch failed").await.unwrap();
        store.mark_failed(id, "dispatch failed").await.unwrap();
        assert_eq!(store.fetch_failed_retryable(10).await.unwrap().len(), 1);

        // 第三次失败耗尽重试额度
        store.mark_failed(id, "dispatch failed").await.unwrap();
        let rec = store.snapshot().into_iter().find(|r| r.id() == id).unwrap();
        assert_eq!(rec.status(), OutboxStatus::Failed);
        assert_eq!(rec.retry_count(), 3);
        assert_eq!(rec.error_msg(), Some("dispatch failed"));
        assert!(store.fetch_failed_retryable(10).await.unwrap().is_empty());

        // 失败记录不会回到 pending 查询
        assert!(store.fetch_pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn marking_unknown_id_is_a_noop() {
        let store = MemoryOutboxStore::new();
        store.mark_processed(Uuid::new_v4()).await.unwrap();
        store.mark_failed(Uuid::new_v4(), "nope").await.unwrap();
        assert!(store.snapshot().is_empty());
    }
}
