//! Outbox 补偿循环（Reconciler）
//!
//! 周期性将发件箱中的记录经分发器重放，并回写状态：
//! - pending 扫描（默认 5s）与 failed 扫描（默认 30s）共用一个控制循环，
//!   两类扫描顺序执行，同一批次不会被并发拉取；
//! - 单条记录：反序列化负载 → 重建事件 → `publish` → 标记 `processed`；
//!   反序列化或 `publish` 调用本身出错则标记 `failed` 并记录原因；
//! - `publish` 返回成功仅表示"已交给分发器异步扇出"，
//!   整体保证是至少一次、尽力而为，而非每个订阅者都消费成功。
//!
//! 部署约束：同一存储同一时刻只允许一个活跃的补偿循环实例。
//!
use crate::dispatch::EventDispatcher;
use crate::outbox::{OutboxRecord, OutboxStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 补偿循环配置
#[derive(Clone, Copy, Debug)]
pub struct ReconcilerConfig {
    /// pending 记录的扫描间隔
    pub pending_interval: Duration,
    /// failed 记录的补偿扫描间隔
    pub failed_interval: Duration,
    /// 单次扫描的批量上限
    pub batch_size: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            pending_interval: Duration::from_secs(5),
            failed_interval: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Sweep {
    Pending,
    Failed,
}

/// Reconciler：把发件箱批量排空到分发器，并回写记录状态
pub struct Reconciler<S: OutboxStore> {
    store: Arc<S>,
    dispatcher: Arc<EventDispatcher>,
    config: ReconcilerConfig,
}

impl<S: OutboxStore> Reconciler<S> {
    pub fn new(
        store: Arc<S>,
        dispatcher: Arc<EventDispatcher>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// 运行控制循环直至令牌被取消
    pub async fn run(self, token: CancellationToken) {
        let mut pending_tick = time::interval(self.config.pending_interval);
        pending_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failed_tick = time::interval(self.config.failed_interval);
        failed_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            pending_interval = ?self.config.pending_interval,
            failed_interval = ?self.config.failed_interval,
            "outbox reconciler started"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = pending_tick.tick() => self.sweep(Sweep::Pending).await,
                _ = failed_tick.tick() => self.sweep(Sweep::Failed).await,
            }
        }

        info!("outbox reconciler stopped");
    }

    async fn sweep(&self, kind: Sweep) {
        let fetched = match kind {
            Sweep::Pending => self.store.fetch_pending(self.config.batch_size).await,
            Sweep::Failed => {
                self.store
                    .fetch_failed_retryable(self.config.batch_size)
                    .await
            }
        };

        let records = match fetched {
            Ok(records) => records,
            Err(err) => {
                warn!(sweep = ?kind, error = %err, "outbox fetch failed");
                return;
            }
        };

        if records.is_empty() {
            return;
        }
        debug!(sweep = ?kind, count = records.len(), "replaying outbox batch");

        // 批次内按先到先得顺序逐条重放；事件经分发器仍并发扇出
        for record in records {
            self.replay(record).await;
        }
    }

    async fn replay(&self, record: OutboxRecord) {
        let id = record.id();
        let replayed = record
            .to_event()
            .and_then(|event| self.dispatcher.publish(event));

        match replayed {
            Ok(()) => {
                if let Err(err) = self.store.mark_processed(id).await {
                    warn!(record_id = %id, error = %err, "failed to mark outbox record processed");
                }
            }
            Err(err) => {
                warn!(
                    record_id = %id,
                    event_type = record.event_type(),
                    error = %err,
                    "outbox replay failed"
                );
                if let Err(mark_err) = self.store.mark_failed(id, &err.to_string()).await {
                    warn!(record_id = %id, error = %mark_err, "failed to mark outbox record failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EventHandler;
    use crate::event::Event;
    use crate::outbox::{MemoryOutboxStore, OutboxStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn handler_name(&self) -> &str {
            "counting"
        }
        async fn handle(&self, _event: &Event) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn fast_config() -> ReconcilerConfig {
        ReconcilerConfig {
            pending_interval: Duration::from_millis(20),
            failed_interval: Duration::from_millis(40),
            batch_size: 10,
        }
    }

    async fn seed(store: &MemoryOutboxStore, ty: &str) {
        let mut data = serde_json::Map::new();
        data.insert("id".into(), json!("42"));
        let event = Event::builder()
            .event_type(ty.to_string())
            .source("user-service".to_string())
            .data(data)
            .build();

        let mut tx = store.begin();
        store.append(&mut tx, &event).await.unwrap();
        tx.commit();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_record_is_replayed_and_marked_processed() {
        let store = Arc::new(MemoryOutboxStore::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        let calls = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe(
            "user.created",
            Arc::new(CountingHandler {
                calls: calls.clone(),
            }),
        );

        seed(&store, "user.created").await;

        let token = CancellationToken::new();
        let reconciler = Reconciler::new(store.clone(), dispatcher.clone(), fast_config());
        let task = tokio::spawn(reconciler.run(token.clone()));

        let _ = time::timeout(Duration::from_secs(2), async {
            loop {
                let done = store
                    .snapshot()
                    .iter()
                    .all(|r| r.status() == OutboxStatus::Processed);
                if done && calls.load(Ordering::Relaxed) >= 1 {
                    break;
                }
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        token.cancel();
        let _ = task.await;

        let rec = &store.snapshot()[0];
        assert_eq!(rec.status(), OutboxStatus::Processed);
        assert!(rec.processed_at().is_some());
        assert!(store.fetch_pending(10).await.unwrap().is_empty());
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        dispatcher.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatch_error_marks_record_failed() {
        let store = Arc::new(MemoryOutboxStore::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        // 已关闭的分发器让 publish 调用本身出错
        dispatcher.shutdown().await;

        seed(&store, "user.created").await;

        let token = CancellationToken::new();
        let reconciler = Reconciler::new(store.clone(), dispatcher.clone(), fast_config());
        let task = tokio::spawn(reconciler.run(token.clone()));

        let _ = time::timeout(Duration::from_secs(2), async {
            loop {
                let failed = store
                    .snapshot()
                    .iter()
                    .any(|r| r.status() == OutboxStatus::Failed);
                if failed {
                    break;
                }
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        token.cancel();
        let _ = task.await;

        let rec = &store.snapshot()[0];
        assert_eq!(rec.status(), OutboxStatus::Failed);
        assert!(rec.retry_count() >= 1);
        assert!(rec.error_msg().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_payload_is_marked_failed() {
        let store = Arc::new(MemoryOutboxStore::new());
        let dispatcher = Arc::new(EventDispatcher::new());

        // 直接注入非对象负载，模拟损坏的记录
        let rec = OutboxRecord::pending("user.created", "svc", json!(42));
        let id = rec.id();
        store.insert_raw(rec);

        let token = CancellationToken::new();
        let reconciler = Reconciler::new(store.clone(), dispatcher.clone(), fast_config());
        let task = tokio::spawn(reconciler.run(token.clone()));

        let _ = time::timeout(Duration::from_secs(2), async {
            loop {
                let failed = store
                    .snapshot()
                    .iter()
                    .any(|r| r.id() == id && r.status() == OutboxStatus::Failed);
                if failed {
                    break;
                }
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        token.cancel();
        let _ = task.await;

        let rec = store.snapshot().into_iter().find(|r| r.id() == id).unwrap();
        assert_eq!(rec.status(), OutboxStatus::Failed);

        dispatcher.shutdown().await;
    }
}
