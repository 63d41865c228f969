//! 事件总线门面（EventBusManager）
//!
//! 组合分发器、发件箱存储与补偿循环，对外提供：
//! - `publish_immediate`：直达分发器的即时发布，无持久化保证；
//! - `publish_with_tx`：经发件箱的事务性发布，唯一的持久化路径；
//! - `start` / `shutdown`：补偿循环的生命周期控制；
//! - `outbox_stats`：发件箱积压的近似统计。
//!
use crate::dispatch::{EventDispatcher, EventHandler};
use crate::error::EventResult;
use crate::event::Event;
use crate::outbox::OutboxStore;
use crate::reconcile::{Reconciler, ReconcilerConfig};
use bon::Builder;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// 统计拉取上限；`outbox_stats` 取长度而非精确计数
const STATS_FETCH_CAP: u32 = 1000;

/// 发件箱积压统计（按上限 `1000` 拉取后取长度的近似值）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxStats {
    pub pending: usize,
    pub failed: usize,
}

/// 补偿循环的运行句柄
struct ReconcilerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// EventBusManager：
/// - 构造期注入分发器与存储实例，不依赖任何全局状态，
///   多个实例可在测试中并行运行互不干扰
#[derive(Builder)]
pub struct EventBusManager<S: OutboxStore> {
    dispatcher: Arc<EventDispatcher>,
    store: Arc<S>,
    #[builder(default)]
    config: ReconcilerConfig,
    #[builder(skip)]
    reconciler: Mutex<Option<ReconcilerHandle>>,
}

impl<S: OutboxStore + 'static> EventBusManager<S> {
    /// 注册处理器（分发器透传）
    pub fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.dispatcher.subscribe(event_type, handler);
    }

    /// 即时发布：直达分发器，尽力而为，无发件箱参与
    pub fn publish_immediate(&self, event: Event) -> EventResult<()> {
        self.dispatcher.publish(event)
    }

    /// 事务性发布：写入发件箱，与调用方事务同提交同回滚
    pub async fn publish_with_tx(&self, tx: &mut S::Tx, event: &Event) -> EventResult<()> {
        self.store.append(tx, event).await
    }

    /// 启动补偿循环（须在 tokio 运行时内调用）；
    /// 重复调用会取消并替换之前的循环
    pub fn start(&self) {
        let token = CancellationToken::new();
        let reconciler = Reconciler::new(self.store.clone(), self.dispatcher.clone(), self.config);
        let task = tokio::spawn(reconciler.run(token.clone()));

        let previous = self
            .lock_reconciler()
            .replace(ReconcilerHandle { token, task });
        if previous.is_some() {
            warn!("outbox reconciler restarted, previous loop cancelled");
        }
    }

    /// 两阶段关闭：先取消并等待补偿循环退出，再排空分发器的在途任务
    pub async fn shutdown(&self) {
        let handle = self.lock_reconciler().take();
        if let Some(mut handle) = handle {
            handle.token.cancel();
            let _ = (&mut handle.task).await;
        }

        self.dispatcher.shutdown().await;
    }

    /// 发件箱积压统计；failed 只计入仍可重试的记录
    pub async fn outbox_stats(&self) -> EventResult<OutboxStats> {
        let pending = self.store.fetch_pending(STATS_FETCH_CAP).await?.len();
        let failed = self
            .store
            .fetch_failed_retryable(STATS_FETCH_CAP)
            .await?
            .len();
        Ok(OutboxStats { pending, failed })
    }

    fn lock_reconciler(&self) -> MutexGuard<'_, Option<ReconcilerHandle>> {
        self.reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
