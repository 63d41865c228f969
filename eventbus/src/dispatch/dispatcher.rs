//! 事件分发器（EventDispatcher）
//!
//! 进程内发布/订阅注册表与并发扇出：
//! - `subscribe`：按事件类型注册处理器（通常在启动期完成）；
//! - `publish`：读锁下取出处理器快照后释放锁，为每个处理器派生一个带超时的并发任务；
//! - `shutdown`：取消根令牌，并在排水超时内等待在途任务结束。
//!
//! 发布方永不被订阅方拖慢或拖垮：`publish` 不等待处理器完成，
//! 处理器失败只记录日志，互不影响。代价是高发布速率 × 多处理器时
//! 并发任务数量无上界，这是已知的扩展性风险。
//!
use crate::error::{EventError, EventResult};
use crate::event::Event;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use super::handler::EventHandler;

/// 分发器配置
#[derive(Clone, Copy, Debug)]
pub struct DispatcherConfig {
    /// 单个处理器的执行超时
    pub handler_timeout: Duration,
    /// 关闭时等待在途任务的排水超时
    pub drain_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

type HandlerRegistry = HashMap<String, Vec<Arc<dyn EventHandler>>>;

/// EventDispatcher：
/// - 注册表由读写锁保护，发布热路径只取读锁；
/// - 每次发布为每个匹配处理器派生一个任务，由 `TaskTracker` 统一跟踪，
///   以便关闭时排水。
pub struct EventDispatcher {
    registry: RwLock<HandlerRegistry>,
    tracker: TaskTracker,
    token: CancellationToken,
    config: DispatcherConfig,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
            config,
        }
    }

    /// 注册处理器；同一类型可注册多个，保留注册顺序（顺序不构成语义保证）
    pub fn subscribe(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        debug!(
            event_type = event_type.as_str(),
            handler = handler.handler_name(),
            "handler subscribed"
        );
        self.registry_write()
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// 发布事件：对所有匹配处理器并发扇出，不等待完成。
    ///
    /// 无匹配处理器时为 no-op（仅 debug 日志）。处理器的失败与超时
    /// 不会传播给调用方；唯一的错误情形是分发器已进入关闭流程。
    pub fn publish(&self, event: Event) -> EventResult<()> {
        if self.token.is_cancelled() {
            return Err(EventError::DispatcherClosed);
        }

        // 读锁下取不可变快照，随后立即释放锁再派发
        let matched: Vec<Arc<dyn EventHandler>> = {
            let registry = self.registry_read();
            registry
                .get(event.event_type())
                .map(|list| list.to_vec())
                .unwrap_or_default()
        };

        if matched.is_empty() {
            debug!(
                event_type = event.event_type(),
                "no handlers registered for event"
            );
            return Ok(());
        }

        let event = Arc::new(event);
        for handler in matched {
            let event = Arc::clone(&event);
            let token = self.token.clone();
            let handler_timeout = self.config.handler_timeout;

            self.tracker.spawn(async move {
                // 关闭只阻止新的发布，不打断在途处理器；
                // 在途任务由 shutdown 的排水阶段在有界时间内等待。
                match time::timeout(handler_timeout, handler.handle(&event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!(
                            event_type = event.event_type(),
                            handler = handler.handler_name(),
                            error = %err,
                            "event handler failed"
                        );
                    }
                    Err(_) => {
                        warn!(
                            event_type = event.event_type(),
                            handler = handler.handler_name(),
                            timeout = ?handler_timeout,
                            shutting_down = token.is_cancelled(),
                            "event handler timed out"
                        );
                    }
                }
            });
        }

        Ok(())
    }

    /// 关闭：取消根令牌后在排水超时内等待在途任务；
    /// 超时仍未排空则记录告警并照常返回（接受资源泄漏的风险换取活性）。
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();

        if time::timeout(self.config.drain_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                drain_timeout = ?self.config.drain_timeout,
                "dispatch tasks still running after drain timeout"
            );
        }
    }

    fn registry_read(&self) -> RwLockReadGuard<'_, HandlerRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_write(&self) -> RwLockWriteGuard<'_, HandlerRegistry> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
