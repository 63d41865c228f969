//! 事件分发核心库（eventbus）
//!
//! 提供进程内事件分发与事务性发件箱（Outbox）的组合：
//! - 分发（`dispatch`）：发布/订阅注册表与并发扇出，尽力而为语义；
//! - 发件箱（`outbox`）：事件记录与业务写入同事务落库，进程崩溃也不丢失；
//! - 补偿（`reconcile`）：后台循环把发件箱排空到分发器并回写状态；
//! - 门面（`manager`）：即时发布、事务性发布与生命周期控制的统一入口。
//!
//! 交付保证为至少一次、尽力而为：持久化覆盖"事件已记录并被调度"，
//! 不承诺每个订阅者恰好消费一次；跨进程分发与死信队列不在本库范围内。
//!
//! 典型用法：
//! 1. 构造 `EventDispatcher` 并 `subscribe` 各处理器（通常在启动期）；
//! 2. 选择 `OutboxStore` 实现（内存或 `postgres` 特性下的 PostgreSQL）；
//! 3. 用 `EventBusManager::builder()` 组装门面并 `start` 补偿循环；
//! 4. 业务事务内调用 `publish_with_tx`，与业务写入一起提交。
//!
//! 部署约束：同一发件箱同一时刻只允许一个活跃的补偿循环实例，
//! 多实例并发会导致重复分发（本库不做分布式协调）。
//!
pub mod dispatch;
pub mod error;
pub mod event;
pub mod manager;
pub mod outbox;
pub mod reconcile;

pub use dispatch::{DispatcherConfig, EventDispatcher, EventHandler};
pub use error::{EventError, EventResult};
pub use event::Event;
pub use manager::{EventBusManager, OutboxStats};
#[cfg(feature = "postgres")]
pub use outbox::PostgresOutboxStore;
pub use outbox::{MAX_RETRIES, MemoryOutboxStore, MemoryTx, OutboxRecord, OutboxStatus, OutboxStore};
pub use reconcile::{Reconciler, ReconcilerConfig};
