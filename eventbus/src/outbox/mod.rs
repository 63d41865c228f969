//! Outbox 子系统（outbox）
//!
//! 事务性发件箱：领域事件与业务写入在同一事务中落库，
//! 之后由 `reconcile::Reconciler` 异步补投，避免"写库 + 发消息"的双写不一致。
//!
//! - `OutboxRecord` / `OutboxStatus`：持久化记录形态与状态机；
//! - `OutboxStore`：持久化协议（事务内追加、批量拉取、状态标记）；
//! - `MemoryOutboxStore`：内存实现，用于测试、示例与本地开发；
//! - `PostgresOutboxStore`：基于 sqlx 的 PostgreSQL 实现（`postgres` 特性）。
//!
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod record;
pub mod store;

pub use memory::{MemoryOutboxStore, MemoryTx};
#[cfg(feature = "postgres")]
pub use postgres::PostgresOutboxStore;
pub use record::{MAX_RETRIES, OutboxRecord, OutboxStatus};
pub use store::OutboxStore;
