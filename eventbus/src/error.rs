//! 事件核心统一错误定义
//!
//! 聚焦序列化、分发器生命周期与 Outbox 持久化的最小必要集合，
//! 便于在各实现层统一转换为 `EventError`。
//!
use thiserror::Error;

/// 统一错误类型（事件核心最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventError {
    // --- 序列化/解析 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },

    // --- 分发器 ---
    #[error("event dispatcher is shut down")]
    DispatcherClosed,

    // --- Outbox 持久化 ---
    #[error("outbox store error: {reason}")]
    Store { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl EventError {
    pub fn parse(reason: impl Into<String>) -> Self {
        EventError::Parse {
            reason: reason.into(),
        }
    }

    pub fn store(reason: impl Into<String>) -> Self {
        EventError::Store {
            reason: reason.into(),
        }
    }
}

/// 统一 Result 类型别名
pub type EventResult<T> = Result<T, EventError>;

// ---- Cross-crate conversions for infrastructure convenience ----
// 允许在存储实现层直接使用 `?` 将 sqlx 错误转换为 EventError

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for EventError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EventError::NotFound {
                reason: "row not found".to_string(),
            },
            other => EventError::Database {
                reason: other.to_string(),
            },
        }
    }
}
