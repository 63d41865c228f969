//! Outbox 持久化记录（OutboxRecord）
//!
//! 定义事件在发件箱中的持久化形态与状态机：
//! - 记录只以 `Pending` 创建，且必须在产生它的业务事务内创建；
//! - `Pending → Processed` 为终态，写入 `processed_at`；
//! - 标记失败会累加 `retry_count` 并记录 `error_msg`；
//!   `retry_count` 达到 `MAX_RETRIES` 后记录被永久排除在重试查询之外；
//! - 记录不会被本子系统删除（保留与清理是外部关注点）。
//!
use crate::error::{EventError, EventResult};
use crate::event::Event;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// 失败记录的重试上限；达到后不再进入重试查询（隐式死信）
pub const MAX_RETRIES: u32 = 3;

/// 记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processed => "processed",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> EventResult<Self> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processed" => Ok(OutboxStatus::Processed),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(EventError::parse(format!(
                "unknown outbox status: {other}"
            ))),
        }
    }
}

/// 发件箱记录
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub(crate) id: Uuid,
    pub(crate) event_type: String,
    pub(crate) event_source: String,
    pub(crate) payload: Value,
    pub(crate) status: OutboxStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) processed_at: Option<DateTime<Utc>>,
    pub(crate) retry_count: u32,
    pub(crate) error_msg: Option<String>,
}

impl OutboxRecord {
    /// 以 `Pending` 状态创建一条新记录
    pub(crate) fn pending(event_type: &str, event_source: &str, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            event_source: event_source.to_string(),
            payload,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            processed_at: None,
            retry_count: 0,
            error_msg: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_source(&self) -> &str {
        &self.event_source
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn status(&self) -> OutboxStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn error_msg(&self) -> Option<&str> {
        self.error_msg.as_deref()
    }

    /// 是否仍可重试
    pub fn is_retryable(&self) -> bool {
        self.status == OutboxStatus::Failed && self.retry_count < MAX_RETRIES
    }

    /// 从持久化负载重建瞬态事件；负载不是 JSON 对象时返回解析错误
    pub fn to_event(&self) -> EventResult<Event> {
        let data: Map<String, Value> = serde_json::from_value(self.payload.clone())?;
        Ok(Event::builder()
            .event_type(self.event_type.clone())
            .source(self.event_source.clone())
            .data(data)
            .build())
    }
}
