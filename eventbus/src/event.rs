//! 事件模型（Event）
//!
//! 定义在进程内流转的瞬态事件形态：类型、来源与开放式键值负载。
//! 事件由调用方构造，交给分发器或 Outbox 后即转移所有权；本身不直接持久化，
//! 持久化形态见 `outbox::OutboxRecord`。
//!
use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct Event {
    /// 事件类型，自由字符串，用于订阅匹配
    event_type: String,
    /// 事件来源（如 "user-service"）
    source: String,
    /// 开放式负载；键值均由发布方约定
    #[builder(default)]
    data: Map<String, Value>,
}

impl Event {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_with_default_data() {
        let ev = Event::builder()
            .event_type("user.created".to_string())
            .source("user-service".to_string())
            .build();
        assert_eq!(ev.event_type(), "user.created");
        assert!(ev.data().is_empty());
    }

    #[test]
    fn event_round_trips_through_json() {
        let mut data = Map::new();
        data.insert("id".into(), json!("42"));
        let ev = Event::builder()
            .event_type("user.created".to_string())
            .source("user-service".to_string())
            .data(data)
            .build();

        // 整个事件可序列化，便于日志与跨边界传递
        let value = serde_json::to_value(&ev).unwrap();
        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back.event_type(), "user.created");
        assert_eq!(back.source(), "user-service");
        assert_eq!(back.data().get("id"), Some(&json!("42")));
    }
}
