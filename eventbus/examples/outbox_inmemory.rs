//! 内存组件组装的最小示例：
//! 订阅处理器 → 事务性发布 → 补偿循环重放 → 观察统计与状态。
//!
//! 运行：`cargo run -p eventbus --example outbox_inmemory`
use async_trait::async_trait;
use eventbus::{
    Event, EventBusManager, EventDispatcher, EventHandler, MemoryOutboxStore, ReconcilerConfig,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct XpProjector {
    granted: Arc<AtomicUsize>,
}

#[async_trait]
impl EventHandler for XpProjector {
    fn handler_name(&self) -> &str {
        "xp-projector"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let user = event
            .data()
            .get("user_id")
            .and_then(|v| v.as_str())
            .unwrap_or("<unknown>");
        println!("granting XP to {user} (event {})", event.event_type());
        self.granted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dispatcher = Arc::new(EventDispatcher::new());
    let store = Arc::new(MemoryOutboxStore::new());
    let granted = Arc::new(AtomicUsize::new(0));

    let manager = EventBusManager::builder()
        .dispatcher(dispatcher)
        .store(store.clone())
        .config(ReconcilerConfig {
            pending_interval: Duration::from_millis(100),
            failed_interval: Duration::from_millis(500),
            batch_size: 50,
        })
        .build();

    manager.subscribe(
        "challenge.completed",
        Arc::new(XpProjector {
            granted: granted.clone(),
        }),
    );
    manager.start();

    // 业务事务：写业务数据的同时把事件写入发件箱
    let mut data = serde_json::Map::new();
    data.insert("user_id".into(), json!("u-42"));
    data.insert("challenge_id".into(), json!("c-7"));
    let event = Event::builder()
        .event_type("challenge.completed".to_string())
        .source("challenge-service".to_string())
        .data(data)
        .build();

    let mut tx = store.begin();
    manager.publish_with_tx(&mut tx, &event).await?;
    tx.commit();

    println!("stats after commit: {:?}", manager.outbox_stats().await?);

    // 等补偿循环把记录排空
    while granted.load(Ordering::Relaxed) == 0 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    println!("stats after reconcile: {:?}", manager.outbox_stats().await?);

    manager.shutdown().await;
    Ok(())
}
