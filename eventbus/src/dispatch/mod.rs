//! 事件分发子系统（dispatch）
//!
//! 提供进程内发布/订阅的协议与运行时：
//! - `EventHandler`：事件消费处理的统一抽象；
//! - `EventDispatcher`：注册表与并发扇出的分发器实现。
//!
//! 分发为尽力而为（fire-and-forget）语义，与持久化无关；
//! 需要持久化保证的路径见 `outbox` 与 `reconcile` 模块。
//!
pub mod dispatcher;
pub mod handler;

pub use dispatcher::{DispatcherConfig, EventDispatcher};
pub use handler::EventHandler;
