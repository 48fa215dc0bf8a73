//! 事件订阅
//!
//! 进程内的事件总线：扫描/传输线程发布，外部层（GUI/CLI）订阅。
//! 同一来源线程的事件按到达顺序送达，不保证跨线程全序

pub mod throttle;
pub mod types;

pub use throttle::{ProgressThrottler, DEFAULT_THROTTLE_INTERVAL_MS};
pub use types::{EventPriority, MirrorEvent};

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// 事件总线
///
/// 订阅者各持一个无界通道；发布时逐一克隆投递，
/// 已关闭的订阅者在下次发布时被清理
#[derive(Debug, Default)]
pub struct EventBus {
    /// 订阅者（subscriber_id -> 发送端）
    subscribers: DashMap<u64, mpsc::UnboundedSender<MirrorEvent>>,
    /// 订阅者 ID 计数器
    next_id: AtomicU64,
}

impl EventBus {
    /// 创建新的事件总线
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加订阅者，返回订阅 ID 与接收端
    pub fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<MirrorEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        debug!("事件订阅者 {} 已注册", id);
        (id, rx)
    }

    /// 移除订阅者
    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers.remove(&id).is_some() {
            debug!("事件订阅者 {} 已移除", id);
        }
    }

    /// 发布事件到所有订阅者
    pub fn publish(&self, event: MirrorEvent) {
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().send(event.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
            debug!("事件订阅者 {} 已断开，自动清理", id);
        }
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let (_, mut rx1) = bus.subscribe();
        let (_, mut rx2) = bus.subscribe();

        bus.publish(MirrorEvent::Queued { path: "/a.txt".into() });

        assert!(matches!(rx1.recv().await, Some(MirrorEvent::Queued { .. })));
        assert!(matches!(rx2.recv().await, Some(MirrorEvent::Queued { .. })));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        let (_, rx) = bus.subscribe();
        drop(rx);

        bus.publish(MirrorEvent::Queued { path: "/a.txt".into() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let (_, mut rx) = bus.subscribe();

        for i in 0..5u64 {
            bus.publish(MirrorEvent::Discovered {
                path: format!("/f{}.bin", i),
                size: Some(i),
            });
        }

        for i in 0..5u64 {
            match rx.recv().await {
                Some(MirrorEvent::Discovered { path, .. }) => {
                    assert_eq!(path, format!("/f{}.bin", i));
                }
                other => panic!("意外事件: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe();
        bus.unsubscribe(id);

        bus.publish(MirrorEvent::Queued { path: "/a.txt".into() });
        assert!(rx.recv().await.is_none());
    }
}
