//! 事件桥
//!
//! 命令层在持久化成功后发布领域事件，由分区工作任务异步交给订阅者。
//! 同一分区（同一房间或同一用户）的事件按发布顺序消费；不同分区之间不保证顺序。
//! 投递语义为至少一次：重复发布同一事件会被订阅者处理两次，去重由客户端按ID完成。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use domain::{DomainEvent, PartitionKey};
use futures::FutureExt;
use tokio::sync::{mpsc, RwLock};

use crate::error::ApplicationError;

/// 事件订阅者
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Arc<DomainEvent>);
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// 分区（工作任务）数量
    pub partitions: usize,
    /// 每个分区的队列容量
    pub queue_capacity: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            partitions: 8,
            queue_capacity: 1024,
        }
    }
}

type Subscribers = Arc<RwLock<Vec<(u64, Arc<dyn EventHandler>)>>>;

pub struct EventBridge {
    partitions: Vec<mpsc::Sender<Arc<DomainEvent>>>,
    subscribers: Subscribers,
    next_subscription: AtomicU64,
}

impl EventBridge {
    /// 创建事件桥并启动分区工作任务。必须在 tokio 运行时内调用。
    pub fn start(settings: BridgeSettings) -> Arc<Self> {
        let subscribers: Subscribers = Arc::new(RwLock::new(Vec::new()));
        let partitions = (0..settings.partitions.max(1))
            .map(|index| {
                let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
                tokio::spawn(run_partition(index, receiver, Arc::clone(&subscribers)));
                sender
            })
            .collect();

        tracing::info!(
            partitions = settings.partitions.max(1),
            queue_capacity = settings.queue_capacity,
            "事件桥已启动"
        );
        Arc::new(Self {
            partitions,
            subscribers,
            next_subscription: AtomicU64::new(1),
        })
    }

    /// 发布事件。返回时事件已进入分区队列；队列满时等待。
    pub async fn publish(&self, event: DomainEvent) -> Result<(), ApplicationError> {
        let index = self.partition_of(&event.partition_key());
        let event_type = event.event_type();
        self.partitions[index]
            .send(Arc::new(event))
            .await
            .map_err(|_| ApplicationError::BridgeClosed)?;

        tracing::trace!(event_type, partition = index, "事件已发布");
        Ok(())
    }

    /// 注册订阅者。订阅之前发布的事件不会被补发。
    pub async fn subscribe(&self, handler: Arc<dyn EventHandler>) -> SubscriptionHandle {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().await.push((id, handler));
        tracing::debug!(subscription_id = id, "新增事件订阅");

        SubscriptionHandle {
            id,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    fn partition_of(&self, key: &PartitionKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as usize
    }
}

/// 订阅句柄，调用 `cancel` 取消订阅
pub struct SubscriptionHandle {
    id: u64,
    subscribers: Subscribers,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn cancel(self) {
        self.subscribers
            .write()
            .await
            .retain(|(id, _)| *id != self.id);
        tracing::debug!(subscription_id = self.id, "事件订阅已取消");
    }
}

async fn run_partition(
    index: usize,
    mut receiver: mpsc::Receiver<Arc<DomainEvent>>,
    subscribers: Subscribers,
) {
    while let Some(event) = receiver.recv().await {
        // 取快照后释放读锁，处理期间允许订阅/取消订阅
        let handlers: Vec<Arc<dyn EventHandler>> = subscribers
            .read()
            .await
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(Arc::clone(&event)))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                tracing::error!(
                    partition = index,
                    event_type = event.event_type(),
                    "事件处理器发生panic"
                );
            }
        }
    }
    tracing::debug!(partition = index, "事件分区已停止");
}
