//! 推送通道
//!
//! 传输层（例如 WebSocket 发送任务）持有接收端，核心只通过 `PushSink` 写入。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{ConnectionId, ServerPush};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::DeliveryError;

/// 单个传输连接的写入端
#[async_trait]
pub trait PushSink: Send + Sync {
    /// 推送一帧。可能因为对端缓慢而挂起，调用方负责超时。
    async fn push(&self, frame: Arc<ServerPush>) -> Result<(), DeliveryError>;

    /// 不等待的推送。发送队列已满时立即返回 `QueueFull`。
    fn try_push(&self, frame: Arc<ServerPush>) -> Result<(), DeliveryError>;
}

/// 基于有界 mpsc 通道的推送端
#[derive(Clone)]
pub struct ChannelSink {
    connection_id: ConnectionId,
    sender: mpsc::Sender<Arc<ServerPush>>,
}

impl ChannelSink {
    /// 创建推送端以及传输层使用的接收端
    pub fn channel(
        connection_id: ConnectionId,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<ServerPush>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                connection_id,
                sender,
            },
            receiver,
        )
    }
}

#[async_trait]
impl PushSink for ChannelSink {
    async fn push(&self, frame: Arc<ServerPush>) -> Result<(), DeliveryError> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| DeliveryError::ConnectionClosed(self.connection_id))
    }

    fn try_push(&self, frame: Arc<ServerPush>) -> Result<(), DeliveryError> {
        self.sender.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryError::QueueFull(self.connection_id),
            TrySendError::Closed(_) => DeliveryError::ConnectionClosed(self.connection_id),
        })
    }
}
