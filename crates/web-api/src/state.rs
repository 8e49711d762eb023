use std::sync::Arc;

use application::RealtimeHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RealtimeHub>,
    /// 每个连接的发送队列长度
    pub outbound_buffer: usize,
}

impl AppState {
    pub fn new(hub: Arc<RealtimeHub>, outbound_buffer: usize) -> Self {
        Self {
            hub,
            outbound_buffer,
        }
    }
}
