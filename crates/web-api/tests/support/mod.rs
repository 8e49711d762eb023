use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    BridgeSettings, ChatCommandService, EventBridge, HandshakeUserIdResolver,
    InMemoryPersistence, RealtimeHub, RouterSettings,
};
use domain::{RoomId, RoomKind, RoomRoster, UserId};
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as TungsteniteMessage}, MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;
use web_api::{router, AppState};

pub type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 基于内存持久化的测试服务器
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<InMemoryPersistence>,
    pub commands: ChatCommandService,
    pub hub: Arc<RealtimeHub>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let store = Arc::new(InMemoryPersistence::new());
        let bridge = EventBridge::start(BridgeSettings {
            partitions: 4,
            queue_capacity: 64,
        });
        let hub = RealtimeHub::with_bridge(
            Arc::new(HandshakeUserIdResolver),
            store.clone(),
            RouterSettings {
                delivery_timeout: Duration::from_secs(1),
            },
            Arc::clone(&bridge),
        )
        .await;
        let commands = ChatCommandService::new(store.clone(), bridge);

        let app = router(AppState::new(Arc::clone(&hub), 64));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            commands,
            hub,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, query: &str) -> String {
        format!("ws://{}/ws?{}", self.addr, query)
    }

    pub async fn seed_room(&self, participants: &[UserId]) -> RoomId {
        let room_id = RoomId::from(Uuid::new_v4());
        self.store
            .insert_room(RoomRoster {
                room_id,
                name: Some("general".into()),
                room_type: RoomKind::Group,
                participants: participants.to_vec(),
            })
            .await;
        room_id
    }

    /// 以指定用户建立连接，并等待重连同步结束
    pub async fn connect_user(&self, user_id: UserId) -> ClientStream {
        let (mut stream, _) = connect_async(self.ws_url(&format!("userId={user_id}")))
            .await
            .expect("websocket connect");
        let connected = next_event(&mut stream, "connected").await;
        assert_eq!(connected["data"]["userId"], user_id.to_string());
        next_event(&mut stream, "notifications-sync-complete").await;
        stream
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub fn new_user() -> UserId {
    UserId::from(Uuid::new_v4())
}

/// 读取下一帧 JSON 文本
pub async fn next_json<S>(stream: &mut S) -> Option<Value>
where
    S: Stream<Item = Result<TungsteniteMessage, WsError>> + Unpin,
{
    loop {
        let frame = timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("frame within timeout")?;
        match frame.expect("frame") {
            TungsteniteMessage::Text(text) => {
                return Some(serde_json::from_str(text.as_str()).expect("json frame"))
            }
            TungsteniteMessage::Close(_) => return None,
            _ => continue,
        }
    }
}

/// 跳过其他推送，直到收到指定事件
pub async fn next_event<S>(stream: &mut S, event: &str) -> Value
where
    S: Stream<Item = Result<TungsteniteMessage, WsError>> + Unpin,
{
    loop {
        let value = next_json(stream)
            .await
            .unwrap_or_else(|| panic!("stream closed before {event}"));
        if value["event"] == event {
            return value;
        }
    }
}
