//! 并发数据一致性测试
//!
//! 验证大量连接并发建立/断开后，连接注册表、房间在线索引与在线状态保持一致。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use application::{
    BridgeSettings, ChannelSink, HandshakeUserIdResolver, InMemoryPersistence, PersistenceError,
    PersistenceGateway, PushSink, RealtimeHub, RouterSettings, SyncStatus,
};
use async_trait::async_trait;
use domain::{
    ConnectionId, HandshakeMetadata, MessageId, MessageReadRecord, MessageRecord, NewMessage,
    NewNotification, NewRoom, Notification, NotificationId, RoomId, RoomKind, RoomRoster, UserId,
};
use futures::future::join_all;
use uuid::Uuid;

const USERS: usize = 20;
const CONNECTIONS_PER_USER: usize = 3;

async fn hub_with_room(users: &[UserId]) -> (Arc<RealtimeHub>, RoomId) {
    let store = Arc::new(InMemoryPersistence::new());
    let room_id = RoomId::from(Uuid::new_v4());
    store
        .insert_room(RoomRoster {
            room_id,
            name: Some("lobby".into()),
            room_type: RoomKind::Group,
            participants: users.to_vec(),
        })
        .await;

    let hub = RealtimeHub::start(
        Arc::new(HandshakeUserIdResolver),
        store,
        RouterSettings::default(),
        BridgeSettings::default(),
    )
    .await;
    (hub, room_id)
}

async fn open(hub: Arc<RealtimeHub>, user_id: UserId) -> ConnectionId {
    let connection_id = ConnectionId::generate();
    // 接收端直接丢弃：推送失败只会被记录，不影响状态维护
    let (sink, _) = ChannelSink::channel(connection_id, 8);
    let handshake = HandshakeMetadata::new().with("userId", user_id.to_string());
    let connected = hub
        .connect(connection_id, &handshake, Arc::new(sink) as Arc<dyn PushSink>)
        .await
        .expect("identity resolves");
    connected.sync.await.expect("sync task completes");
    connection_id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connect_disconnect_consistency() {
    let users: Vec<UserId> = (0..USERS).map(|_| UserId::from(Uuid::new_v4())).collect();
    let (hub, room_id) = hub_with_room(&users).await;

    let opened = join_all(users.iter().flat_map(|user_id| {
        let hub = Arc::clone(&hub);
        let user_id = *user_id;
        (0..CONNECTIONS_PER_USER).map(move |_| tokio::spawn(open(Arc::clone(&hub), user_id)))
    }))
    .await;
    let connections: Vec<ConnectionId> = opened
        .into_iter()
        .map(|joined| joined.expect("connect task"))
        .collect();

    let stats = hub.stats();
    assert_eq!(stats.connections, USERS * CONNECTIONS_PER_USER);
    assert_eq!(stats.online_users, USERS);
    assert_eq!(
        hub.membership().users_in(room_id),
        users.iter().copied().collect::<HashSet<_>>()
    );
    for user_id in &users {
        assert!(hub.registry().is_online(*user_id));
        assert!(hub.presence().is_online(*user_id));
        assert_eq!(
            hub.registry().connections_for(*user_id).len(),
            CONNECTIONS_PER_USER
        );
    }

    let closed = join_all(connections.into_iter().map(|connection_id| {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move { hub.disconnect(connection_id).await })
    }))
    .await;
    assert!(closed.iter().all(|joined| joined.is_ok()));

    let stats = hub.stats();
    assert_eq!(stats.connections, 0);
    assert_eq!(stats.online_users, 0);
    assert_eq!(stats.active_rooms, 0);
    for user_id in &users {
        assert!(!hub.registry().is_online(*user_id));
        assert!(!hub.presence().is_online(*user_id));
        assert!(hub.membership().rooms_of(*user_id).is_empty());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registry_and_presence_agree_under_churn() {
    let user_id = UserId::from(Uuid::new_v4());
    let (hub, room_id) = hub_with_room(&[user_id, UserId::from(Uuid::new_v4())]).await;

    // 保持一个长连接，其余连接并发地反复建立和断开
    let anchor = open(Arc::clone(&hub), user_id).await;
    let churn = join_all((0..10).map(|_| {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            for _ in 0..5 {
                let connection_id = open(Arc::clone(&hub), user_id).await;
                hub.disconnect(connection_id).await;
            }
        })
    }))
    .await;
    assert!(churn.iter().all(|joined| joined.is_ok()));

    assert!(hub.registry().is_online(user_id));
    assert!(hub.presence().is_online(user_id));
    assert_eq!(hub.registry().connections_for(user_id), HashSet::from([anchor]));
    assert!(hub.membership().is_member(user_id, room_id));

    hub.disconnect(anchor).await;
    assert!(!hub.registry().is_online(user_id));
    assert!(!hub.presence().is_online(user_id));
}

/// 房间名单查询较慢的持久化（模拟数据库延迟），其余调用直接转发
struct SlowRoster {
    inner: InMemoryPersistence,
    delay: Duration,
}

#[async_trait]
impl PersistenceGateway for SlowRoster {
    async fn find_rooms_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<RoomRoster>, PersistenceError> {
        tokio::time::sleep(self.delay).await;
        self.inner.find_rooms_for_user(user_id).await
    }

    async fn find_unread_notifications(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Notification>, PersistenceError> {
        self.inner.find_unread_notifications(user_id).await
    }

    async fn mark_notification_read(
        &self,
        notification_id: NotificationId,
    ) -> Result<Notification, PersistenceError> {
        self.inner.mark_notification_read(notification_id).await
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> Result<Notification, PersistenceError> {
        self.inner.create_notification(notification).await
    }

    async fn create_message(&self, message: NewMessage) -> Result<MessageRecord, PersistenceError> {
        self.inner.create_message(message).await
    }

    async fn mark_message_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<MessageReadRecord, PersistenceError> {
        self.inner.mark_message_read(message_id, user_id).await
    }

    async fn create_room(&self, room: NewRoom) -> Result<RoomRoster, PersistenceError> {
        self.inner.create_room(room).await
    }

    async fn update_room(
        &self,
        room_id: RoomId,
        name: Option<String>,
    ) -> Result<RoomRoster, PersistenceError> {
        self.inner.update_room(room_id, name).await
    }

    async fn add_participants(
        &self,
        room_id: RoomId,
        participants: Vec<UserId>,
    ) -> Result<Vec<UserId>, PersistenceError> {
        self.inner.add_participants(room_id, participants).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disconnect_during_sync_leaves_no_membership() {
    let users: Vec<UserId> = (0..USERS).map(|_| UserId::from(Uuid::new_v4())).collect();
    let inner = InMemoryPersistence::new();
    let room_id = RoomId::from(Uuid::new_v4());
    inner
        .insert_room(RoomRoster {
            room_id,
            name: Some("lobby".into()),
            room_type: RoomKind::Group,
            participants: users.clone(),
        })
        .await;
    let hub = RealtimeHub::start(
        Arc::new(HandshakeUserIdResolver),
        Arc::new(SlowRoster {
            inner,
            delay: Duration::from_millis(200),
        }),
        RouterSettings::default(),
        BridgeSettings::default(),
    )
    .await;

    // 每个用户建立连接后立即断开，不等待同步完成
    let results = join_all(users.iter().map(|user_id| {
        let hub = Arc::clone(&hub);
        let user_id = *user_id;
        tokio::spawn(async move {
            let connection_id = ConnectionId::generate();
            let (sink, _rx) = ChannelSink::channel(connection_id, 8);
            let handshake = HandshakeMetadata::new().with("userId", user_id.to_string());
            let connected = hub
                .connect(connection_id, &handshake, Arc::new(sink) as Arc<dyn PushSink>)
                .await
                .expect("identity resolves");
            hub.disconnect(connection_id).await;
            connected.sync.await.expect("sync task completes")
        })
    }))
    .await;

    for joined in results {
        let sync = joined.expect("connection task");
        assert_eq!(sync.status, SyncStatus::Aborted);
    }

    let stats = hub.stats();
    assert_eq!(stats.connections, 0);
    assert_eq!(stats.online_users, 0);
    assert_eq!(stats.active_rooms, 0);
    assert!(hub.membership().users_in(room_id).is_empty());
    for user_id in &users {
        assert!(hub.membership().rooms_of(*user_id).is_empty());
        assert!(!hub.presence().is_online(*user_id));
    }
}
