use std::sync::Arc;

use application::{ChannelSink, PushSink, RealtimeHub};
use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage, WebSocket};
use domain::{ClientCommand, ConnectionId, HandshakeMetadata, ServerPush};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// 单个 WebSocket 连接
///
/// 发送任务独占 socket 的写端，统一写出核心推送和控制帧；
/// 接收任务解析客户端帧并交给实时中心。任一任务结束即视为连接断开。
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
    handshake: HandshakeMetadata,
    connection_id: ConnectionId,
}

/// 控制帧写操作
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, handshake: HandshakeMetadata) -> Self {
        Self {
            socket,
            state,
            handshake,
            connection_id: ConnectionId::generate(),
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            state,
            handshake,
            connection_id,
        } = self;
        let hub = Arc::clone(&state.hub);
        let (mut sender, mut incoming) = socket.split();
        let (sink, mut outbound) = ChannelSink::channel(connection_id, state.outbound_buffer);

        let user_id = match hub
            .connect(connection_id, &handshake, Arc::new(sink) as Arc<dyn PushSink>)
            .await
        {
            Ok(connected) => connected.user_id,
            Err(err) => {
                tracing::warn!(connection_id = %connection_id, error = %err, "拒绝WebSocket连接");
                refuse(&mut sender, ServerPush::error("identity_unresolved", err.to_string())).await;
                return;
            }
        };
        tracing::info!(connection_id = %connection_id, user_id = %user_id, "WebSocket 连接已建立");

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(8);

        let mut send_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(push) = outbound.recv() => {
                        let text = match push.to_json() {
                            Ok(text) => text,
                            Err(err) => {
                                tracing::warn!(error = %err, "推送序列化失败");
                                continue;
                            }
                        };
                        if sender.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(cmd) = cmd_rx.recv() => {
                        let WsCommand::SendPong(data) = cmd;
                        if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                            break;
                        }
                    }
                    else => break,
                }
            }
            tracing::debug!("WebSocket发送任务结束");
        });

        let recv_hub = Arc::clone(&hub);
        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(message)) = incoming.next().await {
                if handle_incoming(&recv_hub, connection_id, message, &cmd_tx)
                    .await
                    .is_err()
                {
                    break;
                }
            }
            tracing::debug!("WebSocket接收任务结束");
        });

        tokio::select! {
            _ = &mut send_task => recv_task.abort(),
            _ = &mut recv_task => send_task.abort(),
        }

        hub.disconnect(connection_id).await;
        tracing::info!(connection_id = %connection_id, user_id = %user_id, "WebSocket连接已断开，在线状态已清理");
    }
}

/// 处理一帧客户端消息。返回 `Err` 表示连接应当结束。
async fn handle_incoming(
    hub: &RealtimeHub,
    connection_id: ConnectionId,
    message: WsMessage,
    cmd_tx: &mpsc::Sender<WsCommand>,
) -> Result<(), ()> {
    match message {
        WsMessage::Text(text) => match serde_json::from_str::<ClientCommand>(text.as_str()) {
            Ok(command) => {
                if let Err(err) = hub.handle_command(connection_id, command).await {
                    tracing::warn!(connection_id = %connection_id, error = %err, "客户端命令处理失败");
                    hub.reply(connection_id, ServerPush::error("command_failed", err.to_string()))
                        .await;
                }
            }
            Err(err) => {
                tracing::debug!(connection_id = %connection_id, error = %err, "无法解析的客户端帧");
                hub.reply(connection_id, ServerPush::error("invalid_frame", err.to_string()))
                    .await;
            }
        },
        WsMessage::Binary(_) => {
            hub.reply(
                connection_id,
                ServerPush::error("unsupported_frame", "binary frames are not supported"),
            )
            .await;
        }
        WsMessage::Ping(data) => {
            cmd_tx
                .send(WsCommand::SendPong(data.to_vec()))
                .await
                .map_err(|_| ())?;
        }
        WsMessage::Pong(_) => {}
        WsMessage::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "WebSocket收到关闭消息");
            return Err(());
        }
    }
    Ok(())
}

/// 身份无法解析：发送错误帧后以策略违规关闭
async fn refuse(sender: &mut SplitSink<WebSocket, WsMessage>, push: ServerPush) {
    if let Ok(text) = push.to_json() {
        let _ = sender.send(WsMessage::Text(text.into())).await;
    }
    let _ = sender
        .send(WsMessage::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "identity unresolved".into(),
        })))
        .await;
}
