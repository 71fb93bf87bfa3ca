use std::time::Duration;

use application::{ConnectionHandle, EventReceiver, Session};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ClientEvent, ServerEvent};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// WebSocket 连接
///
/// 一个连接对应一个会话：接收任务按到达顺序逐个处理入站事件，
/// 发送任务负责出站事件和心跳。空闲清理或断开都会取消连接令牌。
pub struct WebSocketConnection {
    socket: WebSocket,
    state: AppState,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState) -> Self {
        Self { socket, state }
    }

    /// 运行连接主循环，直到客户端断开或连接被回收
    pub async fn run(self) {
        let Self { socket, state } = self;
        let (handle, outbound) = ConnectionHandle::channel();
        let cancel = handle.cancellation();
        let connection_id = handle.id();
        let mut session = Session::new(handle);

        tracing::info!(connection_id = %connection_id, "WebSocket 连接已建立");

        let (sender, mut incoming) = socket.split();

        let send_task = tokio::spawn(Self::send_loop(
            sender,
            outbound,
            state.clone(),
            cancel.clone(),
        ));

        // 接收循环：单个连接的事件严格顺序处理
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(connection_id = %connection_id, "连接被回收");
                    break;
                }
                frame = incoming.next() => frame,
            };

            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(err)) => {
                    tracing::warn!(connection_id = %connection_id, error = %err, "WebSocket 读取失败");
                    break;
                }
                None => break,
            };

            match message {
                WsMessage::Text(text) => {
                    match serde_json::from_str::<ClientEvent>(text.as_str()) {
                        Ok(event) => state.hub.handle_event(&mut session, event).await,
                        Err(err) => {
                            state.hub.touch(&session).await;
                            tracing::debug!(connection_id = %connection_id, error = %err, "无法解析客户端事件");
                            session
                                .handle()
                                .send(ServerEvent::error("INVALID_EVENT", err.to_string()));
                        }
                    }
                }
                WsMessage::Binary(_) => {
                    state.hub.touch(&session).await;
                    session.handle().send(ServerEvent::error(
                        "INVALID_EVENT",
                        "binary frames are not supported",
                    ));
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) => state.hub.touch(&session).await,
                WsMessage::Close(_) => {
                    tracing::info!(connection_id = %connection_id, "WebSocket收到关闭消息");
                    break;
                }
            }
        }

        // 进行中的处理已结束，再清理注册表和在线状态
        state.hub.disconnect(&mut session).await;
        cancel.cancel();
        if let Err(err) = send_task.await {
            tracing::warn!(connection_id = %connection_id, error = %err, "发送任务异常结束");
        }
        tracing::info!(connection_id = %connection_id, "WebSocket连接已断开");
    }

    async fn send_loop(
        mut sender: SplitSink<WebSocket, WsMessage>,
        mut outbound: EventReceiver,
        state: AppState,
        cancel: CancellationToken,
    ) {
        let mut heartbeat = interval(state.heartbeat_interval.max(Duration::from_millis(10)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = heartbeat.tick() => state.hub.heartbeat(),
                event = outbound.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let payload = match event.to_json() {
                Ok(json) => json,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to serialize websocket payload");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                tracing::warn!("Failed to send text message");
                cancel.cancel();
                break;
            }
        }

        // 先把已排队的事件写完再关闭
        while let Ok(event) = outbound.try_recv() {
            if let Ok(payload) = event.to_json() {
                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
            }
        }
        if let Err(err) = sender.send(WsMessage::Close(None)).await {
            tracing::debug!(error = %err, "关闭帧发送失败，连接可能已断开");
        }
        tracing::debug!("WebSocket发送任务结束");
    }
}
