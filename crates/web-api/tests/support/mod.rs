#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{Clock, NotificationDispatcher, SystemClock};
use config::AppConfig;
use domain::{Role, User, UserId};
use futures_util::{SinkExt, StreamExt};
use infrastructure::{Infrastructure, MemoryStorage};
use serde_json::{json, Value};
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtService};

pub const TEST_SECRET: &str = "integration-test-secret-with-at-least-32-chars";
const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub storage: Arc<MemoryStorage>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn jwt(&self) -> &JwtService {
        &self.state.jwt_service
    }

    pub fn token(&self, user: &User) -> String {
        self.jwt().generate_token(user.id, user.role).expect("token")
    }

    pub fn admin_token(&self) -> String {
        self.jwt()
            .generate_token(UserId::generate(), Role::Admin)
            .expect("token")
    }

    /// 写入一个用户
    pub async fn seed_user(&self, name: &str, role: Role) -> User {
        let user = User::new(name, format!("{name}@example.com"), role);
        self.storage.user_repository.upsert(user.clone()).await;
        user
    }

    /// 建立连接并完成认证，认证快照已被消费
    pub async fn connect_as(&self, user: &User) -> WsClient {
        let mut client = WsClient::connect(self.addr).await;
        client
            .send(json!({
                "event": "authenticate",
                "data": { "identity": user.id, "credential": self.token(user) }
            }))
            .await;
        client.expect_event("authenticated").await;
        client.expect_event("recent_notifications").await;
        client
    }

    /// 轮询直到条件成立
    pub async fn eventually<F, Fut>(&self, mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn spawn_server() -> TestServer {
    let mut config = AppConfig::default();
    config.jwt.secret = TEST_SECRET.into();

    let infrastructure = Infrastructure::build(&config.notifications).expect("infrastructure");
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (state, outcomes) = AppState::assemble(&config, &infrastructure, clock);
    NotificationDispatcher::spawn_outcome_logger(outcomes);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let app = router(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestServer {
        addr,
        state,
        storage: infrastructure.storage.clone(),
        shutdown: Some(shutdown_tx),
    }
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (stream, _) = connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("websocket connect");
        Self { stream }
    }

    pub async fn send(&mut self, event: Value) {
        self.stream
            .send(TungsteniteMessage::Text(event.to_string().into()))
            .await
            .expect("send event");
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(TungsteniteMessage::Text(text.to_string().into()))
            .await
            .expect("send raw");
    }

    /// 下一条事件，忽略心跳
    pub async fn next_event(&mut self) -> Option<Value> {
        loop {
            let frame = timeout(EVENT_TIMEOUT, self.stream.next()).await.ok()??;
            match frame.ok()? {
                TungsteniteMessage::Text(text) => {
                    let value: Value = serde_json::from_str(text.as_str()).expect("json event");
                    if value["event"] != "heartbeat" {
                        return Some(value);
                    }
                }
                TungsteniteMessage::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// 读到指定名称的事件为止，返回其 `data`
    pub async fn expect_event(&mut self, name: &str) -> Value {
        loop {
            let event = self
                .next_event()
                .await
                .unwrap_or_else(|| panic!("connection ended before `{name}`"));
            if event["event"] == name {
                return event["data"].clone();
            }
        }
    }

    /// 在给定时间内不应收到任何非心跳事件
    pub async fn expect_silence(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match timeout(remaining, self.stream.next()).await {
                Err(_) => return,
                Ok(Some(Ok(TungsteniteMessage::Text(text)))) => {
                    let value: Value = serde_json::from_str(text.as_str()).expect("json event");
                    assert_eq!(value["event"], "heartbeat", "unexpected event: {value}");
                }
                Ok(_) => {}
            }
        }
    }

    /// 服务端主动关闭时应先收到关闭帧
    pub async fn expect_close(&mut self) {
        loop {
            let frame = timeout(EVENT_TIMEOUT, self.stream.next())
                .await
                .expect("close frame in time")
                .expect("stream ended without close frame")
                .expect("websocket frame");
            match frame {
                TungsteniteMessage::Close(_) => return,
                _ => {}
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
