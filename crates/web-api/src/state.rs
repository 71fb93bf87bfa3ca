use std::sync::Arc;
use std::time::Duration;

use application::{
    ChatRelay, ChatRelayDependencies, Clock, ConnectionRegistry, DispatchOutcome, HubSettings,
    NotificationDispatcher, NotificationDispatcherDependencies, PresenceTracker, RealtimeHub,
    RealtimeHubDependencies, RoomRouter, SignalingRelay,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use tokio::sync::mpsc;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RealtimeHub>,
    pub jwt_service: Arc<JwtService>,
    /// 服务端 `heartbeat` 推送间隔
    pub heartbeat_interval: Duration,
}

impl AppState {
    pub fn new(
        hub: Arc<RealtimeHub>,
        jwt_service: Arc<JwtService>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            hub,
            jwt_service,
            heartbeat_interval,
        }
    }

    /// 按配置组装实时核心；返回的接收端需交给结果日志任务消费
    pub fn assemble(
        config: &AppConfig,
        infrastructure: &Infrastructure,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<DispatchOutcome>) {
        let storage = &infrastructure.storage;

        let registry = Arc::new(ConnectionRegistry::new(clock.clone()));
        let rooms = Arc::new(RoomRouter::new());
        let presence = Arc::new(PresenceTracker::new(rooms.clone(), clock.clone()));
        let chat = Arc::new(ChatRelay::new(ChatRelayDependencies {
            conversations: storage.conversation_repository.clone(),
            rooms: rooms.clone(),
            clock: clock.clone(),
            history_limit: config.realtime.chat_history_limit,
        }));
        let signaling = Arc::new(SignalingRelay::new(registry.clone()));

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let notifications = Arc::new(
            NotificationDispatcher::new(NotificationDispatcherDependencies {
                notifications: storage.notification_repository.clone(),
                users: storage.user_repository.clone(),
                senders: infrastructure.senders.clone(),
                rooms: rooms.clone(),
                clock: clock.clone(),
            })
            .with_outcome_channel(outcome_tx),
        );

        let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
        let idle_timeout = chrono::Duration::from_std(config.realtime.idle_timeout())
            .unwrap_or_else(|_| HubSettings::default().idle_timeout);

        let hub = Arc::new(RealtimeHub::new(RealtimeHubDependencies {
            registry,
            rooms,
            presence,
            chat,
            signaling,
            notifications,
            users: storage.user_repository.clone(),
            orders: storage.order_repository.clone(),
            products: storage.product_repository.clone(),
            verifier: jwt_service.clone(),
            clock,
            settings: HubSettings {
                idle_timeout,
                recent_notifications_limit: config.realtime.recent_notifications_limit,
            },
        }));

        (
            Self::new(hub, jwt_service, config.realtime.heartbeat_interval()),
            outcome_rx,
        )
    }
}
