//! 点对点信令转发
//!
//! 目标不在线时直接丢弃：不回错误、不排队、不重试。

use std::sync::Arc;

use domain::{ServerEvent, SignalKind, UserId};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::connection::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    Dropped,
}

pub struct SignalingRelay {
    registry: Arc<ConnectionRegistry>,
}

impl SignalingRelay {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// 转发到目标最近注册的连接
    pub async fn relay(
        &self,
        from: UserId,
        to: UserId,
        kind: SignalKind,
        payload: JsonValue,
    ) -> RelayOutcome {
        let Some(handle) = self.registry.latest_handle(to).await else {
            debug!(from = %from, to = %to, kind = ?kind, "目标离线，信令丢弃");
            return RelayOutcome::Dropped;
        };

        if handle.send(ServerEvent::signal(kind, from, payload)) {
            debug!(from = %from, to = %to, kind = ?kind, connection_id = %handle.id(), "信令已转发");
            RelayOutcome::Delivered
        } else {
            debug!(from = %from, to = %to, kind = ?kind, "目标连接已关闭，信令丢弃");
            RelayOutcome::Dropped
        }
    }
}
