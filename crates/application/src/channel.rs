//! 外部投递渠道抽象（email / sms / push）

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Channel, Notification};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ChannelSendError {
    pub message: String,
}

impl ChannelSendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 单个渠道的发送原语；失败只针对本次尝试，不重试
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), ChannelSendError>;
}

#[derive(Clone)]
pub struct ChannelSenders {
    pub email: Arc<dyn ChannelSender>,
    pub sms: Arc<dyn ChannelSender>,
    pub push: Arc<dyn ChannelSender>,
}

impl ChannelSenders {
    /// 站内渠道通过房间推送，不经过外部发送方
    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ChannelSender>> {
        match channel {
            Channel::Email => Some(&self.email),
            Channel::Sms => Some(&self.sms),
            Channel::Push => Some(&self.push),
            Channel::InApp => None,
        }
    }
}
