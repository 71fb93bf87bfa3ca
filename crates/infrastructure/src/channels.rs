//! 外部投递通道
//!
//! 配置了 webhook 地址的通道通过 HTTP POST 投递，其余通道只记录日志。

use std::sync::Arc;
use std::time::Duration;

use application::{ChannelSendError, ChannelSender, ChannelSenders};
use async_trait::async_trait;
use config::ChannelEndpoints;
use domain::{Channel, Notification};
use serde::Serialize;
use tracing::{debug, info};

/// webhook 请求体
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryRequest<'a> {
    notification_id: String,
    recipient: String,
    channel: Channel,
    #[serde(rename = "type")]
    notification_type: domain::NotificationType,
    priority: domain::NotificationPriority,
    title: &'a str,
    message: &'a str,
    data: &'a serde_json::Value,
}

impl<'a> DeliveryRequest<'a> {
    fn new(channel: Channel, notification: &'a Notification) -> Self {
        Self {
            notification_id: notification.id.to_string(),
            recipient: notification.recipient.to_string(),
            channel,
            notification_type: notification.notification_type,
            priority: notification.priority,
            title: &notification.title,
            message: &notification.message,
            data: &notification.data,
        }
    }
}

/// 通过 HTTP webhook 投递
#[derive(Clone)]
pub struct HttpChannelSender {
    channel: Channel,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpChannelSender {
    pub fn new(
        channel: Channel,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            channel,
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl ChannelSender for HttpChannelSender {
    async fn send(&self, notification: &Notification) -> Result<(), ChannelSendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&DeliveryRequest::new(self.channel, notification))
            .send()
            .await
            .map_err(|err| ChannelSendError::new(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelSendError::new(format!(
                "{} endpoint responded with {status}",
                self.channel
            )));
        }

        debug!(
            channel = %self.channel,
            notification_id = %notification.id,
            "通知已提交到外部通道"
        );
        Ok(())
    }
}

/// 只记录日志的通道，未配置 webhook 时使用
#[derive(Debug, Clone, Copy)]
pub struct LoggingChannelSender {
    channel: Channel,
}

impl LoggingChannelSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelSender for LoggingChannelSender {
    async fn send(&self, notification: &Notification) -> Result<(), ChannelSendError> {
        info!(
            channel = %self.channel,
            notification_id = %notification.id,
            recipient = %notification.recipient,
            title = %notification.title,
            "通知投递（仅日志）"
        );
        Ok(())
    }
}

fn sender_for(
    channel: Channel,
    endpoint: Option<&str>,
    timeout: Duration,
) -> Result<Arc<dyn ChannelSender>, reqwest::Error> {
    Ok(match endpoint {
        Some(endpoint) => Arc::new(HttpChannelSender::new(channel, endpoint, timeout)?),
        None => Arc::new(LoggingChannelSender::new(channel)),
    })
}

/// 根据配置组装 email / sms / push 三个通道
pub fn build_channel_senders(config: &ChannelEndpoints) -> Result<ChannelSenders, reqwest::Error> {
    let timeout = config.request_timeout();
    Ok(ChannelSenders {
        email: sender_for(Channel::Email, config.email_endpoint.as_deref(), timeout)?,
        sms: sender_for(Channel::Sms, config.sms_endpoint.as_deref(), timeout)?,
        push: sender_for(Channel::Push, config.push_endpoint.as_deref(), timeout)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{NotificationDraft, NotificationPreferences, NotificationType, UserId};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notification() -> Notification {
        Notification::create(
            UserId::generate(),
            NotificationDraft::new(NotificationType::Order, "Order shipped", "On its way"),
            NotificationPreferences::default(),
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn http_sender_posts_payload() {
        let server = MockServer::start().await;
        let notification = notification();
        Mock::given(method("POST"))
            .and(path("/email"))
            .and(body_partial_json(serde_json::json!({
                "notificationId": notification.id.to_string(),
                "channel": "email",
                "type": "order",
                "title": "Order shipped",
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sender = HttpChannelSender::new(
            Channel::Email,
            format!("{}/email", server.uri()),
            Duration::from_secs(2),
        )
        .unwrap();

        sender.send(&notification).await.unwrap();
    }

    #[tokio::test]
    async fn http_sender_reports_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sender =
            HttpChannelSender::new(Channel::Sms, server.uri(), Duration::from_secs(2)).unwrap();
        let err = sender.send(&notification()).await.unwrap_err();
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn http_sender_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let sender =
            HttpChannelSender::new(Channel::Push, server.uri(), Duration::from_millis(50))
                .unwrap();
        let err = sender.send(&notification()).await.unwrap_err();
        assert!(err.message.starts_with("request failed"));
    }

    #[tokio::test]
    async fn unconfigured_channels_fall_back_to_logging() {
        let senders = build_channel_senders(&ChannelEndpoints::default()).unwrap();
        senders.email.send(&notification()).await.unwrap();
        senders.sms.send(&notification()).await.unwrap();
        senders.push.send(&notification()).await.unwrap();
    }
}
