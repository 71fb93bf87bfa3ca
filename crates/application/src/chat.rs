//! 会话消息中继
//!
//! 每个连接对每个会话的状态只有 `未加入 → 已加入 → 未加入`。
//! 消息先持久化再扇出，持久化失败只返回给发送方。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domain::{
    ChatMessage, ConnectionId, ConversationId, ConversationRepository, MessageId, MessageKind,
    Role, RoomKey, ServerEvent, UserId,
};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::connection::ConnectionHandle;
use crate::error::ApplicationError;
use crate::locks::KeyedLocks;
use crate::rooms::RoomRouter;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

pub struct ChatRelayDependencies {
    pub conversations: Arc<dyn ConversationRepository>,
    pub rooms: Arc<RoomRouter>,
    pub clock: Arc<dyn Clock>,
    pub history_limit: usize,
}

pub struct ChatRelay {
    deps: ChatRelayDependencies,
    typing: RwLock<HashMap<ConversationId, HashSet<UserId>>>,
    /// 历史快照与新消息扇出按会话串行
    fanout: KeyedLocks<ConversationId>,
}

impl ChatRelay {
    pub fn new(deps: ChatRelayDependencies) -> Self {
        Self {
            deps,
            typing: RwLock::new(HashMap::new()),
            fanout: KeyedLocks::new(),
        }
    }

    /// 参与者或管理员才能进入会话
    async fn ensure_access(
        &self,
        identity: UserId,
        role: Role,
        conversation_id: ConversationId,
    ) -> Result<(), ApplicationError> {
        let conversation = self
            .deps
            .conversations
            .find_conversation(conversation_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found(format!("conversation {conversation_id}")))?;

        if role == Role::Admin || conversation.has_participant(identity) {
            Ok(())
        } else {
            Err(ApplicationError::not_authorized(format!(
                "access conversation {conversation_id}"
            )))
        }
    }

    /// 加入会话房间并推送最近的历史消息
    ///
    /// 历史读取成功后才加入房间；与 `send_message` 在同一会话锁内执行，
    /// 新消息要么已在历史中，要么在 `chat_history` 之后到达。
    pub async fn join(
        &self,
        identity: UserId,
        role: Role,
        handle: &ConnectionHandle,
        conversation_id: ConversationId,
    ) -> Result<Vec<ChatMessage>, ApplicationError> {
        self.ensure_access(identity, role, conversation_id).await?;

        let _guard = self.fanout.lock(conversation_id).await;
        let messages = self
            .deps
            .conversations
            .recent_messages(conversation_id, self.deps.history_limit)
            .await?;
        self.deps
            .rooms
            .join(handle, RoomKey::Chat(conversation_id))
            .await;
        handle.send(ServerEvent::ChatHistory {
            conversation_id,
            messages: messages.clone(),
        });

        info!(user_id = %identity, conversation_id = %conversation_id, history = messages.len(), "加入会话");
        Ok(messages)
    }

    pub async fn leave(
        &self,
        identity: UserId,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
    ) {
        self.deps
            .rooms
            .leave(connection_id, RoomKey::Chat(conversation_id))
            .await;
        if self.remove_typing(conversation_id, identity).await {
            self.publish_typing(conversation_id, identity, false, &[]).await;
        }
        debug!(user_id = %identity, conversation_id = %conversation_id, "离开会话");
    }

    pub async fn send_message(
        &self,
        identity: UserId,
        role: Role,
        conversation_id: ConversationId,
        body: String,
        kind: MessageKind,
        metadata: JsonValue,
    ) -> Result<ChatMessage, ApplicationError> {
        if kind == MessageKind::Text && body.trim().is_empty() {
            return Err(ApplicationError::Validation(
                "message body must not be empty".to_string(),
            ));
        }
        self.ensure_access(identity, role, conversation_id).await?;

        let message = ChatMessage::new(
            conversation_id,
            identity,
            body,
            kind,
            metadata,
            self.deps.clock.now(),
        );
        let _guard = self.fanout.lock(conversation_id).await;
        let stored = self
            .deps
            .conversations
            .append_message(message)
            .await
            .map_err(|err| {
                warn!(user_id = %identity, conversation_id = %conversation_id, error = %err, "消息持久化失败");
                ApplicationError::persist(err)
            })?;

        let delivered = self
            .deps
            .rooms
            .publish(
                RoomKey::Chat(conversation_id),
                ServerEvent::NewMessage(stored.clone()),
            )
            .await;
        debug!(message_id = %stored.id, delivered, "消息已扇出");
        Ok(stored)
    }

    /// 更新输入状态并通知房间内除发送方连接以外的成员
    pub async fn set_typing(
        &self,
        identity: UserId,
        role: Role,
        conversation_id: ConversationId,
        is_typing: bool,
        sender_connections: &[ConnectionId],
    ) -> Result<(), ApplicationError> {
        self.ensure_access(identity, role, conversation_id).await?;
        if is_typing {
            self.typing
                .write()
                .await
                .entry(conversation_id)
                .or_default()
                .insert(identity);
        } else {
            self.remove_typing(conversation_id, identity).await;
        }
        self.publish_typing(conversation_id, identity, is_typing, sender_connections)
            .await;
        Ok(())
    }

    pub async fn is_typing(&self, conversation_id: ConversationId, identity: UserId) -> bool {
        self.typing
            .read()
            .await
            .get(&conversation_id)
            .is_some_and(|users| users.contains(&identity))
    }

    pub async fn mark_read(
        &self,
        identity: UserId,
        role: Role,
        conversation_id: ConversationId,
        message_ids: Vec<MessageId>,
    ) -> Result<Vec<MessageId>, ApplicationError> {
        self.ensure_access(identity, role, conversation_id).await?;
        let updated = self
            .deps
            .conversations
            .mark_read(conversation_id, identity, message_ids)
            .await
            .map_err(ApplicationError::persist)?;

        if !updated.is_empty() {
            self.deps
                .rooms
                .publish(
                    RoomKey::Chat(conversation_id),
                    ServerEvent::MessagesRead {
                        conversation_id,
                        reader: identity,
                        message_ids: updated.clone(),
                        read_at: self.deps.clock.now(),
                    },
                )
                .await;
        }
        Ok(updated)
    }

    /// 身份完全离线时清除其所有输入状态
    pub async fn clear_typing_for(&self, identity: UserId) -> usize {
        let cleared: Vec<ConversationId> = {
            let mut typing = self.typing.write().await;
            let cleared = typing
                .iter_mut()
                .filter_map(|(conversation_id, users)| {
                    users.remove(&identity).then_some(*conversation_id)
                })
                .collect();
            typing.retain(|_, users| !users.is_empty());
            cleared
        };

        for conversation_id in &cleared {
            self.publish_typing(*conversation_id, identity, false, &[]).await;
        }
        cleared.len()
    }

    async fn remove_typing(&self, conversation_id: ConversationId, identity: UserId) -> bool {
        let mut typing = self.typing.write().await;
        let Some(users) = typing.get_mut(&conversation_id) else {
            return false;
        };
        let removed = users.remove(&identity);
        if users.is_empty() {
            typing.remove(&conversation_id);
        }
        removed
    }

    async fn publish_typing(
        &self,
        conversation_id: ConversationId,
        identity: UserId,
        is_typing: bool,
        excluded: &[ConnectionId],
    ) {
        self.deps
            .rooms
            .publish_excluding(
                RoomKey::Chat(conversation_id),
                ServerEvent::UserTyping {
                    conversation_id,
                    identity,
                    is_typing,
                },
                excluded,
            )
            .await;
    }
}
